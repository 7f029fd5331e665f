// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Neighbor discovery configuration.

use serde::{Deserialize, Serialize};

#[rustfmt::skip]
// # Example
// ```json
// "and": {
//     "timerBaseMs": 300,
//     "initialTimerMs": 500,
//     "sjnMinAgeMs": 1000,
//     "sjnRxLimit": 3
// }
// ```

/// Tunables of the membership gossip loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename = "and")]
pub struct AndConfig {
    /// Lower bound of the randomized timer delay; the upper bound is this
    /// value times `member_count + 1`.
    #[serde(rename = "timerBaseMs", default = "default_timer_base_ms")]
    pub timer_base_ms: u64,
    /// Delay of the first timer tick after a world is opened or joined.
    #[serde(rename = "initialTimerMs", default = "default_initial_timer_ms")]
    pub initial_timer_ms: u64,
    /// How long a membership must have been established before it is
    /// gossiped.
    #[serde(rename = "sjnMinAgeMs", default = "default_sjn_min_age_ms")]
    pub sjn_min_age_ms: u64,
    /// Members heard about in gossip more than this many times are no longer
    /// advertised.
    #[serde(rename = "sjnRxLimit", default = "default_sjn_rx_limit")]
    pub sjn_rx_limit: u32,
}

fn default_timer_base_ms() -> u64 {
    300
}

fn default_initial_timer_ms() -> u64 {
    500
}

fn default_sjn_min_age_ms() -> u64 {
    1000
}

fn default_sjn_rx_limit() -> u32 {
    3
}

impl Default for AndConfig {
    fn default() -> Self {
        Self {
            timer_base_ms: default_timer_base_ms(),
            initial_timer_ms: default_initial_timer_ms(),
            sjn_min_age_ms: default_sjn_min_age_ms(),
            sjn_rx_limit: default_sjn_rx_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_json() {
        let config_json = r#"
        {
            "timerBaseMs": 250,
            "sjnRxLimit": 5
        }"#;

        let config: AndConfig = serde_json::from_str(config_json).expect("error deserializing json config");

        assert_eq!(250, config.timer_base_ms);
        assert_eq!(500, config.initial_timer_ms);
        assert_eq!(1000, config.sjn_min_age_ms);
        assert_eq!(5, config.sjn_rx_limit);
    }
}
