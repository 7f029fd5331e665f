// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Path-to-world resolution for inbound join requests.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use uuid::Uuid;

/// Maps an inbound join request's world path to the local session id of the
/// world serving it.
pub trait PathResolver: Send + Sync {
    /// Returns the local session id serving `path`, if any. The requesting
    /// peer's hash is available for per-peer routing policies.
    fn resolve(&self, path: &str, peer_hash: &str) -> Option<Uuid>;
}

/// A plain mutex-protected path map.
#[derive(Debug, Default)]
pub struct SimplePathResolver {
    paths: Mutex<HashMap<String, Uuid>>,
}

impl SimplePathResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `path` to `local_session_id`, replacing any previous mapping.
    pub fn set_mapping(&self, path: impl Into<String>, local_session_id: Uuid) {
        self.paths
            .lock()
            .expect("error getting path map access")
            .insert(path.into(), local_session_id);
    }

    /// Removes the mapping for `path`, if present.
    pub fn delete_mapping(&self, path: &str) {
        self.paths.lock().expect("error getting path map access").remove(path);
    }
}

impl PathResolver for SimplePathResolver {
    fn resolve(&self, path: &str, _peer_hash: &str) -> Option<Uuid> {
        self.paths
            .lock()
            .expect("error getting path map access")
            .get(path)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_lifecycle() {
        let resolver = SimplePathResolver::new();
        let lsid = Uuid::new_v4();

        assert_eq!(None, resolver.resolve("/home", "peer"));

        resolver.set_mapping("/home", lsid);
        assert_eq!(Some(lsid), resolver.resolve("/home", "peer"));

        resolver.delete_mapping("/home");
        assert_eq!(None, resolver.resolve("/home", "peer"));
    }
}
