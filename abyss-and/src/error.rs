// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Errors returned by the public API surface.
//!
//! Only API misuse is reported through return values; everything a remote peer
//! can cause (stale messages, session mismatches, resets) is recovered from
//! locally and surfaced, where relevant, as an [`Event`](crate::event::Event).

use uuid::Uuid;

/// An API call contradicted the current local state.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The given local session id is already bound to a world.
    #[error("local session id {0} already in use")]
    SessionIdInUse(Uuid),
}
