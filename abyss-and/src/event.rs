// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Neighbor discovery events.

use abyss_aurl::Aurl;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    messages::ObjectInfo,
    peer::PeerSession,
};

// The channel must never fill up: the host is required to drain it, and the
// state machine is required to emit a bounded number of events per entry
// point.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Neighbor discovery related events.
#[derive(Debug)]
pub enum Event {
    /// A remote session awaits the local accept/decline decision.
    SessionRequest {
        /// The world the session belongs to.
        local_session_id: Uuid,
        /// The requesting session half.
        session: PeerSession,
    },
    /// A session reached fully-confirmed mutual membership.
    SessionReady {
        /// The world the session belongs to.
        local_session_id: Uuid,
        /// The confirmed session half.
        session: PeerSession,
    },
    /// A previously requested or confirmed session was torn down.
    SessionClose {
        /// The world the session belonged to.
        local_session_id: Uuid,
        /// The closed session half.
        session: PeerSession,
    },
    /// A world was opened locally or a join concluded successfully.
    JoinSuccess {
        /// The world in question.
        local_session_id: Uuid,
        /// Canonical URL of the world.
        world_url: String,
    },
    /// A join concluded unsuccessfully.
    JoinFail {
        /// The world in question.
        local_session_id: Uuid,
        /// Failure code (see [`codes`](crate::messages::codes)).
        code: i32,
        /// Human-readable reason.
        message: String,
    },
    /// The host should dial the given endpoint; eventual success surfaces as
    /// a peer-connected notification, failure is silent.
    ConnectRequest {
        /// The endpoint to dial.
        aurl: Aurl,
    },
    /// The host should register the given certificates with the transport
    /// before the accompanying connect request can succeed.
    PeerRegister {
        /// DER-encoded root certificate.
        root_certificate_der: Vec<u8>,
        /// DER-encoded handshake key certificate.
        handshake_key_certificate_der: Vec<u8>,
    },
    /// The host should schedule a one-shot timer and call
    /// [`timer_expire`](crate::discovery::NeighborDiscovery::timer_expire) on expiry.
    TimerRequest {
        /// The world asking for the tick.
        local_session_id: Uuid,
        /// Delay until expiry, in milliseconds.
        delay_ms: u64,
    },
    /// The world was destroyed; emitted exactly once per world.
    WorldLeave {
        /// The destroyed world.
        local_session_id: Uuid,
    },
    /// A member appended shared objects.
    ObjectAppend {
        /// The world the objects belong to.
        local_session_id: Uuid,
        /// The appending session half.
        session: PeerSession,
        /// The appended objects.
        objects: Vec<ObjectInfo>,
    },
    /// A member deleted shared objects.
    ObjectDelete {
        /// The world the objects belonged to.
        local_session_id: Uuid,
        /// The deleting session half.
        session: PeerSession,
        /// The deleted object ids.
        object_ids: Vec<Uuid>,
    },
    /// Diagnostic note about a refused transition; release builds only, debug
    /// builds abort instead.
    DebugMessage {
        /// What happened.
        text: String,
    },
}

/// Exposes neighbor discovery events to the host.
pub type EventRx = mpsc::Receiver<Event>;
pub(crate) type EventTx = mpsc::Sender<Event>;

pub(crate) fn event_chan() -> (EventTx, EventRx) {
    mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY)
}

// Emission never blocks; an undrained channel is host misbehavior.
pub(crate) fn emit(tx: &EventTx, event: Event) {
    if let Err(e) = tx.try_send(event) {
        if cfg!(debug_assertions) {
            panic!("event channel overflow: {}", e);
        }
        log::error!("event channel overflow, event lost: {}", e);
    }
}

// An invariant violation: abort in debug builds, record and refuse the
// transition in release builds.
pub(crate) fn fault(tx: &EventTx, text: &str) {
    if cfg!(debug_assertions) {
        panic!("and invariant violated: {}", text);
    }
    log::warn!("and invariant violated: {}", text);
    emit(
        tx,
        Event::DebugMessage {
            text: text.to_string(),
        },
    );
}
