// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Instant};

use uuid::Uuid;

use crate::{
    peer::{AndPeer, PeerSession},
    time::Timestamp,
};

/// Per-peer membership state within one world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Join target, not yet connected.
    DcJt,
    /// Advertised through neighbor info, not yet connected.
    DcJni,
    /// Connected, no world-level information yet.
    Cc,
    /// Join request sent to the join target, awaiting JOK/JDN.
    Jt,
    /// Join request received, awaiting the local accept/decline decision.
    Jn,
    /// Membership confirm received before any neighbor info named this peer.
    RmemNjni,
    /// Neighbor info received, not yet confirmed by the peer.
    Jni,
    /// Both membership confirm and neighbor info observed; ready for the
    /// local confirmation.
    Rmem,
    /// Locally accepted and confirmed to the peer, awaiting the peer's
    /// confirm.
    Tmem,
    /// Fully established mutual membership.
    Mem,
}

/// One record per `(world, peer)` pair.
pub(crate) struct PeerSessionState {
    /// Absent exactly while the peer is not connected (`DcJt`, `DcJni`).
    pub(crate) peer: Option<Arc<dyn AndPeer>>,
    /// Latest session id advertised by or observed from the peer; nil until
    /// one has been learned.
    pub(crate) peer_session_id: Uuid,
    /// Timestamp of the session id's origin; non-decreasing over the record's
    /// lifetime and used to arbitrate between old and new advertisements.
    pub(crate) timestamp: Timestamp,
    pub(crate) state: SessionState,
    /// Gossip about this peer is suppressed.
    pub(crate) sjn_suppressed: bool,
    /// How often recent gossip named this peer.
    pub(crate) sjn_rx_count: u32,
    /// When the peer reached `Mem`; gates gossip eligibility.
    pub(crate) session_established_at: Option<Instant>,
}

impl PeerSessionState {
    /// A freshly connected peer without world-level information.
    pub(crate) fn connected(peer: Arc<dyn AndPeer>) -> Self {
        Self {
            peer: Some(peer),
            peer_session_id: Uuid::nil(),
            timestamp: 0,
            state: SessionState::Cc,
            sjn_suppressed: false,
            sjn_rx_count: 0,
            session_established_at: None,
        }
    }

    /// The connected join target with the join request in flight.
    pub(crate) fn join_target(peer: Arc<dyn AndPeer>) -> Self {
        Self {
            state: SessionState::Jt,
            ..Self::connected(peer)
        }
    }

    /// The join target before its connection exists.
    pub(crate) fn unconnected_join_target() -> Self {
        Self {
            peer: None,
            peer_session_id: Uuid::nil(),
            timestamp: 0,
            state: SessionState::DcJt,
            sjn_suppressed: false,
            sjn_rx_count: 0,
            session_established_at: None,
        }
    }

    /// A peer learned about through neighbor info before its connection
    /// exists.
    pub(crate) fn advertised(session_id: Uuid, timestamp: Timestamp) -> Self {
        Self {
            peer: None,
            peer_session_id: session_id,
            timestamp,
            state: SessionState::DcJni,
            sjn_suppressed: false,
            sjn_rx_count: 0,
            session_established_at: None,
        }
    }

    /// The stored session half, if the peer is connected.
    pub(crate) fn session(&self) -> Option<PeerSession> {
        self.peer
            .as_ref()
            .map(|peer| PeerSession::new(peer.clone(), self.peer_session_id))
    }

    /// Forgets all session-level information while keeping the connection.
    /// The timestamp is kept so stale re-advertisements stay rejected.
    pub(crate) fn revert_connected(&mut self) {
        self.peer_session_id = Uuid::nil();
        self.state = SessionState::Cc;
        self.sjn_suppressed = false;
        self.sjn_rx_count = 0;
        self.session_established_at = None;
    }
}
