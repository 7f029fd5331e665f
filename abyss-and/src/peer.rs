// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transport-facing peer seam.

use std::{fmt, sync::Arc};

use abyss_aurl::Aurl;
use uuid::Uuid;

use crate::{
    messages::{FullPeerSessionIdentity, ObjectInfo, PeerSessionIdentity},
    time::Timestamp,
};

/// Capability handle to a connected remote peer, owned by the transport.
///
/// Every send is non-blocking and fallible: `false` means the transport could
/// not accept the frame and the peer should be assumed dead until the
/// transport confirms it through a peer-close notification. Send failures are
/// never propagated upward.
pub trait AndPeer: fmt::Debug + Send + Sync {
    /// Stable identity hash of the remote peer.
    fn id_hash(&self) -> &str;

    /// Current endpoint of the remote peer.
    fn aurl(&self) -> Aurl;

    /// DER-encoded root certificate of the remote peer.
    fn root_certificate_der(&self) -> Vec<u8>;

    /// DER-encoded handshake key certificate of the remote peer.
    fn handshake_key_certificate_der(&self) -> Vec<u8>;

    /// Sends a join request for the world behind `path`.
    fn try_send_jn(&self, local_session_id: Uuid, path: &str, timestamp: Timestamp) -> bool;

    /// Sends a join acceptance carrying the current member set.
    fn try_send_jok(
        &self,
        local_session_id: Uuid,
        peer_session_id: Uuid,
        world_url: &str,
        timestamp: Timestamp,
        neighbors: &[FullPeerSessionIdentity],
    ) -> bool;

    /// Sends a join rejection.
    fn try_send_jdn(&self, peer_session_id: Uuid, code: i32, message: &str) -> bool;

    /// Advertises a member to the peer.
    fn try_send_jni(&self, local_session_id: Uuid, peer_session_id: Uuid, neighbor: &FullPeerSessionIdentity) -> bool;

    /// Confirms membership to the peer.
    fn try_send_mem(&self, local_session_id: Uuid, peer_session_id: Uuid, timestamp: Timestamp) -> bool;

    /// Gossips established members to the peer.
    fn try_send_sjn(&self, local_session_id: Uuid, peer_session_id: Uuid, members: &[PeerSessionIdentity]) -> bool;

    /// Asks the peer to introduce the named members directly.
    fn try_send_crr(&self, local_session_id: Uuid, peer_session_id: Uuid, members: &[PeerSessionIdentity]) -> bool;

    /// Resets the session. `peer_session_id` may be nil when no session id is
    /// known for the peer.
    fn try_send_rst(&self, local_session_id: Uuid, peer_session_id: Uuid) -> bool;

    /// Appends shared objects on a confirmed session.
    fn try_send_soa(&self, local_session_id: Uuid, peer_session_id: Uuid, objects: &[ObjectInfo]) -> bool;

    /// Deletes shared objects on a confirmed session.
    fn try_send_sod(&self, local_session_id: Uuid, peer_session_id: Uuid, object_ids: &[Uuid]) -> bool;
}

/// A directed session half: a peer handle plus the session id that peer
/// minted for its side of the relationship.
#[derive(Clone, Debug)]
pub struct PeerSession {
    /// The connected peer.
    pub peer: Arc<dyn AndPeer>,
    /// The session id minted by that peer.
    pub peer_session_id: Uuid,
}

impl PeerSession {
    /// Creates a new session half.
    pub fn new(peer: Arc<dyn AndPeer>, peer_session_id: Uuid) -> Self {
        Self { peer, peer_session_id }
    }
}
