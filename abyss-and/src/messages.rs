// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Typed AHMP control frames.
//!
//! Frames are decoded exactly once at the transport boundary into
//! [`AhmpFrame`] and dispatched by match; the bit-exact wire layout is the
//! serializer's business. Receiver session ids travel beside the frame as the
//! routing argument of [`handle_ahmp`](crate::discovery::NeighborDiscovery::handle_ahmp),
//! not inside it.

use abyss_aurl::Aurl;
use uuid::Uuid;

use crate::time::Timestamp;

/// Compact session identity used in gossip payloads (SJN, CRR).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSessionIdentity {
    /// Identity hash of the named peer.
    pub peer_hash: String,
    /// The session id that peer minted for the world in question.
    pub session_id: Uuid,
    /// Timestamp chosen by the peer when it minted the session id.
    pub timestamp: Timestamp,
}

/// Full member identity used where the receiver may have to dial the named
/// peer (JOK, JNI): endpoint, session and the certificates needed to register
/// it with the transport.
#[derive(Clone, Debug)]
pub struct FullPeerSessionIdentity {
    /// Endpoint of the named peer.
    pub aurl: Aurl,
    /// The session id that peer minted for the world in question.
    pub session_id: Uuid,
    /// Timestamp chosen by the peer when it minted the session id.
    pub timestamp: Timestamp,
    /// DER-encoded root certificate of the named peer.
    pub root_certificate_der: Vec<u8>,
    /// DER-encoded handshake key certificate of the named peer.
    pub handshake_key_certificate_der: Vec<u8>,
}

/// Shared-object descriptor carried by SOA frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object id.
    pub id: Uuid,
    /// Where the object content can be fetched.
    pub addr: String,
}

/// A decoded inbound control frame.
#[derive(Clone, Debug)]
pub enum AhmpFrame {
    /// Join request: the sender wants to enter the world behind `path`.
    Jn {
        /// Session id the sender minted for its side of the relationship.
        sender_session_id: Uuid,
        /// World path on the receiving host.
        path: String,
        /// Timestamp of the sender's session.
        timestamp: Timestamp,
    },
    /// Join accepted, with the current member set attached.
    Jok {
        /// Session id the accepter minted.
        sender_session_id: Uuid,
        /// Canonical URL of the joined world.
        world_url: String,
        /// Timestamp of the accepter's session.
        timestamp: Timestamp,
        /// Identities of all current members, for the joiner to dial.
        neighbors: Vec<FullPeerSessionIdentity>,
    },
    /// Join declined.
    Jdn {
        /// Failure code (see [`codes`]).
        code: i32,
        /// Human-readable reason.
        message: String,
    },
    /// Neighbor info: an existing member advertises another member.
    Jni {
        /// Session id of the advertising member.
        sender_session_id: Uuid,
        /// Identity of the advertised member.
        neighbor: FullPeerSessionIdentity,
    },
    /// Membership confirm: the sender considers the receiver a member.
    Mem {
        /// Session id the sender minted.
        sender_session_id: Uuid,
        /// Timestamp of the sender's session.
        timestamp: Timestamp,
    },
    /// Suppressed-join notify: gossip naming peers the sender believes are
    /// established members.
    Sjn {
        /// Session id of the gossiping member.
        sender_session_id: Uuid,
        /// The named members.
        members: Vec<PeerSessionIdentity>,
    },
    /// Cross-referral: the receiver is asked to introduce the sender to the
    /// named members directly.
    Crr {
        /// Session id of the requesting member.
        sender_session_id: Uuid,
        /// The members to introduce.
        members: Vec<PeerSessionIdentity>,
    },
    /// Reset: unconditionally drop the session.
    Rst {
        /// Session id of the resetting side; may be nil when the sender has
        /// no session to name.
        sender_session_id: Uuid,
    },
    /// Shared-object append on a confirmed session.
    Soa {
        /// Session id of the sending member.
        sender_session_id: Uuid,
        /// Appended objects.
        objects: Vec<ObjectInfo>,
    },
    /// Shared-object delete on a confirmed session.
    Sod {
        /// Session id of the sending member.
        sender_session_id: Uuid,
        /// Deleted object ids.
        object_ids: Vec<Uuid>,
    },
}

/// Wire failure codes and their canonical messages.
pub mod codes {
    /// The sender already is a member.
    pub const REDUNDANT: i32 = 110;
    /// A join for the same session is already in flight.
    pub const DUPLICATE: i32 = 480;
    /// The join was canceled locally before completion.
    pub const CANCELED: i32 = 498;
    /// The peer connection was closed mid-join.
    pub const CLOSED: i32 = 499;
    /// Session id collided with an existing session.
    pub const COLLISION: i32 = 520;
    /// The advertised session is older than the one already held.
    pub const EXPIRED: i32 = 496;
    /// The message is not acceptable in the receiver's current state.
    pub const INVALID_STATES: i32 = 597;
    /// The session was reset.
    pub const RESET: i32 = 598;
    /// The join was declined by the accepting user.
    pub const REJECTED: i32 = 599;

    /// Message for [`REDUNDANT`].
    pub const MSG_REDUNDANT: &str = "Already Joined";
    /// Message for [`DUPLICATE`].
    pub const MSG_DUPLICATE: &str = "Duplicate Join";
    /// Message for [`CANCELED`].
    pub const MSG_CANCELED: &str = "Join Canceled";
    /// Message for [`CLOSED`].
    pub const MSG_CLOSED: &str = "Peer Disconnected";
    /// Message for [`COLLISION`].
    pub const MSG_COLLISION: &str = "Session ID Collided";
    /// Message for [`EXPIRED`].
    pub const MSG_EXPIRED: &str = "Session Expired";
    /// Message for [`INVALID_STATES`].
    pub const MSG_INVALID_STATES: &str = "Invalid States";
    /// Message for [`RESET`].
    pub const MSG_RESET: &str = "Reset Requested";
    /// Message for [`REJECTED`].
    pub const MSG_REJECTED: &str = "Join Rejected";
}
