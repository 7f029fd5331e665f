// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The neighbor discovery instance: one lock-serialized object routing API
//! calls, peer lifecycle notifications and decoded inbound frames to the
//! right world.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use abyss_aurl::Aurl;
use uuid::Uuid;

use crate::{
    config::AndConfig,
    error::Error,
    event::{self, fault, EventRx, EventTx},
    messages::AhmpFrame,
    peer::{AndPeer, PeerSession},
    world::World,
};

struct AndState {
    local_hash: String,
    config: AndConfig,
    // id hash - peer
    peers: HashMap<String, Arc<dyn AndPeer>>,
    // local session id - world
    worlds: HashMap<Uuid, World>,
    events: EventTx,
}

impl AndState {
    #[cfg(debug_assertions)]
    fn check_sanity(&self) {
        for world in self.worlds.values() {
            world.check_sanity();
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_sanity(&self) {}
}

/// A per-host neighbor discovery instance.
///
/// All mutation happens synchronously under one exclusive lock; no operation
/// suspends. Observable effects leave through the event channel returned by
/// [`new`](NeighborDiscovery::new), which the host must keep draining, and
/// through fallible sends on the peer handles. Instances are independent of
/// each other; a host may own any number of them.
#[derive(Clone)]
pub struct NeighborDiscovery {
    inner: Arc<Mutex<AndState>>,
}

impl NeighborDiscovery {
    /// Creates an instance for the local peer identified by `local_hash`,
    /// returning it together with the receiving half of its event channel.
    pub fn new(local_hash: impl Into<String>, config: AndConfig) -> (Self, EventRx) {
        let (events, event_rx) = event::event_chan();

        let this = Self {
            inner: Arc::new(Mutex::new(AndState {
                local_hash: local_hash.into(),
                config,
                peers: HashMap::new(),
                worlds: HashMap::new(),
                events,
            })),
        };

        (this, event_rx)
    }

    fn lock(&self) -> MutexGuard<'_, AndState> {
        self.inner.lock().expect("error getting neighbor discovery access")
    }

    /// Records a freshly connected peer and lets every world react to it.
    pub fn peer_connected(&self, peer: Arc<dyn AndPeer>) {
        let mut and = self.lock();
        let peer_hash = peer.id_hash().to_string();

        if peer_hash == and.local_hash {
            fault(&and.events, "self connection");
            return;
        }
        if and.peers.contains_key(&peer_hash) {
            fault(&and.events, "peer already connected");
            return;
        }

        and.peers.insert(peer_hash, peer.clone());
        for world in and.worlds.values_mut() {
            world.peer_connected(peer.clone());
        }

        and.check_sanity();
    }

    /// Removes a closed peer from the registry and from every world.
    pub fn peer_close(&self, peer_hash: &str) {
        let mut and = self.lock();

        if and.peers.remove(peer_hash).is_none() {
            log::debug!("close of unknown peer {} ignored", peer_hash);
            return;
        }
        for world in and.worlds.values_mut() {
            world.remove_peer(peer_hash);
        }

        and.check_sanity();
    }

    /// Creates a world served by the local host under `world_url`.
    pub fn open_world(&self, local_session_id: Uuid, world_url: &str) -> Result<(), Error> {
        let mut and = self.lock();

        if and.worlds.contains_key(&local_session_id) {
            return Err(Error::SessionIdInUse(local_session_id));
        }

        let world = World::new_open(
            and.local_hash.clone(),
            local_session_id,
            world_url.to_string(),
            &and.peers,
            and.events.clone(),
            and.config.clone(),
        );
        and.worlds.insert(local_session_id, world);

        and.check_sanity();
        Ok(())
    }

    /// Starts joining the world behind `target`, dialing the target peer
    /// first if it is not connected yet.
    pub fn join_world(&self, local_session_id: Uuid, target: &Aurl) -> Result<(), Error> {
        let mut and = self.lock();

        if and.worlds.contains_key(&local_session_id) {
            return Err(Error::SessionIdInUse(local_session_id));
        }

        let world = World::new_join(
            and.local_hash.clone(),
            local_session_id,
            target,
            &and.peers,
            and.events.clone(),
            and.config.clone(),
        );
        and.worlds.insert(local_session_id, world);

        and.check_sanity();
        Ok(())
    }

    /// Accepts a previously requested session.
    pub fn accept_session(&self, local_session_id: Uuid, session: PeerSession) {
        let mut and = self.lock();
        if let Some(world) = and.worlds.get_mut(&local_session_id) {
            world.accept_session(session);
        }
        and.check_sanity();
    }

    /// Declines a previously requested session.
    pub fn decline_session(&self, local_session_id: Uuid, session: PeerSession, code: i32, message: &str) {
        let mut and = self.lock();
        if let Some(world) = and.worlds.get_mut(&local_session_id) {
            world.decline_session(session, code, message);
        }
        and.check_sanity();
    }

    /// Tears the world down and destroys it.
    pub fn close_world(&self, local_session_id: Uuid) {
        let mut and = self.lock();
        if let Some(mut world) = and.worlds.remove(&local_session_id) {
            world.close();
        }
        and.check_sanity();
    }

    /// Runs one gossip tick for the world; a no-op if the world is gone.
    pub fn timer_expire(&self, local_session_id: Uuid) {
        let mut and = self.lock();
        if let Some(world) = and.worlds.get_mut(&local_session_id) {
            world.timer_expire();
        }
        and.check_sanity();
    }

    /// Dispatches one decoded inbound frame from `peer`.
    ///
    /// `local_session_id` is the routing id the host already resolved: the
    /// path-resolver result for a JN, the receiver session id carried beside
    /// every other frame, and nil for a reset that should reach all worlds.
    pub fn handle_ahmp(&self, local_session_id: Uuid, peer: Arc<dyn AndPeer>, frame: AhmpFrame) {
        let mut and = self.lock();

        match frame {
            // A reset without a receiver session applies to every world.
            AhmpFrame::Rst { sender_session_id } if local_session_id.is_nil() => {
                for world in and.worlds.values_mut() {
                    world.rst(PeerSession::new(peer.clone(), sender_session_id));
                }
                and.check_sanity();
                return;
            }
            _ => {}
        }

        let Some(world) = and.worlds.get_mut(&local_session_id) else {
            log::debug!("frame for unknown world {} dropped", local_session_id);
            return;
        };

        match frame {
            AhmpFrame::Rst { sender_session_id } => world.rst(PeerSession::new(peer, sender_session_id)),
            AhmpFrame::Jn {
                sender_session_id,
                path: _,
                timestamp,
            } => world.jn(PeerSession::new(peer, sender_session_id), timestamp),
            AhmpFrame::Jok {
                sender_session_id,
                world_url,
                timestamp,
                neighbors,
            } => world.jok(PeerSession::new(peer, sender_session_id), &world_url, timestamp, neighbors),
            AhmpFrame::Jdn { code, message } => world.jdn(&peer, code, &message),
            AhmpFrame::Jni {
                sender_session_id,
                neighbor,
            } => world.jni(PeerSession::new(peer, sender_session_id), neighbor),
            AhmpFrame::Mem {
                sender_session_id,
                timestamp,
            } => world.mem(PeerSession::new(peer, sender_session_id), timestamp),
            AhmpFrame::Sjn {
                sender_session_id,
                members,
            } => world.sjn(PeerSession::new(peer, sender_session_id), members),
            AhmpFrame::Crr {
                sender_session_id,
                members,
            } => world.crr(PeerSession::new(peer, sender_session_id), members),
            AhmpFrame::Soa {
                sender_session_id,
                objects,
            } => world.soa(PeerSession::new(peer, sender_session_id), objects),
            AhmpFrame::Sod {
                sender_session_id,
                object_ids,
            } => world.sod(PeerSession::new(peer, sender_session_id), object_ids),
        }

        and.check_sanity();
    }
}
