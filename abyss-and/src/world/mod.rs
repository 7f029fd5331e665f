// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod session;

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use abyss_aurl::Aurl;
use rand::Rng as _;
use uuid::Uuid;

use crate::{
    config::AndConfig,
    event::{emit, fault, Event, EventTx},
    messages::{codes, FullPeerSessionIdentity, ObjectInfo, PeerSessionIdentity},
    peer::{AndPeer, PeerSession},
    time::{self, Timestamp},
    world::session::{PeerSessionState, SessionState},
};

// Send failures surface later as a peer-close from the transport; here they
// are only worth a note.
fn note_send(sent: bool, frame: &str, peer_hash: &str) {
    if !sent {
        log::debug!("{} send to {} failed", frame, peer_hash);
    }
}

fn full_identity_of(peer: &Arc<dyn AndPeer>, session_id: Uuid, timestamp: Timestamp) -> FullPeerSessionIdentity {
    FullPeerSessionIdentity {
        aurl: peer.aurl(),
        session_id,
        timestamp,
        root_certificate_der: peer.root_certificate_der(),
        handshake_key_certificate_der: peer.handshake_key_certificate_der(),
    }
}

/// Membership state machine for a single world.
pub(crate) struct World {
    local_hash: String,
    local_session_id: Uuid,
    creation_timestamp: Timestamp,
    // Empty for opened worlds; a joined world keeps both for its lifetime.
    join_hash: String,
    join_path: String,
    // Known at creation for opened worlds, learned from the JOK otherwise.
    world_url: String,
    peers: HashMap<String, PeerSessionState>,
    events: EventTx,
    config: AndConfig,
    is_closed: bool,
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// CONSTRUCTION
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    pub(crate) fn new_open(
        local_hash: String,
        local_session_id: Uuid,
        world_url: String,
        connected: &HashMap<String, Arc<dyn AndPeer>>,
        events: EventTx,
        config: AndConfig,
    ) -> Self {
        let mut world = Self {
            local_hash,
            local_session_id,
            creation_timestamp: time::unix_now_millis(),
            join_hash: String::new(),
            join_path: String::new(),
            world_url: world_url.clone(),
            peers: HashMap::new(),
            events,
            config,
            is_closed: false,
        };

        for (peer_hash, peer) in connected {
            world
                .peers
                .insert(peer_hash.clone(), PeerSessionState::connected(peer.clone()));
        }

        emit(
            &world.events,
            Event::JoinSuccess {
                local_session_id,
                world_url,
            },
        );
        emit(
            &world.events,
            Event::TimerRequest {
                local_session_id,
                delay_ms: world.config.initial_timer_ms,
            },
        );

        world
    }

    pub(crate) fn new_join(
        local_hash: String,
        local_session_id: Uuid,
        target: &Aurl,
        connected: &HashMap<String, Arc<dyn AndPeer>>,
        events: EventTx,
        config: AndConfig,
    ) -> Self {
        let mut world = Self {
            local_hash,
            local_session_id,
            creation_timestamp: time::unix_now_millis(),
            join_hash: target.hash().to_string(),
            join_path: target.path().to_string(),
            world_url: String::new(),
            peers: HashMap::new(),
            events,
            config,
            is_closed: false,
        };

        for (peer_hash, peer) in connected {
            if peer_hash == target.hash() {
                note_send(
                    peer.try_send_jn(local_session_id, &world.join_path, world.creation_timestamp),
                    "JN",
                    peer_hash,
                );
                world.peers.insert(peer_hash.clone(), PeerSessionState::join_target(peer.clone()));
                continue;
            }

            world
                .peers
                .insert(peer_hash.clone(), PeerSessionState::connected(peer.clone()));
        }

        if !world.peers.contains_key(target.hash()) {
            world
                .peers
                .insert(target.hash().to_string(), PeerSessionState::unconnected_join_target());
            emit(&world.events, Event::ConnectRequest { aurl: target.clone() });
        }

        world
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// PEER LIFECYCLE
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    pub(crate) fn peer_connected(&mut self, peer: Arc<dyn AndPeer>) {
        let peer_hash = peer.id_hash().to_string();

        let Some(state) = self.peers.get(&peer_hash).map(|info| info.state) else {
            self.peers.insert(peer_hash, PeerSessionState::connected(peer));
            return;
        };

        match state {
            SessionState::DcJt => {
                note_send(
                    peer.try_send_jn(self.local_session_id, &self.join_path, self.creation_timestamp),
                    "JN",
                    &peer_hash,
                );
                if let Some(info) = self.peers.get_mut(&peer_hash) {
                    info.peer = Some(peer);
                    info.state = SessionState::Jt;
                }
            }
            SessionState::DcJni => {
                let Some(info) = self.peers.get_mut(&peer_hash) else {
                    return;
                };
                info.peer = Some(peer);
                info.state = SessionState::Jni;
                if let Some(session) = info.session() {
                    emit(
                        &self.events,
                        Event::SessionRequest {
                            local_session_id: self.local_session_id,
                            session,
                        },
                    );
                }
            }
            _ => fault(&self.events, "duplicate peer connection"),
        }
    }

    pub(crate) fn remove_peer(&mut self, peer_hash: &str) {
        let Some(info) = self.peers.get(peer_hash) else {
            log::debug!("removal of unknown peer {} ignored", peer_hash);
            return;
        };

        match info.state {
            SessionState::Tmem => {
                if let Some(session) = info.session() {
                    emit(
                        &self.events,
                        Event::SessionReady {
                            local_session_id: self.local_session_id,
                            session: session.clone(),
                        },
                    );
                    emit(
                        &self.events,
                        Event::SessionClose {
                            local_session_id: self.local_session_id,
                            session,
                        },
                    );
                }
            }
            SessionState::Mem => {
                if let Some(session) = info.session() {
                    emit(
                        &self.events,
                        Event::SessionClose {
                            local_session_id: self.local_session_id,
                            session,
                        },
                    );
                }
            }
            SessionState::Jt | SessionState::DcJt => {
                emit(
                    &self.events,
                    Event::JoinFail {
                        local_session_id: self.local_session_id,
                        code: codes::CLOSED,
                        message: codes::MSG_CLOSED.to_string(),
                    },
                );
            }
            _ => {}
        }

        self.peers.remove(peer_hash);
    }

    pub(crate) fn close(&mut self) {
        for info in self.peers.values() {
            if let Some(peer) = &info.peer {
                note_send(peer.try_send_rst(self.local_session_id, Uuid::nil()), "RST", peer.id_hash());
            }

            match info.state {
                SessionState::Jt | SessionState::DcJt => {
                    emit(
                        &self.events,
                        Event::JoinFail {
                            local_session_id: self.local_session_id,
                            code: codes::CANCELED,
                            message: codes::MSG_CANCELED.to_string(),
                        },
                    );
                }
                SessionState::Tmem => {
                    if let Some(session) = info.session() {
                        emit(
                            &self.events,
                            Event::SessionReady {
                                local_session_id: self.local_session_id,
                                session: session.clone(),
                            },
                        );
                        emit(
                            &self.events,
                            Event::SessionClose {
                                local_session_id: self.local_session_id,
                                session,
                            },
                        );
                    }
                }
                SessionState::Mem => {
                    if let Some(session) = info.session() {
                        emit(
                            &self.events,
                            Event::SessionClose {
                                local_session_id: self.local_session_id,
                                session,
                            },
                        );
                    }
                }
                _ => {}
            }
        }
        self.peers.clear();

        if !self.is_closed {
            emit(
                &self.events,
                Event::WorldLeave {
                    local_session_id: self.local_session_id,
                },
            );
            self.is_closed = true;
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// CLEARING
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    // The one procedure every call site uses to abandon a session while
    // keeping the connection (or the record's absence) coherent.
    fn clear_peer_state(&mut self, peer_hash: &str) {
        let Some(info) = self.peers.get_mut(peer_hash) else {
            return;
        };

        match info.state {
            SessionState::DcJt | SessionState::DcJni => {
                self.peers.remove(peer_hash);
            }
            SessionState::Cc => {
                info.revert_connected();
            }
            SessionState::Jt => {
                if let Some(peer) = &info.peer {
                    note_send(
                        peer.try_send_rst(self.local_session_id, info.peer_session_id),
                        "RST",
                        peer_hash,
                    );
                }
                emit(
                    &self.events,
                    Event::JoinFail {
                        local_session_id: self.local_session_id,
                        code: codes::INVALID_STATES,
                        message: codes::MSG_INVALID_STATES.to_string(),
                    },
                );
                info.revert_connected();
            }
            SessionState::Jn => {
                if let Some(peer) = &info.peer {
                    note_send(
                        peer.try_send_jdn(info.peer_session_id, codes::INVALID_STATES, codes::MSG_INVALID_STATES),
                        "JDN",
                        peer_hash,
                    );
                }
                info.revert_connected();
            }
            SessionState::Mem => {
                if let Some(session) = info.session() {
                    emit(
                        &self.events,
                        Event::SessionClose {
                            local_session_id: self.local_session_id,
                            session,
                        },
                    );
                }
                if let Some(peer) = &info.peer {
                    note_send(
                        peer.try_send_rst(self.local_session_id, info.peer_session_id),
                        "RST",
                        peer_hash,
                    );
                }
                info.revert_connected();
            }
            SessionState::RmemNjni | SessionState::Jni | SessionState::Rmem | SessionState::Tmem => {
                if let Some(peer) = &info.peer {
                    note_send(
                        peer.try_send_rst(self.local_session_id, info.peer_session_id),
                        "RST",
                        peer_hash,
                    );
                }
                info.revert_connected();
            }
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// CONTROL MESSAGES
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    pub(crate) fn jn(&mut self, session: PeerSession, timestamp: Timestamp) {
        let peer_hash = session.peer.id_hash().to_string();

        // A reset deletes the record outright, so a connected peer may show
        // up here without one; re-admit it first.
        if !self.peers.contains_key(&peer_hash) {
            self.peers
                .insert(peer_hash.clone(), PeerSessionState::connected(session.peer.clone()));
        }

        let Some((state, stored_ts)) = self.peers.get(&peer_hash).map(|info| (info.state, info.timestamp)) else {
            return;
        };

        match state {
            SessionState::Cc => {
                // A cleared record keeps its timestamp, so a replayed join
                // for the abandoned session still reads as a duplicate.
                if timestamp > stored_ts {
                    self.enter_jn(&peer_hash, session, timestamp);
                } else {
                    note_send(
                        session
                            .peer
                            .try_send_jdn(session.peer_session_id, codes::DUPLICATE, codes::MSG_DUPLICATE),
                        "JDN",
                        &peer_hash,
                    );
                }
            }
            SessionState::Jt => {
                // The local host is itself joining through this peer; never
                // reveal a world before it is accepted.
                note_send(
                    session
                        .peer
                        .try_send_jdn(session.peer_session_id, codes::INVALID_STATES, codes::MSG_INVALID_STATES),
                    "JDN",
                    &peer_hash,
                );
            }
            SessionState::Jn
            | SessionState::RmemNjni
            | SessionState::Jni
            | SessionState::Rmem
            | SessionState::Tmem
            | SessionState::Mem => {
                if timestamp > stored_ts {
                    self.clear_peer_state(&peer_hash);
                    self.enter_jn(&peer_hash, session, timestamp);
                } else {
                    note_send(
                        session
                            .peer
                            .try_send_jdn(session.peer_session_id, codes::DUPLICATE, codes::MSG_DUPLICATE),
                        "JDN",
                        &peer_hash,
                    );
                }
            }
            SessionState::DcJt | SessionState::DcJni => {
                fault(&self.events, "join request from a disconnected peer");
            }
        }
    }

    fn enter_jn(&mut self, peer_hash: &str, session: PeerSession, timestamp: Timestamp) {
        let Some(info) = self.peers.get_mut(peer_hash) else {
            return;
        };
        info.peer_session_id = session.peer_session_id;
        info.timestamp = timestamp;
        info.state = SessionState::Jn;
        emit(
            &self.events,
            Event::SessionRequest {
                local_session_id: self.local_session_id,
                session,
            },
        );
    }

    pub(crate) fn jok(
        &mut self,
        session: PeerSession,
        world_url: &str,
        timestamp: Timestamp,
        neighbors: Vec<FullPeerSessionIdentity>,
    ) {
        let peer_hash = session.peer.id_hash().to_string();

        let accepted = self.join_hash == peer_hash
            && self
                .peers
                .get(&peer_hash)
                .map_or(false, |info| info.state == SessionState::Jt && timestamp > info.timestamp);
        if !accepted {
            note_send(
                session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                "RST",
                &peer_hash,
            );
            return;
        }

        if let Some(info) = self.peers.get_mut(&peer_hash) {
            info.peer_session_id = session.peer_session_id;
            info.timestamp = timestamp;
            info.state = SessionState::Rmem;
            // Everyone in the member list already knows this peer.
            info.sjn_suppressed = true;
        }
        self.world_url = world_url.to_string();

        emit(
            &self.events,
            Event::JoinSuccess {
                local_session_id: self.local_session_id,
                world_url: world_url.to_string(),
            },
        );
        emit(
            &self.events,
            Event::SessionRequest {
                local_session_id: self.local_session_id,
                session,
            },
        );

        for neighbor in neighbors {
            self.jni_mems(&peer_hash, neighbor);
        }

        emit(
            &self.events,
            Event::TimerRequest {
                local_session_id: self.local_session_id,
                delay_ms: self.config.initial_timer_ms,
            },
        );
    }

    pub(crate) fn jdn(&mut self, peer: &Arc<dyn AndPeer>, code: i32, message: &str) {
        let peer_hash = peer.id_hash();

        if self.join_hash != peer_hash {
            log::debug!("join decline from non-target {} ignored", peer_hash);
            return;
        }
        let Some(info) = self.peers.get_mut(peer_hash) else {
            return;
        };
        if info.state != SessionState::Jt {
            log::debug!("join decline outside the join handshake ignored");
            return;
        }

        // The join attempt is concluded; the connection stays usable.
        info.revert_connected();
        emit(
            &self.events,
            Event::JoinFail {
                local_session_id: self.local_session_id,
                code,
                message: message.to_string(),
            },
        );
    }

    pub(crate) fn jni(&mut self, session: PeerSession, neighbor: FullPeerSessionIdentity) {
        let peer_hash = session.peer.id_hash().to_string();

        let Some((state, stored_psid)) = self
            .peers
            .get(&peer_hash)
            .map(|info| (info.state, info.peer_session_id))
        else {
            log::debug!("neighbor info from unknown peer {} dropped", peer_hash);
            return;
        };
        if state != SessionState::Mem || stored_psid != session.peer_session_id {
            // Neighbor info is a member-only privilege.
            note_send(
                session.peer.try_send_rst(self.local_session_id, Uuid::nil()),
                "RST",
                &peer_hash,
            );
            self.clear_peer_state(&peer_hash);
            return;
        }

        self.jni_mems(&peer_hash, neighbor);
    }

    fn jni_mems(&mut self, sender_hash: &str, mem_info: FullPeerSessionIdentity) {
        let peer_hash = mem_info.aurl.hash().to_string();
        if peer_hash == self.local_hash {
            return;
        }

        let Some((state, stored_psid, stored_ts)) = self
            .peers
            .get(&peer_hash)
            .map(|info| (info.state, info.peer_session_id, info.timestamp))
        else {
            // Entirely new member: have the host register and dial it.
            self.peers.insert(
                peer_hash,
                PeerSessionState::advertised(mem_info.session_id, mem_info.timestamp),
            );
            emit(
                &self.events,
                Event::PeerRegister {
                    root_certificate_der: mem_info.root_certificate_der,
                    handshake_key_certificate_der: mem_info.handshake_key_certificate_der,
                },
            );
            emit(&self.events, Event::ConnectRequest { aurl: mem_info.aurl });
            return;
        };

        match state {
            SessionState::DcJt | SessionState::Jt => {
                // The join in flight wins over gossip about its target.
                log::debug!("neighbor info from {} for the join target dropped", sender_hash);
            }
            SessionState::DcJni => {
                if mem_info.timestamp > stored_ts {
                    if let Some(info) = self.peers.get_mut(&peer_hash) {
                        info.peer_session_id = mem_info.session_id;
                        info.timestamp = mem_info.timestamp;
                    }
                }
            }
            SessionState::Cc => {
                if mem_info.timestamp > stored_ts {
                    self.enter_jni(&peer_hash, mem_info.session_id, mem_info.timestamp);
                } else {
                    log::debug!("stale neighbor info from {} dropped", sender_hash);
                }
            }
            SessionState::Jn
            | SessionState::RmemNjni
            | SessionState::Jni
            | SessionState::Rmem
            | SessionState::Tmem
            | SessionState::Mem => {
                if stored_psid == mem_info.session_id {
                    if state == SessionState::RmemNjni {
                        let Some(info) = self.peers.get_mut(&peer_hash) else {
                            return;
                        };
                        info.state = SessionState::Rmem;
                        if let Some(session) = info.session() {
                            emit(
                                &self.events,
                                Event::SessionRequest {
                                    local_session_id: self.local_session_id,
                                    session,
                                },
                            );
                        }
                    }
                    // Otherwise the session is already known; nothing to learn.
                } else if mem_info.timestamp > stored_ts {
                    self.clear_peer_state(&peer_hash);
                    self.enter_jni(&peer_hash, mem_info.session_id, mem_info.timestamp);
                } else {
                    log::debug!("stale neighbor info from {} dropped", sender_hash);
                }
            }
        }
    }

    fn enter_jni(&mut self, peer_hash: &str, session_id: Uuid, timestamp: Timestamp) {
        let Some(info) = self.peers.get_mut(peer_hash) else {
            return;
        };
        info.peer_session_id = session_id;
        info.timestamp = timestamp;
        info.state = SessionState::Jni;
        if let Some(session) = info.session() {
            emit(
                &self.events,
                Event::SessionRequest {
                    local_session_id: self.local_session_id,
                    session,
                },
            );
        }
    }

    pub(crate) fn mem(&mut self, session: PeerSession, timestamp: Timestamp) {
        let peer_hash = session.peer.id_hash().to_string();

        let Some((state, stored_psid, stored_ts)) = self
            .peers
            .get(&peer_hash)
            .map(|info| (info.state, info.peer_session_id, info.timestamp))
        else {
            log::debug!("membership confirm from unknown peer {} dropped", peer_hash);
            return;
        };

        match state {
            SessionState::Cc => {
                if timestamp > stored_ts {
                    self.enter_rmem_njni(&peer_hash, session.peer_session_id, timestamp);
                } else {
                    note_send(
                        session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                        "RST",
                        &peer_hash,
                    );
                }
            }
            SessionState::Jni => {
                if stored_psid == session.peer_session_id {
                    if let Some(info) = self.peers.get_mut(&peer_hash) {
                        info.state = SessionState::Rmem;
                    }
                } else if timestamp > stored_ts {
                    self.clear_peer_state(&peer_hash);
                    self.enter_rmem_njni(&peer_hash, session.peer_session_id, timestamp);
                } else {
                    note_send(
                        session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                        "RST",
                        &peer_hash,
                    );
                }
            }
            SessionState::Tmem => {
                if stored_psid == session.peer_session_id {
                    let Some(info) = self.peers.get_mut(&peer_hash) else {
                        return;
                    };
                    info.state = SessionState::Mem;
                    info.session_established_at = Some(Instant::now());
                    if let Some(session) = info.session() {
                        emit(
                            &self.events,
                            Event::SessionReady {
                                local_session_id: self.local_session_id,
                                session,
                            },
                        );
                    }
                } else if timestamp > stored_ts {
                    self.clear_peer_state(&peer_hash);
                    self.enter_rmem_njni(&peer_hash, session.peer_session_id, timestamp);
                } else {
                    note_send(
                        session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                        "RST",
                        &peer_hash,
                    );
                }
            }
            SessionState::RmemNjni | SessionState::Rmem | SessionState::Mem => {
                if stored_psid != session.peer_session_id && timestamp > stored_ts {
                    self.clear_peer_state(&peer_hash);
                    self.enter_rmem_njni(&peer_hash, session.peer_session_id, timestamp);
                } else {
                    // Duplicate or stale confirm: both sides' view of the
                    // session is suspect, reset it.
                    self.clear_peer_state(&peer_hash);
                    if stored_psid != session.peer_session_id {
                        note_send(
                            session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                            "RST",
                            &peer_hash,
                        );
                    }
                }
            }
            SessionState::Jt | SessionState::Jn => {
                log::debug!("membership confirm during the join handshake dropped");
            }
            SessionState::DcJt | SessionState::DcJni => {
                fault(&self.events, "membership confirm from a disconnected peer");
            }
        }
    }

    fn enter_rmem_njni(&mut self, peer_hash: &str, session_id: Uuid, timestamp: Timestamp) {
        let Some(info) = self.peers.get_mut(peer_hash) else {
            return;
        };
        info.peer_session_id = session_id;
        info.timestamp = timestamp;
        info.state = SessionState::RmemNjni;
    }

    pub(crate) fn rst(&mut self, session: PeerSession) {
        let peer_hash = session.peer.id_hash().to_string();

        let Some((state, stored_psid)) = self
            .peers
            .get(&peer_hash)
            .map(|info| (info.state, info.peer_session_id))
        else {
            return;
        };

        // A reset naming a concrete session only applies to that session.
        if !session.peer_session_id.is_nil() && !stored_psid.is_nil() && stored_psid != session.peer_session_id {
            log::debug!("stale reset from {} dropped", peer_hash);
            return;
        }

        let stored_session = self.peers.get(&peer_hash).and_then(|info| info.session());
        match state {
            SessionState::Jt | SessionState::DcJt => {
                emit(
                    &self.events,
                    Event::JoinFail {
                        local_session_id: self.local_session_id,
                        code: codes::CANCELED,
                        message: codes::MSG_CANCELED.to_string(),
                    },
                );
            }
            SessionState::Tmem => {
                if let Some(stored_session) = stored_session {
                    emit(
                        &self.events,
                        Event::SessionReady {
                            local_session_id: self.local_session_id,
                            session: stored_session.clone(),
                        },
                    );
                    emit(
                        &self.events,
                        Event::SessionClose {
                            local_session_id: self.local_session_id,
                            session: stored_session,
                        },
                    );
                }
            }
            SessionState::Mem => {
                if let Some(stored_session) = stored_session {
                    emit(
                        &self.events,
                        Event::SessionClose {
                            local_session_id: self.local_session_id,
                            session: stored_session,
                        },
                    );
                }
            }
            _ => {}
        }

        self.peers.remove(&peer_hash);
    }

    pub(crate) fn soa(&mut self, session: PeerSession, objects: Vec<ObjectInfo>) {
        if !self.object_sync_allowed(&session) {
            return;
        }
        emit(
            &self.events,
            Event::ObjectAppend {
                local_session_id: self.local_session_id,
                session,
                objects,
            },
        );
    }

    pub(crate) fn sod(&mut self, session: PeerSession, object_ids: Vec<Uuid>) {
        if !self.object_sync_allowed(&session) {
            return;
        }
        emit(
            &self.events,
            Event::ObjectDelete {
                local_session_id: self.local_session_id,
                session,
                object_ids,
            },
        );
    }

    // Object sync is valid on established sessions only.
    fn object_sync_allowed(&mut self, session: &PeerSession) -> bool {
        let peer_hash = session.peer.id_hash();

        let Some(info) = self.peers.get(peer_hash) else {
            log::debug!("object sync from unknown peer {} dropped", peer_hash);
            return false;
        };
        if info.peer_session_id != session.peer_session_id {
            note_send(
                session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                "RST",
                peer_hash,
            );
            return false;
        }
        if info.state != SessionState::Mem {
            log::debug!("object sync on unestablished session with {} dropped", peer_hash);
            return false;
        }
        true
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// GOSSIP
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    pub(crate) fn sjn(&mut self, session: PeerSession, members: Vec<PeerSessionIdentity>) {
        if !self.gossip_allowed(&session) {
            return;
        }
        for mem_info in members {
            self.sjn_mems(&session, mem_info);
        }
    }

    fn sjn_mems(&mut self, origin: &PeerSession, mem_info: PeerSessionIdentity) {
        if mem_info.peer_hash == self.local_hash {
            return;
        }

        let Some(info) = self.peers.get_mut(&mem_info.peer_hash) else {
            // Never heard of it: ask the gossiper for a direct referral.
            note_send(
                origin
                    .peer
                    .try_send_crr(self.local_session_id, origin.peer_session_id, std::slice::from_ref(&mem_info)),
                "CRR",
                origin.peer.id_hash(),
            );
            return;
        };

        if info.peer_session_id.is_nil() {
            // Connected but without any session information: ask for a
            // direct referral so both sides can introduce themselves.
            note_send(
                origin
                    .peer
                    .try_send_crr(self.local_session_id, origin.peer_session_id, std::slice::from_ref(&mem_info)),
                "CRR",
                origin.peer.id_hash(),
            );
            return;
        }
        if info.peer_session_id != mem_info.session_id {
            // Stale gossip about a session long replaced.
            return;
        }

        if info.state == SessionState::Mem {
            // Gossip about a confirmed member: one more report heard.
            info.sjn_rx_count += 1;
        } else {
            note_send(
                origin
                    .peer
                    .try_send_crr(self.local_session_id, origin.peer_session_id, std::slice::from_ref(&mem_info)),
                "CRR",
                origin.peer.id_hash(),
            );
        }
    }

    pub(crate) fn crr(&mut self, session: PeerSession, members: Vec<PeerSessionIdentity>) {
        if !self.gossip_allowed(&session) {
            return;
        }
        let origin_timestamp = self
            .peers
            .get(session.peer.id_hash())
            .map(|info| info.timestamp)
            .unwrap_or_default();
        for mem_info in members {
            self.crr_mems(&session, origin_timestamp, mem_info);
        }
    }

    fn crr_mems(&mut self, origin: &PeerSession, origin_timestamp: Timestamp, mem_info: PeerSessionIdentity) {
        if mem_info.peer_hash == self.local_hash {
            return;
        }

        let Some(info) = self.peers.get(&mem_info.peer_hash) else {
            log::debug!("referral request for unknown peer {} dropped", mem_info.peer_hash);
            return;
        };
        if info.peer_session_id != mem_info.session_id || info.state != SessionState::Mem {
            log::debug!("referral request for {} dropped", mem_info.peer_hash);
            return;
        }
        let Some(member) = info.peer.clone() else {
            return;
        };

        // Introduce both sides to each other.
        let member_identity = full_identity_of(&member, info.peer_session_id, info.timestamp);
        let origin_identity = full_identity_of(&origin.peer, origin.peer_session_id, origin_timestamp);
        note_send(
            origin
                .peer
                .try_send_jni(self.local_session_id, origin.peer_session_id, &member_identity),
            "JNI",
            origin.peer.id_hash(),
        );
        note_send(
            member.try_send_jni(self.local_session_id, mem_info.session_id, &origin_identity),
            "JNI",
            member.id_hash(),
        );
    }

    // Gossip frames are valid on established sessions only; a known sender
    // in any other state is answered with a reset.
    fn gossip_allowed(&mut self, session: &PeerSession) -> bool {
        let peer_hash = session.peer.id_hash();

        let Some(info) = self.peers.get(peer_hash) else {
            log::debug!("gossip from unknown peer {} dropped", peer_hash);
            return false;
        };

        let allowed = info.state == SessionState::Mem && info.peer_session_id == session.peer_session_id;
        if !allowed {
            note_send(
                session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                "RST",
                peer_hash,
            );
        }
        allowed
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// API CALLS
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    pub(crate) fn accept_session(&mut self, session: PeerSession) {
        let peer_hash = session.peer.id_hash().to_string();

        let Some((state, stored_psid, stored_ts)) = self
            .peers
            .get(&peer_hash)
            .map(|info| (info.state, info.peer_session_id, info.timestamp))
        else {
            log::debug!("accept for unknown peer {} ignored", peer_hash);
            return;
        };
        if stored_psid != session.peer_session_id {
            note_send(
                session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                "RST",
                &peer_hash,
            );
            return;
        }

        match state {
            SessionState::Jn => {
                // Tell every member about the joiner, then the joiner about
                // every member.
                let joiner_identity = full_identity_of(&session.peer, session.peer_session_id, stored_ts);
                let mut member_infos = Vec::new();
                for info in self.peers.values() {
                    if info.state != SessionState::Mem {
                        continue;
                    }
                    let Some(member) = &info.peer else {
                        continue;
                    };
                    note_send(
                        member.try_send_jni(self.local_session_id, info.peer_session_id, &joiner_identity),
                        "JNI",
                        member.id_hash(),
                    );
                    member_infos.push(full_identity_of(member, info.peer_session_id, info.timestamp));
                }
                note_send(
                    session.peer.try_send_jok(
                        self.local_session_id,
                        session.peer_session_id,
                        &self.world_url,
                        self.creation_timestamp,
                        &member_infos,
                    ),
                    "JOK",
                    &peer_hash,
                );
                if let Some(info) = self.peers.get_mut(&peer_hash) {
                    info.state = SessionState::Tmem;
                }
            }
            SessionState::Jni => {
                note_send(
                    session
                        .peer
                        .try_send_mem(self.local_session_id, session.peer_session_id, self.creation_timestamp),
                    "MEM",
                    &peer_hash,
                );
                if let Some(info) = self.peers.get_mut(&peer_hash) {
                    info.state = SessionState::Tmem;
                }
            }
            SessionState::Rmem => {
                note_send(
                    session
                        .peer
                        .try_send_mem(self.local_session_id, session.peer_session_id, self.creation_timestamp),
                    "MEM",
                    &peer_hash,
                );
                if let Some(info) = self.peers.get_mut(&peer_hash) {
                    info.state = SessionState::Mem;
                    info.session_established_at = Some(Instant::now());
                }
                emit(
                    &self.events,
                    Event::SessionReady {
                        local_session_id: self.local_session_id,
                        session,
                    },
                );
            }
            _ => log::debug!("accept for {} in an undecidable state ignored", peer_hash),
        }
    }

    pub(crate) fn decline_session(&mut self, session: PeerSession, _code: i32, _message: &str) {
        let peer_hash = session.peer.id_hash().to_string();

        let Some(stored_psid) = self.peers.get(&peer_hash).map(|info| info.peer_session_id) else {
            log::debug!("decline for unknown peer {} ignored", peer_hash);
            return;
        };
        if stored_psid != session.peer_session_id {
            note_send(
                session.peer.try_send_rst(self.local_session_id, session.peer_session_id),
                "RST",
                &peer_hash,
            );
            return;
        }

        // The record is left as is; the requesting side times out or resets.
        log::debug!("decline for {} recorded, no action taken", peer_hash);
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// TIMER
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    pub(crate) fn timer_expire(&mut self) {
        let min_age = Duration::from_millis(self.config.sjn_min_age_ms);

        // Advertise established members that are neither suppressed nor
        // already well-known; popular peers accumulate reports and stop being
        // advertised, so gossip is self-throttling.
        let mut sjn_candidates = Vec::new();
        for (peer_hash, info) in self.peers.iter_mut() {
            if info.state != SessionState::Mem {
                continue;
            }
            let Some(established_at) = info.session_established_at else {
                continue;
            };
            if established_at.elapsed() < min_age || info.sjn_suppressed || info.sjn_rx_count > self.config.sjn_rx_limit
            {
                continue;
            }

            sjn_candidates.push(PeerSessionIdentity {
                peer_hash: peer_hash.clone(),
                session_id: info.peer_session_id,
                timestamp: info.timestamp,
            });
            info.sjn_rx_count += 1;
        }

        let mut member_count: u64 = 0;
        for info in self.peers.values() {
            if info.state != SessionState::Mem {
                continue;
            }
            member_count += 1;
            if sjn_candidates.is_empty() {
                continue;
            }
            if let Some(peer) = &info.peer {
                note_send(
                    peer.try_send_sjn(self.local_session_id, info.peer_session_id, &sjn_candidates),
                    "SJN",
                    peer.id_hash(),
                );
            }
        }

        if !self.is_closed {
            let base = self.config.timer_base_ms;
            let delay_ms = rand::thread_rng().gen_range(base..=base * (member_count + 1));
            emit(
                &self.events,
                Event::TimerRequest {
                    local_session_id: self.local_session_id,
                    delay_ms,
                },
            );
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////
// SANITY
///////////////////////////////////////////////////////////////////////////////////////////////////////////

impl World {
    #[cfg(debug_assertions)]
    pub(crate) fn check_sanity(&self) {
        let mut join_target_count = 0;
        for (peer_hash, info) in &self.peers {
            assert!(
                peer_hash != &self.local_hash,
                "and sanity check failed: loopback connection"
            );

            match info.state {
                SessionState::DcJt | SessionState::DcJni => assert!(
                    info.peer.is_none(),
                    "and sanity check failed: disconnected state with a live handle"
                ),
                _ => assert!(
                    info.peer.is_some(),
                    "and sanity check failed: connected state without a handle"
                ),
            }

            match info.state {
                SessionState::DcJt | SessionState::Jt => {
                    assert!(
                        peer_hash == &self.join_hash,
                        "and sanity check failed: join target mismatch"
                    );
                    join_target_count += 1;
                }
                _ => {}
            }

            match info.state {
                SessionState::DcJt | SessionState::Cc | SessionState::Jt => assert!(
                    info.peer_session_id.is_nil(),
                    "and sanity check failed: unexpected peer session id"
                ),
                _ => assert!(
                    !info.peer_session_id.is_nil(),
                    "and sanity check failed: missing peer session id"
                ),
            }
        }

        if self.join_hash.is_empty() {
            assert!(join_target_count == 0, "and sanity check failed: both join and open");
        }
        assert!(
            join_target_count <= 1,
            "and sanity check failed: multiple join targets"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_chan;

    #[derive(Debug)]
    struct NullPeer {
        hash: String,
    }

    impl AndPeer for NullPeer {
        fn id_hash(&self) -> &str {
            &self.hash
        }
        fn aurl(&self) -> Aurl {
            format!("abyss:{}", self.hash).parse().unwrap()
        }
        fn root_certificate_der(&self) -> Vec<u8> {
            Vec::new()
        }
        fn handshake_key_certificate_der(&self) -> Vec<u8> {
            Vec::new()
        }
        fn try_send_jn(&self, _: Uuid, _: &str, _: Timestamp) -> bool {
            true
        }
        fn try_send_jok(&self, _: Uuid, _: Uuid, _: &str, _: Timestamp, _: &[FullPeerSessionIdentity]) -> bool {
            true
        }
        fn try_send_jdn(&self, _: Uuid, _: i32, _: &str) -> bool {
            true
        }
        fn try_send_jni(&self, _: Uuid, _: Uuid, _: &FullPeerSessionIdentity) -> bool {
            true
        }
        fn try_send_mem(&self, _: Uuid, _: Uuid, _: Timestamp) -> bool {
            true
        }
        fn try_send_sjn(&self, _: Uuid, _: Uuid, _: &[PeerSessionIdentity]) -> bool {
            true
        }
        fn try_send_crr(&self, _: Uuid, _: Uuid, _: &[PeerSessionIdentity]) -> bool {
            true
        }
        fn try_send_rst(&self, _: Uuid, _: Uuid) -> bool {
            true
        }
        fn try_send_soa(&self, _: Uuid, _: Uuid, _: &[ObjectInfo]) -> bool {
            true
        }
        fn try_send_sod(&self, _: Uuid, _: Uuid, _: &[Uuid]) -> bool {
            true
        }
    }

    fn null_peer(hash: &str) -> Arc<dyn AndPeer> {
        Arc::new(NullPeer { hash: hash.to_string() })
    }

    #[test]
    fn opened_world_has_no_join_target() {
        let (tx, _rx) = event_chan();
        let mut connected: HashMap<String, Arc<dyn AndPeer>> = HashMap::new();
        connected.insert("b".to_string(), null_peer("b"));

        let world = World::new_open(
            "a".to_string(),
            Uuid::new_v4(),
            "abyss:a/home".to_string(),
            &connected,
            tx,
            AndConfig::default(),
        );

        assert!(world.join_hash.is_empty());
        assert!(world.join_path.is_empty());
        world.check_sanity();
    }

    #[test]
    fn joining_world_tracks_exactly_one_target() {
        let (tx, _rx) = event_chan();
        let mut connected: HashMap<String, Arc<dyn AndPeer>> = HashMap::new();
        connected.insert("b".to_string(), null_peer("b"));
        connected.insert("c".to_string(), null_peer("c"));

        let world = World::new_join(
            "a".to_string(),
            Uuid::new_v4(),
            &"abyss:b/home".parse().unwrap(),
            &connected,
            tx,
            AndConfig::default(),
        );

        assert_eq!("b", world.join_hash);
        assert_eq!("/home", world.join_path);
        assert_eq!(SessionState::Jt, world.peers["b"].state);
        assert_eq!(SessionState::Cc, world.peers["c"].state);
        world.check_sanity();
    }

    #[test]
    fn unconnected_join_target_requests_connect() {
        let (tx, mut rx) = event_chan();
        let connected = HashMap::new();

        let world = World::new_join(
            "a".to_string(),
            Uuid::new_v4(),
            &"abyss:b:9.8.7.6:1605/home".parse().unwrap(),
            &connected,
            tx,
            AndConfig::default(),
        );

        assert_eq!(SessionState::DcJt, world.peers["b"].state);
        assert!(matches!(rx.try_recv().unwrap(), Event::ConnectRequest { aurl } if aurl.hash() == "b"));
        world.check_sanity();
    }

    #[test]
    fn clearing_discipline_per_state() {
        let (tx, mut rx) = event_chan();
        let lsid = Uuid::new_v4();
        let mut connected: HashMap<String, Arc<dyn AndPeer>> = HashMap::new();
        connected.insert("b".to_string(), null_peer("b"));
        let mut world = World::new_open("a".to_string(), lsid, "abyss:a/home".to_string(), &connected, tx, AndConfig::default());
        while rx.try_recv().is_ok() {}

        // Cc: session info zeroed, record kept.
        world.clear_peer_state("b");
        assert_eq!(SessionState::Cc, world.peers["b"].state);

        // Mem: close event, then back to Cc.
        {
            let info = world.peers.get_mut("b").unwrap();
            info.peer_session_id = Uuid::new_v4();
            info.state = SessionState::Mem;
        }
        world.clear_peer_state("b");
        assert!(matches!(rx.try_recv().unwrap(), Event::SessionClose { .. }));
        assert_eq!(SessionState::Cc, world.peers["b"].state);
        assert!(world.peers["b"].peer_session_id.is_nil());

        // DcJni: record deleted.
        world
            .peers
            .insert("c".to_string(), PeerSessionState::advertised(Uuid::new_v4(), 1));
        world.clear_peer_state("c");
        assert!(!world.peers.contains_key("c"));

        world.check_sanity();
    }

    #[test]
    fn duplicate_join_is_declined() {
        let (tx, mut rx) = event_chan();
        let lsid = Uuid::new_v4();
        let peer = null_peer("b");
        let mut connected: HashMap<String, Arc<dyn AndPeer>> = HashMap::new();
        connected.insert("b".to_string(), peer.clone());
        let mut world = World::new_open("a".to_string(), lsid, "abyss:a/home".to_string(), &connected, tx, AndConfig::default());
        while rx.try_recv().is_ok() {}

        let psid = Uuid::new_v4();
        world.jn(PeerSession::new(peer.clone(), psid), 10);
        assert!(matches!(rx.try_recv().unwrap(), Event::SessionRequest { .. }));
        assert_eq!(SessionState::Jn, world.peers["b"].state);

        // Same timestamp again: declined as a duplicate, state unchanged.
        world.jn(PeerSession::new(peer.clone(), Uuid::new_v4()), 10);
        assert_eq!(SessionState::Jn, world.peers["b"].state);
        assert_eq!(psid, world.peers["b"].peer_session_id);

        // Strictly newer: the old session is cleared and replaced.
        let newer = Uuid::new_v4();
        world.jn(PeerSession::new(peer, newer), 11);
        assert!(matches!(rx.try_recv().unwrap(), Event::SessionRequest { .. }));
        assert_eq!(newer, world.peers["b"].peer_session_id);
        assert_eq!(11, world.peers["b"].timestamp);

        world.check_sanity();
    }

    #[test]
    fn reset_is_idempotent() {
        let (tx, mut rx) = event_chan();
        let lsid = Uuid::new_v4();
        let peer = null_peer("b");
        let mut connected: HashMap<String, Arc<dyn AndPeer>> = HashMap::new();
        connected.insert("b".to_string(), peer.clone());
        let mut world = World::new_open("a".to_string(), lsid, "abyss:a/home".to_string(), &connected, tx, AndConfig::default());
        while rx.try_recv().is_ok() {}

        let psid = Uuid::new_v4();
        {
            let info = world.peers.get_mut("b").unwrap();
            info.peer_session_id = psid;
            info.state = SessionState::Mem;
        }

        world.rst(PeerSession::new(peer.clone(), psid));
        assert!(matches!(rx.try_recv().unwrap(), Event::SessionClose { .. }));
        assert!(!world.peers.contains_key("b"));

        // Applying the same reset again changes nothing and emits nothing.
        world.rst(PeerSession::new(peer, psid));
        assert!(rx.try_recv().is_err());
        assert!(!world.peers.contains_key("b"));

        world.check_sanity();
    }

    #[test]
    fn stale_gossip_is_dropped() {
        let (tx, mut rx) = event_chan();
        let lsid = Uuid::new_v4();
        let member = null_peer("b");
        let mut connected: HashMap<String, Arc<dyn AndPeer>> = HashMap::new();
        connected.insert("b".to_string(), member.clone());
        connected.insert("c".to_string(), null_peer("c"));
        let mut world = World::new_open("a".to_string(), lsid, "abyss:a/home".to_string(), &connected, tx, AndConfig::default());
        while rx.try_recv().is_ok() {}

        let current_psid = Uuid::new_v4();
        let gossiper_psid = Uuid::new_v4();
        {
            let info = world.peers.get_mut("b").unwrap();
            info.peer_session_id = gossiper_psid;
            info.state = SessionState::Mem;
        }
        {
            let info = world.peers.get_mut("c").unwrap();
            info.peer_session_id = current_psid;
            info.timestamp = 20;
            info.state = SessionState::Mem;
        }

        // Gossip naming an outdated session id for c neither counts nor
        // triggers a referral.
        world.sjn(
            PeerSession::new(member, gossiper_psid),
            vec![PeerSessionIdentity {
                peer_hash: "c".to_string(),
                session_id: Uuid::new_v4(),
                timestamp: 10,
            }],
        );
        assert_eq!(0, world.peers["c"].sjn_rx_count);
        assert!(rx.try_recv().is_err());

        world.check_sanity();
    }
}
