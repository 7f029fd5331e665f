// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A system that lets a host coordinate membership of peer-to-peer worlds
//! (shared sessions) over an existing connection substrate.
//!
//! The host feeds a [`NeighborDiscovery`] instance three kinds of input:
//! API calls (open/join/accept/decline/close a world), peer lifecycle
//! notifications from the transport, and inbound control frames decoded into
//! [`AhmpFrame`]. The instance mutates its per-world membership state under
//! one lock, answers through fallible sends on the [`AndPeer`] handles, and
//! reports everything observable through a bounded [`Event`] channel which
//! the host must keep draining.
//!
//! ## Example
//!
//! ```no_run
//! use abyss_and::{AndConfig, Event, NeighborDiscovery};
//! use uuid::Uuid;
//!
//! let (and, mut events) = NeighborDiscovery::new("local-hash", AndConfig::default());
//!
//! // Serve a world under a path; peers join it with `abyss:local-hash/home`.
//! let home = Uuid::new_v4();
//! and.open_world(home, "abyss:local-hash/home").unwrap();
//!
//! // Keep draining events: timer requests, connect requests, session
//! // decisions and so on.
//! while let Some(event) = events.blocking_recv() {
//!     match event {
//!         Event::TimerRequest { local_session_id, delay_ms } => {
//!             // schedule a one-shot timer, then call and.timer_expire(local_session_id)
//!         }
//!         Event::SessionRequest { local_session_id, session } => {
//!             and.accept_session(local_session_id, session);
//!         }
//!         _ => {}
//!     }
//! }
//! ```

#![deny(missing_docs)]

mod time;
mod world;

pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod messages;
pub mod peer;
pub mod resolver;

pub use abyss_aurl::{Aurl, AurlParseError, Scheme};
pub use config::AndConfig;
pub use discovery::NeighborDiscovery;
pub use error::Error;
pub use event::{Event, EventRx};
pub use messages::{codes, AhmpFrame, FullPeerSessionIdentity, ObjectInfo, PeerSessionIdentity};
pub use peer::{AndPeer, PeerSession};
pub use resolver::{PathResolver, SimplePathResolver};
