//! # survcom-core
//!
//! Shared library for the Survival Communicator node mesh: domain entities
//! and the wire formats spoken between nodes and clients.
//!
//! This crate is used by the node server and by its tests.  It has no
//! dependencies on sockets, databases, or async runtimes.
//!
//! # Architecture overview
//!
//! Independent server instances ("nodes") on one LAN find each other by UDP
//! broadcast, reconcile a shared directory of user identities over HTTP, and
//! relay opaque end-to-end-encrypted payloads between connected users.
//!
//! - **`domain`** – `Node` (a discovered peer) and `UserRecord` (a directory
//!   entry), plus the merge policies that decide which copy wins.
//! - **`protocol`** – the JSON announce datagram, the sync pull/push bodies,
//!   and the base64 relay envelope.
//! - **`clock`** – millisecond wall-clock timestamps used on the wire.

pub mod clock;
pub mod domain;
pub mod protocol;

pub use clock::now_millis;
pub use domain::node::{Node, NodeId};
pub use domain::user::{generate_user_id, RecordError, UserRecord};
pub use protocol::announce::{decode_datagram, encode_datagram, AnnounceMessage, DiscoveryMessage};
pub use protocol::envelope::{encode_envelope, parse_recipient, EnvelopeError};
pub use protocol::sync::{
    Lenient, PulledUser, PushedUser, SyncPullResponse, SyncPushRequest, SyncPushResponse, SYNC_PATH,
};
pub use protocol::ProtocolError;
