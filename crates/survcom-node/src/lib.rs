//! Survival Communicator node library.
//!
//! A node is a self-contained backend for a LAN messaging network:
//!
//! - it finds its peers by UDP broadcast ([`infrastructure::network::discovery`]),
//! - it replicates the user directory with them over HTTP
//!   ([`application::sync_directory`]),
//! - it relays opaque end-to-end encrypted envelopes between the clients
//!   connected to it ([`application::relay`]).
//!
//! The `survcom-node` binary wires these together; the library split exists
//! so integration tests can drive each piece directly.
//!
//! # Layers
//!
//! ```text
//! application/     store contracts, merge policy, sync engine, relay routing
//! infrastructure/
//!   network/       UDP discovery, HTTP API with WebSocket relay upgrades,
//!                  HTTP sync client
//!   auth           account tokens for register / login
//!   storage/       TOML config, SQLite store, in-memory store
//!   scheduler      repeating background jobs
//! ```

pub mod application;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod test_support;
