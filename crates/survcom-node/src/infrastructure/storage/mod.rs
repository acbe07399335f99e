//! Persistence: configuration file and directory/registry stores.
//!
//! [`database::SqliteStore`] is what the node runs on.  [`memory::MemoryStore`]
//! implements the same contracts without a file and backs the tests.

pub mod config;
pub mod database;
pub mod memory;
