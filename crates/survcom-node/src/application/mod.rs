//! Application layer: use cases independent of sockets and storage engines.

pub mod directory;
pub mod discover_peers;
pub mod relay;
pub mod sync_directory;
