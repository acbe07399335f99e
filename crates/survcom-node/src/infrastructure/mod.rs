//! Infrastructure layer: sockets, storage engines and background tasks.

pub mod auth;
pub mod network;
pub mod scheduler;
pub mod storage;
