//! Network adapters.
//!
//! | Module         | Transport       | Default port |
//! |----------------|-----------------|--------------|
//! | `api`          | HTTP (axum)     | 3000         |
//! | `relay_server` | WebSocket       | API port     |
//! | `discovery`    | UDP broadcast   | 4000         |
//! | `sync_client`  | HTTP (reqwest)  | peer's API   |

pub mod api;
pub mod discovery;
pub mod relay_server;
pub mod sync_client;
