//! Wire formats: discovery datagrams, directory sync bodies, relay envelopes.

pub mod announce;
pub mod envelope;
pub mod sync;

use thiserror::Error;

/// Largest discovery datagram a node will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Errors raised while encoding or decoding a discovery datagram.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes were not a JSON discovery message.
    #[error("malformed discovery datagram: {0}")]
    Json(#[from] serde_json::Error),

    /// The datagram exceeded [`MAX_DATAGRAM_SIZE`].
    #[error("datagram of {len} bytes exceeds the {MAX_DATAGRAM_SIZE}-byte limit")]
    Oversized { len: usize },
}

pub use announce::{decode_datagram, encode_datagram, AnnounceMessage, DiscoveryMessage};
pub use envelope::{encode_envelope, parse_recipient, EnvelopeError};
pub use sync::{
    Lenient, PulledUser, PushedUser, SyncPullResponse, SyncPushRequest, SyncPushResponse, SYNC_PATH,
};
