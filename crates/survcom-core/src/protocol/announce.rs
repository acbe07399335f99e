//! Discovery datagram format.
//!
//! Every node broadcasts a small JSON object on the discovery port:
//!
//! ```json
//! {"type":"ANNOUNCE","id":"9f2c...","name":"N1","port":3000,"timestamp":1000}
//! ```
//!
//! The sender's IP address is deliberately absent: receivers take it from the
//! datagram's transport source, which is the only address they can trust to
//! be reachable.
//!
//! # Unicast replies
//!
//! A node that hears an announce answers the sender directly with its own
//! announce so that two nodes converge within one round trip.  The answer
//! carries `"reply":true`; a node never answers a reply, which keeps two
//! peers from bouncing announces at each other forever.  Older nodes that do
//! not know the field simply ignore it.

use serde::{de, Deserialize, Deserializer, Serialize};

use super::{ProtocolError, MAX_DATAGRAM_SIZE};
use crate::domain::node::NodeId;

/// All messages that travel on the discovery port.
///
/// `tag = "type"` puts the discriminant in a `"type"` field alongside the
/// variant's own fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryMessage {
    #[serde(rename = "ANNOUNCE")]
    Announce(AnnounceMessage),
}

/// A node advertising its presence and HTTP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMessage {
    pub id: NodeId,
    pub name: String,
    /// HTTP port of the sender's API; peers sync against this port.
    #[serde(deserialize_with = "port_number_or_string")]
    pub port: u16,
    /// Sender's clock, milliseconds since the epoch.
    pub timestamp: u64,
    /// Set on unicast answers to another node's announce.
    #[serde(default, skip_serializing_if = "is_false")]
    pub reply: bool,
}

impl AnnounceMessage {
    /// Returns a copy of this announce marked as a unicast reply.
    pub fn as_reply(&self) -> Self {
        Self {
            reply: true,
            ..self.clone()
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Some nodes send the port as the raw environment string (`"3000"`).
fn port_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port `{text}`"))),
    }
}

/// Serializes a discovery message into datagram bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Oversized`] if the encoding exceeds
/// [`MAX_DATAGRAM_SIZE`] (only possible with an absurdly long node name).
pub fn encode_datagram(msg: &DiscoveryMessage) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(msg)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::Oversized { len: bytes.len() });
    }
    Ok(bytes)
}

/// Parses datagram bytes into a discovery message.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] for anything that is not a well-formed
/// discovery message, including unknown `type` values.
pub fn decode_datagram(bytes: &[u8]) -> Result<DiscoveryMessage, ProtocolError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::Oversized { len: bytes.len() });
    }
    Ok(serde_json::from_slice(bytes)?)
}
