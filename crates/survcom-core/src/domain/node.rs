//! Discovered peer nodes.
//!
//! A [`Node`] is one running instance of the server as seen from another
//! instance.  Its [`NodeId`] is random per process start and never persisted
//! by its owner, so a restarted peer shows up as a new row; stale rows are
//! tolerated and never pruned.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-process node identifier: 16 random bytes rendered as 32
/// lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps an identifier received from the network or the store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A peer node as recorded in the Peer Registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Merge key.
    pub id: NodeId,
    /// Human-readable label; not unique.
    pub name: String,
    /// Last-known IP address, always taken from the datagram source.
    pub address: String,
    /// HTTP port the peer serves its sync endpoints on.
    pub port: u16,
    /// Milliseconds since the epoch.
    pub last_seen: u64,
    /// Milliseconds since the epoch.
    pub created_at: u64,
}

impl Node {
    /// Builds a record for a node first seen at `seen_at`.
    pub fn discovered(
        id: NodeId,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        seen_at: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            port,
            last_seen: seen_at,
            created_at: seen_at,
        }
    }

    /// Returns `true` when `self` should overwrite `existing` on upsert.
    ///
    /// Newest `last_seen` wins; an equal timestamp also overwrites so that a
    /// re-announce within the same millisecond still refreshes the endpoint.
    pub fn supersedes(&self, existing: &Node) -> bool {
        self.id == existing.id && self.last_seen >= existing.last_seen
    }

    /// Applies an upsert from `incoming`, keeping the original `created_at`.
    ///
    /// Returns `true` if the stored record changed.
    pub fn absorb(&mut self, incoming: &Node) -> bool {
        if !incoming.supersedes(self) {
            return false;
        }
        self.name = incoming.name.clone();
        self.address = incoming.address.clone();
        self.port = incoming.port;
        self.last_seen = incoming.last_seen;
        true
    }

    /// Base URL of the peer's HTTP API, bracketing IPv6 literals.
    pub fn base_url(&self) -> String {
        if self.address.contains(':') {
            format!("http://[{}]:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, address: &str, port: u16, seen: u64) -> Node {
        Node::discovered(NodeId::from(id), "N1", address, port, seen)
    }

    #[test]
    fn test_generated_node_id_is_32_hex_chars() {
        // Arrange / Act
        let id = NodeId::generate();

        // Assert
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_node_ids_differ() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }

    #[test]
    fn test_newer_announce_overwrites_endpoint_and_keeps_created_at() {
        // Arrange
        let mut stored = node("abc", "10.0.0.5", 3001, 1_000);
        let newer = node("abc", "10.0.0.9", 3005, 2_000);

        // Act
        let changed = stored.absorb(&newer);

        // Assert
        assert!(changed);
        assert_eq!(stored.address, "10.0.0.9");
        assert_eq!(stored.port, 3005);
        assert_eq!(stored.last_seen, 2_000);
        assert_eq!(stored.created_at, 1_000);
    }

    #[test]
    fn test_older_announce_is_ignored() {
        let mut stored = node("abc", "10.0.0.5", 3001, 2_000);
        let older = node("abc", "10.0.0.7", 3002, 1_500);

        assert!(!stored.absorb(&older));
        assert_eq!(stored.address, "10.0.0.5");
    }

    #[test]
    fn test_different_id_never_supersedes() {
        let stored = node("abc", "10.0.0.5", 3001, 1_000);
        let other = node("xyz", "10.0.0.5", 3001, 9_000);
        assert!(!other.supersedes(&stored));
    }

    #[test]
    fn test_base_url_ipv4() {
        assert_eq!(node("a", "10.0.0.5", 3001, 0).base_url(), "http://10.0.0.5:3001");
    }

    #[test]
    fn test_base_url_brackets_ipv6() {
        assert_eq!(node("a", "fe80::1", 3001, 0).base_url(), "http://[fe80::1]:3001");
    }

    #[test]
    fn test_node_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&NodeId::from("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
