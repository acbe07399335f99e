//! Use case: turn a received announce into a Peer Registry entry.
//!
//! The socket side lives in [`crate::infrastructure::network::discovery`];
//! this module decides what an announce means:
//!
//! 1. An announce carrying the local node id is our own broadcast coming
//!    back and is ignored.
//! 2. Anything else is upserted with the address taken from the datagram
//!    source and `last_seen` set to the local clock.
//! 3. The caller answers with a unicast announce unless the message was
//!    itself such an answer.
//!
//! A registry write failure does not suppress the answer: the sender still
//! learns about us even if we could not record it.

use std::net::IpAddr;
use std::sync::Arc;

use survcom_core::{AnnounceMessage, Node, NodeId};
use tracing::{debug, error};

use super::directory::PeerStore;

/// What handling one announce produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// The announce came from this node.
    OwnAnnounce,
    /// The sender was recorded.
    Registered { node: Node, reply: bool },
    /// The sender could not be recorded.
    NotRecorded { reply: bool },
}

impl AnnounceOutcome {
    /// Whether a unicast announce should go back to the sender.
    pub fn should_reply(&self) -> bool {
        match self {
            AnnounceOutcome::OwnAnnounce => false,
            AnnounceOutcome::Registered { reply, .. } | AnnounceOutcome::NotRecorded { reply } => {
                *reply
            }
        }
    }
}

/// Applies announces to the Peer Registry on behalf of one local node.
pub struct AnnounceHandler {
    local_id: NodeId,
    peers: Arc<dyn PeerStore>,
}

impl AnnounceHandler {
    pub fn new(local_id: NodeId, peers: Arc<dyn PeerStore>) -> Self {
        Self { local_id, peers }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// Handles an announce that arrived from `source` at local time `now`.
    pub async fn handle(&self, msg: &AnnounceMessage, source: IpAddr, now: u64) -> AnnounceOutcome {
        if msg.id == self.local_id {
            return AnnounceOutcome::OwnAnnounce;
        }

        let reply = !msg.reply;
        let node = Node::discovered(msg.id.clone(), msg.name.clone(), source.to_string(), msg.port, now);
        match self.peers.upsert_node(&node).await {
            Ok(()) => {
                debug!(peer_id = %node.id, peer = %node.name, address = %node.address, "registered peer");
                AnnounceOutcome::Registered { node, reply }
            }
            Err(e) => {
                error!(peer_id = %node.id, "failed to record announcing peer: {e}");
                AnnounceOutcome::NotRecorded { reply }
            }
        }
    }
}
