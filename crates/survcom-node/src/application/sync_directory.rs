//! Use case: periodic pull/merge/push of the user directory with every known
//! peer.
//!
//! One pass walks the whole Peer Registry.  Each peer is handled
//! independently and concurrently:
//!
//! 1. pull the peer's full directory,
//! 2. merge-insert every record whose id is unknown locally,
//! 3. push the full local directory back to the peer,
//! 4. refresh the peer's `last_seen`.
//!
//! A failure at any step ends that peer's handling for this pass and is
//! logged; it never aborts the pass or touches another peer.  Because both
//! sides merge by insert-if-absent, one successful exchange is enough for
//! two nodes to hold the union of their directories, even when only one of
//! them knows the other.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use survcom_core::{now_millis, Node, NodeId, SyncPullResponse, SyncPushRequest};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::directory::{merge_records, DirectoryStore, MergeReport, PeerStore, StoreError};

/// Why one peer's sync exchange failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Unreachable peer, refused connection or timeout.
    #[error("request to {peer} failed: {reason}")]
    Transport { peer: String, reason: String },

    /// The peer answered with a non-success status.
    #[error("{peer} answered with HTTP {status}")]
    Status { peer: String, status: u16 },

    /// The peer's response body was not a directory.
    #[error("{peer} sent an unreadable directory: {reason}")]
    Decode { peer: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Carries sync bodies to and from a peer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetches the peer's full directory.
    async fn pull(&self, peer: &Node) -> Result<SyncPullResponse, SyncError>;

    /// Delivers the local directory to the peer.
    async fn push(&self, peer: &Node, body: &SyncPushRequest) -> Result<(), SyncError>;
}

/// Outcome of a successful exchange with one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSyncReport {
    pub peer: NodeId,
    pub merged: MergeReport,
    pub pushed: usize,
}

/// Summary of one pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub peers: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub imported: usize,
}

pub struct SyncEngine {
    directory: Arc<dyn DirectoryStore>,
    peers: Arc<dyn PeerStore>,
    transport: Arc<dyn SyncTransport>,
}

impl SyncEngine {
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        peers: Arc<dyn PeerStore>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            directory,
            peers,
            transport,
        }
    }

    /// Runs one pass against every registered peer and waits for all of
    /// them to finish.
    pub async fn run_pass(&self) -> PassReport {
        let nodes = match self.peers.all_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("sync pass skipped, peer registry unreadable: {e}");
                return PassReport::default();
            }
        };
        if nodes.is_empty() {
            debug!("sync pass: no known peers");
            return PassReport::default();
        }

        info!(peers = nodes.len(), "starting directory sync pass");
        let results = join_all(nodes.iter().map(|node| self.sync_with_peer(node))).await;

        let mut report = PassReport {
            peers: nodes.len(),
            ..PassReport::default()
        };
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Ok(peer_report) => {
                    report.succeeded += 1;
                    report.imported += peer_report.merged.imported;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(peer_id = %node.id, peer = %node.name, "sync with peer failed: {e}");
                }
            }
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            imported = report.imported,
            "directory sync pass finished"
        );
        report
    }

    /// Runs the pull/merge/push exchange with a single peer.
    ///
    /// # Errors
    ///
    /// Returns the first [`SyncError`] hit; later steps are skipped.
    pub async fn sync_with_peer(&self, peer: &Node) -> Result<PeerSyncReport, SyncError> {
        let remote = self.transport.pull(peer).await?;

        let now = now_millis();
        let incoming = remote
            .users
            .into_iter()
            .map(|entry| entry.into_record(Some(&peer.name), now));
        let merged = merge_records(self.directory.as_ref(), incoming).await;
        debug!(
            peer_id = %peer.id,
            processed = merged.processed,
            imported = merged.imported,
            "merged peer directory"
        );

        let local = self.directory.all_users().await?;
        let body = SyncPushRequest::from_records(&local);
        self.transport.push(peer, &body).await?;

        if let Err(e) = self.peers.touch_node(&peer.id, now_millis()).await {
            warn!(peer_id = %peer.id, "could not refresh peer last_seen: {e}");
        }

        Ok(PeerSyncReport {
            peer: peer.id.clone(),
            merged,
            pushed: local.len(),
        })
    }
}
