//! Store contracts for the user directory and the peer registry, plus the
//! insert-if-absent merge shared by both sync directions.
//!
//! # Merge policy
//!
//! A record arriving from a peer is inserted only if its `id` is unknown
//! locally.  Existing records are never modified by a merge, whatever the
//! incoming fields say.  A record whose `username` collides with a different
//! local record is counted and skipped; it is not an error for the batch.

use async_trait::async_trait;
use survcom_core::{Node, NodeId, RecordError, UserRecord};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors raised by directory and registry stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness constraint violated: {0}")]
    Duplicate(String),

    /// The addressed record does not exist.
    #[error("no record with id {0}")]
    NotFound(String),

    /// The storage engine failed.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Result of a merge-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same id already exists; nothing was written.
    AlreadyPresent,
}

/// Persistent user directory.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Every record held locally, in insertion order.
    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn find_user_by_username(&self, username: &str)
        -> Result<Option<UserRecord>, StoreError>;

    /// Strict create for local registrations.
    ///
    /// Fails with [`StoreError::Duplicate`] when either the id or the
    /// username is taken.
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError>;

    /// Merge-insert: writes `user` only if its id is unknown.
    ///
    /// Fails with [`StoreError::Duplicate`] when the id is new but the
    /// username belongs to another record.
    async fn insert_user_if_absent(&self, user: &UserRecord) -> Result<InsertOutcome, StoreError>;

    /// Sets `last_seen` on an existing record.
    async fn touch_user(&self, id: &str, seen_at: u64) -> Result<(), StoreError>;
}

/// Persistent registry of discovered peer nodes.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Inserts `node`, or refreshes the stored row when `node.last_seen` is
    /// not older than the stored one.  `created_at` of an existing row is
    /// kept.
    async fn upsert_node(&self, node: &Node) -> Result<(), StoreError>;

    /// Moves `last_seen` forward after a successful sync contact.
    async fn touch_node(&self, id: &NodeId, seen_at: u64) -> Result<(), StoreError>;

    async fn all_nodes(&self) -> Result<Vec<Node>, StoreError>;
}

/// Tally of one merge batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entries in the batch, valid or not.
    pub processed: usize,
    /// New records written.
    pub imported: usize,
    /// Records whose id was already known.
    pub already_present: usize,
    /// New ids rejected because their username is taken locally.
    pub conflicts: usize,
    /// Entries missing an identity field.
    pub invalid: usize,
    /// Entries the store failed to write.
    pub failed: usize,
}

/// Merge-inserts a batch of incoming records into `store`.
///
/// Each entry is handled on its own: an invalid entry, a username collision
/// or a store failure skips that entry and the rest of the batch proceeds.
pub async fn merge_records<S, I>(store: &S, records: I) -> MergeReport
where
    S: DirectoryStore + ?Sized,
    I: IntoIterator<Item = Result<UserRecord, RecordError>>,
{
    let mut report = MergeReport::default();
    for entry in records {
        report.processed += 1;
        let record = match entry {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping directory entry: {e}");
                report.invalid += 1;
                continue;
            }
        };

        match store.insert_user_if_absent(&record).await {
            Ok(InsertOutcome::Inserted) => {
                debug!(user_id = %record.id, "imported user record");
                report.imported += 1;
            }
            Ok(InsertOutcome::AlreadyPresent) => report.already_present += 1,
            Err(StoreError::Duplicate(reason)) => {
                debug!(user_id = %record.id, "username collision, record skipped: {reason}");
                report.conflicts += 1;
            }
            Err(e) => {
                error!(user_id = %record.id, "failed to merge user record: {e}");
                report.failed += 1;
            }
        }
    }
    report
}
