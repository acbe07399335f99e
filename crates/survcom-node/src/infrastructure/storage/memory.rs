//! In-memory implementation of the directory and registry stores.
//!
//! Enforces the same constraints as the SQLite schema (unique user id,
//! unique username, unique node id) so that tests exercising merge and
//! upsert behaviour see exactly what a running node would.

use async_trait::async_trait;
use survcom_core::{Node, NodeId, UserRecord};
use tokio::sync::RwLock;

use crate::application::directory::{DirectoryStore, InsertOutcome, PeerStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<Vec<UserRecord>>,
    nodes: RwLock<Vec<Node>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn username_taken(users: &[UserRecord], username: &str) -> bool {
    users.iter().any(|u| u.username == username)
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        Ok(self.users.read().await.clone())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.id == user.id) {
            return Err(StoreError::Duplicate(format!("users.id {}", user.id)));
        }
        if username_taken(&users, &user.username) {
            return Err(StoreError::Duplicate(format!("users.username {}", user.username)));
        }
        users.push(user.clone());
        Ok(())
    }

    async fn insert_user_if_absent(&self, user: &UserRecord) -> Result<InsertOutcome, StoreError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.id == user.id) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        if username_taken(&users, &user.username) {
            return Err(StoreError::Duplicate(format!("users.username {}", user.username)));
        }
        users.push(user.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn touch_user(&self, id: &str, seen_at: u64) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        user.last_seen = seen_at;
        Ok(())
    }
}

#[async_trait]
impl PeerStore for MemoryStore {
    async fn upsert_node(&self, node: &Node) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write().await;
        match nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => {
                existing.absorb(node);
            }
            None => nodes.push(node.clone()),
        }
        Ok(())
    }

    async fn touch_node(&self, id: &NodeId, seen_at: u64) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        node.last_seen = node.last_seen.max(seen_at);
        Ok(())
    }

    async fn all_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.nodes.read().await.clone())
    }
}
