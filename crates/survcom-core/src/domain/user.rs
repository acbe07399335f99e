//! User directory entries.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A directory record failed validation before reaching the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("record is not a JSON object")]
    NotAnObject,
}

/// One end-user identity as held in a node's directory.
///
/// Once created, only `last_seen` ever changes.  `username` is unique within
/// one node at creation time; after merging peers' directories the same name
/// may appear under two different ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    /// Opaque credential blob supplied by the client.
    pub public_key: String,
    pub last_seen: u64,
    pub created_at: u64,
    /// Label of the node that created the record, when known.
    pub home_server: Option<String>,
}

impl UserRecord {
    /// Builds a record, rejecting empty identity fields.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingField`] naming the first empty field.
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        public_key: impl Into<String>,
        created_at: u64,
        home_server: Option<String>,
    ) -> Result<Self, RecordError> {
        let (id, username, public_key) = (id.into(), username.into(), public_key.into());
        if id.is_empty() {
            return Err(RecordError::MissingField("id"));
        }
        if username.is_empty() {
            return Err(RecordError::MissingField("username"));
        }
        if public_key.is_empty() {
            return Err(RecordError::MissingField("public_key"));
        }
        Ok(Self {
            id,
            username,
            public_key,
            last_seen: created_at,
            created_at,
            home_server,
        })
    }
}

/// Generates a user id in the same 32-hex-character shape as node ids.
pub fn generate_user_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_sets_last_seen_to_created_at() {
        let rec = UserRecord::new("u1", "alice", "K1", 1_000, None).unwrap();
        assert_eq!(rec.last_seen, 1_000);
        assert_eq!(rec.created_at, 1_000);
    }

    #[test]
    fn test_new_record_rejects_empty_username() {
        let err = UserRecord::new("u1", "", "K1", 0, None).unwrap_err();
        assert_eq!(err, RecordError::MissingField("username"));
    }

    #[test]
    fn test_new_record_rejects_empty_key() {
        let err = UserRecord::new("u1", "alice", "", 0, None).unwrap_err();
        assert_eq!(err, RecordError::MissingField("public_key"));
    }

    #[test]
    fn test_generated_user_id_is_hex() {
        let id = generate_user_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
