//! Directory sync bodies exchanged over HTTP.
//!
//! ```text
//! GET  /api/users/sync  ->  {"count":1,"users":[{"id":..,"username":..,"public_key":..,"last_seen":..}]}
//! POST /api/users/sync  <-  {"users":[{"id":..,"username":..,"publicKey":..}]}
//! ```
//!
//! The two directions spell the key field differently.  Receivers accept
//! either spelling in both directions, because some senders push raw store
//! rows (`public_key`) instead of the documented `publicKey`.
//!
//! Every record field is optional on the wire: a record missing an identity
//! field, or an entry that is not an object at all, is dropped on its own
//! without rejecting the rest of the batch.

use serde::{Deserialize, Serialize};

use crate::domain::user::{RecordError, UserRecord};

/// Path of the directory sync endpoint on every node's HTTP API.
pub const SYNC_PATH: &str = "/api/users/sync";

/// Either a decodable record or whatever JSON value stood in its place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lenient<T> {
    Record(T),
    Malformed(serde_json::Value),
}

impl<T> Lenient<T> {
    pub fn record(&self) -> Option<&T> {
        match self {
            Lenient::Record(r) => Some(r),
            Lenient::Malformed(_) => None,
        }
    }
}

impl<T> From<T> for Lenient<T> {
    fn from(value: T) -> Self {
        Lenient::Record(value)
    }
}

/// A directory entry as served by `GET /api/users/sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulledUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "publicKey")]
    pub public_key: Option<String>,
    #[serde(default)]
    pub last_seen: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_server: Option<String>,
}

/// A directory entry as sent in the body of `POST /api/users/sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "publicKey", alias = "public_key")]
    pub public_key: Option<String>,
    #[serde(
        default,
        rename = "homeServer",
        alias = "home_server",
        skip_serializing_if = "Option::is_none"
    )]
    pub home_server: Option<String>,
}

/// Response body of `GET /api/users/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPullResponse {
    #[serde(default)]
    pub count: usize,
    pub users: Vec<Lenient<PulledUser>>,
}

/// Request body of `POST /api/users/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPushRequest {
    pub users: Vec<Lenient<PushedUser>>,
}

/// Response body of `POST /api/users/sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPushResponse {
    pub message: String,
    pub processed: usize,
    pub imported: usize,
}

fn required(field: Option<String>, name: &'static str) -> Result<String, RecordError> {
    field
        .filter(|v| !v.is_empty())
        .ok_or(RecordError::MissingField(name))
}

impl PulledUser {
    /// Converts the wire entry into a record ready for merge-insert.
    ///
    /// `fallback_home` labels records whose origin the sender did not state;
    /// `now` stands in for a missing `last_seen`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingField`] if an identity field is absent.
    pub fn into_record(self, fallback_home: Option<&str>, now: u64) -> Result<UserRecord, RecordError> {
        let mut record = UserRecord::new(
            required(self.id, "id")?,
            required(self.username, "username")?,
            required(self.public_key, "public_key")?,
            now,
            self.home_server.or_else(|| fallback_home.map(str::to_string)),
        )?;
        record.last_seen = self.last_seen.unwrap_or(now);
        Ok(record)
    }
}

impl From<&UserRecord> for PulledUser {
    fn from(rec: &UserRecord) -> Self {
        Self {
            id: Some(rec.id.clone()),
            username: Some(rec.username.clone()),
            public_key: Some(rec.public_key.clone()),
            last_seen: Some(rec.last_seen),
            home_server: rec.home_server.clone(),
        }
    }
}

impl PushedUser {
    /// Converts the wire entry into a record ready for merge-insert.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingField`] if an identity field is absent.
    pub fn into_record(self, fallback_home: Option<&str>, now: u64) -> Result<UserRecord, RecordError> {
        UserRecord::new(
            required(self.id, "id")?,
            required(self.username, "username")?,
            required(self.public_key, "public_key")?,
            now,
            self.home_server.or_else(|| fallback_home.map(str::to_string)),
        )
    }
}

impl From<&UserRecord> for PushedUser {
    fn from(rec: &UserRecord) -> Self {
        Self {
            id: Some(rec.id.clone()),
            username: Some(rec.username.clone()),
            public_key: Some(rec.public_key.clone()),
            home_server: rec.home_server.clone(),
        }
    }
}

impl Lenient<PulledUser> {
    /// See [`PulledUser::into_record`]; a non-object entry is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NotAnObject`] or a missing-field error.
    pub fn into_record(self, fallback_home: Option<&str>, now: u64) -> Result<UserRecord, RecordError> {
        match self {
            Lenient::Record(user) => user.into_record(fallback_home, now),
            Lenient::Malformed(_) => Err(RecordError::NotAnObject),
        }
    }
}

impl Lenient<PushedUser> {
    /// See [`PushedUser::into_record`]; a non-object entry is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NotAnObject`] or a missing-field error.
    pub fn into_record(self, fallback_home: Option<&str>, now: u64) -> Result<UserRecord, RecordError> {
        match self {
            Lenient::Record(user) => user.into_record(fallback_home, now),
            Lenient::Malformed(_) => Err(RecordError::NotAnObject),
        }
    }
}

impl SyncPullResponse {
    pub fn from_records(records: &[UserRecord]) -> Self {
        Self {
            count: records.len(),
            users: records.iter().map(|r| PulledUser::from(r).into()).collect(),
        }
    }
}

impl SyncPushRequest {
    pub fn from_records(records: &[UserRecord]) -> Self {
        Self {
            users: records.iter().map(|r| PushedUser::from(r).into()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_response_parses_documented_shape() {
        // Arrange
        let raw = r#"{"count":1,"users":[{"id":"u1","username":"alice","public_key":"K1","last_seen":5}]}"#;

        // Act
        let body: SyncPullResponse = serde_json::from_str(raw).unwrap();

        // Assert
        let user = body.users[0].record().unwrap();
        assert_eq!(user.id.as_deref(), Some("u1"));
        assert_eq!(user.public_key.as_deref(), Some("K1"));
        assert_eq!(user.last_seen, Some(5));
    }

    #[test]
    fn test_pull_response_without_users_array_is_rejected() {
        assert!(serde_json::from_str::<SyncPullResponse>(r#"{"count":0}"#).is_err());
        assert!(serde_json::from_str::<SyncPullResponse>(r#"{"users":"nope"}"#).is_err());
    }

    #[test]
    fn test_non_object_entry_is_kept_as_malformed() {
        let raw = r#"{"users":[42,{"id":"u1","username":"a","public_key":"k"}]}"#;
        let body: SyncPullResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(body.users[0], Lenient::Malformed(_)));
        assert!(body.users[1].record().is_some());
        assert_eq!(
            body.users[0].clone().into_record(None, 0).unwrap_err(),
            RecordError::NotAnObject
        );
    }

    #[test]
    fn test_push_serializes_camel_case_key() {
        let rec = UserRecord::new("u1", "alice", "K1", 10, None).unwrap();
        let json = serde_json::to_value(SyncPushRequest::from_records(&[rec])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"users":[{"id":"u1","username":"alice","publicKey":"K1"}]})
        );
    }

    #[test]
    fn test_push_accepts_snake_case_key() {
        let raw = r#"{"users":[{"id":"u1","username":"alice","public_key":"K1","last_seen":3}]}"#;
        let body: SyncPushRequest = serde_json::from_str(raw).unwrap();
        let user = body.users[0].record().unwrap().clone();
        assert_eq!(user.public_key.as_deref(), Some("K1"));
    }

    #[test]
    fn test_pulled_user_missing_key_is_rejected() {
        let user = PulledUser {
            id: Some("u1".into()),
            username: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(
            user.into_record(None, 0).unwrap_err(),
            RecordError::MissingField("public_key")
        );
    }

    #[test]
    fn test_pulled_user_uses_fallback_home_and_remote_last_seen() {
        let user = PulledUser {
            id: Some("u1".into()),
            username: Some("alice".into()),
            public_key: Some("K1".into()),
            last_seen: Some(77),
            home_server: None,
        };
        let rec = user.into_record(Some("N2"), 100).unwrap();
        assert_eq!(rec.home_server.as_deref(), Some("N2"));
        assert_eq!(rec.last_seen, 77);
        assert_eq!(rec.created_at, 100);
    }

    #[test]
    fn test_pull_count_matches_records() {
        let recs = vec![
            UserRecord::new("u1", "a", "k", 1, None).unwrap(),
            UserRecord::new("u2", "b", "k", 1, None).unwrap(),
        ];
        assert_eq!(SyncPullResponse::from_records(&recs).count, 2);
    }
}
