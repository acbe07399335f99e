//! Use case: route envelopes between the clients connected to this node.
//!
//! A client opens a WebSocket whose final path segment is its user id.  From
//! then on every text frame it sends is an envelope (see
//! [`survcom_core::protocol::envelope`]); the relay reads the recipient id
//! and forwards the sender's frame untouched to that recipient's open
//! session, if any.  There is no buffering: a frame for an absent recipient
//! is dropped.
//!
//! A user has at most one routable session.  A second connection under the
//! same id takes over routing; the older connection stays open but receives
//! nothing more, and its eventual disconnect does not remove the newer
//! session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use survcom_core::{parse_recipient, EnvelopeError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outbound frames queued per session before further frames are dropped.
pub const SESSION_QUEUE_DEPTH: usize = 128;

pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection path `{0}` has no user id segment")]
    MissingUserId(String),
}

/// Write side of one client session.
///
/// The socket task owns the receiving end; once it stops, the channel
/// reports closed.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    id: SessionId,
    tx: mpsc::Sender<String>,
}

impl SessionChannel {
    /// Creates a channel and the receiver the socket writer drains.
    pub fn open() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn try_send(&self, frame: String) -> Result<(), TrySendError<String>> {
        self.tx.try_send(frame)
    }
}

/// Map from user id to that user's live session.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, SessionChannel>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `channel` the session for `user_id`, returning the one it
    /// replaced.
    pub async fn register(&self, user_id: &str, channel: SessionChannel) -> Option<SessionChannel> {
        self.sessions.write().await.insert(user_id.to_string(), channel)
    }

    pub async fn lookup(&self, user_id: &str) -> Option<SessionChannel> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Removes whatever session is registered for `user_id`.
    pub async fn unregister(&self, user_id: &str) -> Option<SessionChannel> {
        self.sessions.write().await.remove(user_id)
    }

    /// Removes the entry for `user_id` only if it is still `session`.
    ///
    /// Returns `false` when a newer session has taken over.
    pub async fn unregister_session(&self, user_id: &str, session: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(user_id) {
            Some(current) if current.id == session => {
                sessions.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Why a frame was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotConnected,
    SessionClosed,
    QueueFull,
}

/// Result of routing one inbound frame.
#[derive(Debug)]
pub enum RelayOutcome {
    Delivered { recipient: String },
    Dropped { recipient: String, reason: DropReason },
    Malformed(EnvelopeError),
}

/// Extracts the user id from a connection path: the last `/`-separated
/// segment, ignoring any query string.
pub fn user_id_from_path(path: &str) -> Option<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().filter(|segment| !segment.is_empty())
}

pub struct RelayService {
    registry: Arc<ConnectionRegistry>,
}

impl RelayService {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Registers a new session opened on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MissingUserId`] when the path names no user;
    /// nothing is registered in that case.
    pub async fn on_connect(&self, path: &str, channel: SessionChannel) -> Result<String, RelayError> {
        let user_id = user_id_from_path(path)
            .ok_or_else(|| RelayError::MissingUserId(path.to_string()))?
            .to_string();
        let session = channel.id();
        if let Some(previous) = self.registry.register(&user_id, channel).await {
            debug!(user_id = %user_id, old_session = previous.id(), "session superseded");
        }
        info!(user_id = %user_id, session, "client connected to relay");
        Ok(user_id)
    }

    /// Routes one frame sent by `sender`.  The frame is forwarded verbatim.
    pub async fn on_message(&self, sender: &str, raw: &str) -> RelayOutcome {
        let recipient = match parse_recipient(raw) {
            Ok(recipient) => recipient,
            Err(e) => {
                warn!(sender = %sender, "dropping malformed envelope: {e}");
                return RelayOutcome::Malformed(e);
            }
        };

        let Some(channel) = self.registry.lookup(&recipient).await else {
            warn!(sender = %sender, recipient = %recipient, "recipient not connected, envelope dropped");
            return RelayOutcome::Dropped {
                recipient,
                reason: DropReason::NotConnected,
            };
        };

        match channel.try_send(raw.to_string()) {
            Ok(()) => {
                debug!(sender = %sender, recipient = %recipient, "envelope relayed");
                RelayOutcome::Delivered { recipient }
            }
            Err(TrySendError::Closed(_)) => {
                warn!(recipient = %recipient, "recipient session closed, envelope dropped");
                RelayOutcome::Dropped {
                    recipient,
                    reason: DropReason::SessionClosed,
                }
            }
            Err(TrySendError::Full(_)) => {
                warn!(recipient = %recipient, "recipient queue full, envelope dropped");
                RelayOutcome::Dropped {
                    recipient,
                    reason: DropReason::QueueFull,
                }
            }
        }
    }

    /// Ends a session.  Returns `true` if it was still the routable one.
    pub async fn on_disconnect(&self, user_id: &str, session: SessionId) -> bool {
        let removed = self.registry.unregister_session(user_id, session).await;
        info!(user_id = %user_id, session, removed, "client disconnected from relay");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CapturedLogs;
    use serde_json::json;
    use survcom_core::encode_envelope;

    fn service() -> RelayService {
        RelayService::new(Arc::new(ConnectionRegistry::new()))
    }

    #[test]
    fn test_user_id_is_last_path_segment() {
        assert_eq!(user_id_from_path("/ws/alice"), Some("alice"));
        assert_eq!(user_id_from_path("/bob"), Some("bob"));
        assert_eq!(user_id_from_path("/ws/carol?token=x"), Some("carol"));
    }

    #[test]
    fn test_empty_last_segment_has_no_user_id() {
        assert_eq!(user_id_from_path("/"), None);
        assert_eq!(user_id_from_path(""), None);
        assert_eq!(user_id_from_path("/ws/"), None);
        assert_eq!(user_id_from_path("/?x=1"), None);
    }

    #[tokio::test]
    async fn test_envelope_is_forwarded_verbatim() {
        // Arrange
        let relay = service();
        let (bob, mut bob_rx) = SessionChannel::open();
        relay.on_connect("/ws/bob", bob).await.unwrap();
        let frame = encode_envelope(&json!({"recipientId":"bob","ciphertext":"Zm9v"}));

        // Act
        let outcome = relay.on_message("alice", &frame).await;

        // Assert
        assert!(matches!(outcome, RelayOutcome::Delivered { ref recipient } if recipient == "bob"));
        assert_eq!(bob_rx.recv().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_missing_user_id_registers_nothing() {
        let relay = service();
        let (channel, _rx) = SessionChannel::open();

        let result = relay.on_connect("/", channel).await;

        assert!(matches!(result, Err(RelayError::MissingUserId(_))));
        assert!(relay.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_recipient_drops_envelope() {
        let relay = service();
        let frame = encode_envelope(&json!({"recipientId":"ghost"}));

        let outcome = relay.on_message("alice", &frame).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Dropped {
                reason: DropReason::NotConnected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dropped_envelopes_are_logged_as_warnings() {
        // Arrange
        let (logs, _guard) = CapturedLogs::install();
        let relay = service();
        let frame = encode_envelope(&json!({"recipientId":"ghost"}));

        // Act
        relay.on_message("alice", &frame).await;
        relay.on_message("alice", "%%%").await;

        // Assert
        let out = logs.contents();
        assert!(out.contains("WARN"), "{out}");
        assert!(out.contains("recipient not connected"), "{out}");
        assert!(out.contains("malformed envelope"), "{out}");
    }

    #[tokio::test]
    async fn test_line_wrapped_envelope_is_forwarded_unchanged() {
        // Arrange
        let relay = service();
        let (bob, mut bob_rx) = SessionChannel::open();
        relay.on_connect("/bob", bob).await.unwrap();
        let frame = encode_envelope(&json!({"recipientId":"bob","ciphertext":"Zm9vYmFyYmF6"}));
        let (head, tail) = frame.split_at(12);
        let wrapped = format!("{head}\n{tail}");

        // Act
        let outcome = relay.on_message("alice", &wrapped).await;

        // Assert
        assert!(matches!(outcome, RelayOutcome::Delivered { .. }));
        assert_eq!(bob_rx.recv().await.unwrap(), wrapped);
    }

    #[tokio::test]
    async fn test_closed_recipient_session_drops_envelope() {
        let relay = service();
        let (bob, bob_rx) = SessionChannel::open();
        relay.on_connect("/bob", bob).await.unwrap();
        drop(bob_rx);

        let outcome = relay
            .on_message("alice", &encode_envelope(&json!({"recipientId":"bob"})))
            .await;

        assert!(matches!(
            outcome,
            RelayOutcome::Dropped {
                reason: DropReason::SessionClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_reported() {
        let relay = service();
        assert!(matches!(
            relay.on_message("alice", "not base64 at all!").await,
            RelayOutcome::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_newer_session_takes_over_routing() {
        // Arrange
        let relay = service();
        let (first, mut first_rx) = SessionChannel::open();
        let (second, mut second_rx) = SessionChannel::open();
        relay.on_connect("/bob", first).await.unwrap();
        relay.on_connect("/bob", second).await.unwrap();
        let frame = encode_envelope(&json!({"recipientId":"bob"}));

        // Act
        relay.on_message("alice", &frame).await;

        // Assert
        assert_eq!(second_rx.recv().await.unwrap(), frame);
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_newer_session() {
        // Arrange
        let relay = service();
        let (first, _first_rx) = SessionChannel::open();
        let first_id = first.id();
        let (second, _second_rx) = SessionChannel::open();
        let second_id = second.id();
        relay.on_connect("/bob", first).await.unwrap();
        relay.on_connect("/bob", second).await.unwrap();

        // Act
        let removed = relay.on_disconnect("bob", first_id).await;

        // Assert
        assert!(!removed);
        let current = relay.registry().lookup("bob").await.unwrap();
        assert_eq!(current.id(), second_id);
        assert!(relay.on_disconnect("bob", second_id).await);
        assert!(relay.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_full_queue_drops_envelope() {
        let relay = service();
        let (bob, _bob_rx) = SessionChannel::open();
        relay.on_connect("/bob", bob).await.unwrap();
        let frame = encode_envelope(&json!({"recipientId":"bob"}));
        for _ in 0..SESSION_QUEUE_DEPTH {
            relay.on_message("alice", &frame).await;
        }

        let outcome = relay.on_message("alice", &frame).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Dropped {
                reason: DropReason::QueueFull,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unregister_removes_any_session() {
        let registry = ConnectionRegistry::new();
        let (channel, _rx) = SessionChannel::open();
        registry.register("bob", channel).await;

        assert!(registry.unregister("bob").await.is_some());
        assert_eq!(registry.len().await, 0);
    }
}
