//! Relay routing through the HTTP API listener on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use survcom_core::{encode_envelope, NodeId};
use survcom_node::application::directory::{DirectoryStore, PeerStore};
use survcom_node::application::relay::{ConnectionRegistry, RelayService};
use survcom_node::infrastructure::auth::TokenIssuer;
use survcom_node::infrastructure::network::api::{build_router, serve_api, ApiState};
use survcom_node::infrastructure::storage::memory::MemoryStore;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (SocketAddr, Arc<ConnectionRegistry>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(ApiState {
        directory: Arc::clone(&store) as Arc<dyn DirectoryStore>,
        peers: store as Arc<dyn PeerStore>,
        relay: Arc::new(RelayService::new(Arc::clone(&registry))),
        tokens: Arc::new(TokenIssuer::with_random_secret(Duration::from_secs(60))),
        node_id: NodeId::generate(),
        node_name: "relay-node".to_string(),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_api(listener, build_router(state), std::future::pending()));
    (addr, registry)
}

async fn connect(addr: SocketAddr, user_id: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/{user_id}")).await.unwrap();
    ws
}

async fn wait_for_sessions(registry: &ConnectionRegistry, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while registry.len().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return text;
        }
    }
}

#[tokio::test]
async fn test_envelope_is_delivered_verbatim() {
    // Arrange
    let (addr, registry) = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_for_sessions(&registry, 2).await;
    let frame = encode_envelope(&json!({"recipientId": "alice", "ciphertext": "q83v", "iv": "AAEC"}));

    // Act
    bob.send(Message::Text(frame.clone())).await.unwrap();

    // Assert
    assert_eq!(next_text(&mut alice).await, frame);
}

#[tokio::test]
async fn test_handshake_without_user_id_is_refused() {
    let (addr, registry) = start_relay().await;

    let result = connect_async(format!("ws://{addr}/")).await;

    assert!(matches!(result, Err(WsError::Http(ref response)) if response.status() == 400));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_undeliverable_frames_do_not_close_the_sender() {
    // Arrange
    let (addr, registry) = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_for_sessions(&registry, 2).await;
    let to_ghost = encode_envelope(&json!({"recipientId": "ghost", "ciphertext": "x"}));
    let to_alice = encode_envelope(&json!({"recipientId": "alice", "ciphertext": "y"}));

    // Act
    bob.send(Message::Text(to_ghost)).await.unwrap();
    bob.send(Message::Text("%%% not base64 %%%".to_string())).await.unwrap();
    bob.send(Message::Text(to_alice.clone())).await.unwrap();

    // Assert: only the deliverable frame arrives, and bob is still registered
    assert_eq!(next_text(&mut alice).await, to_alice);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_newest_session_receives_after_reconnect() {
    // Arrange
    let (addr, registry) = start_relay().await;
    let mut old_alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_for_sessions(&registry, 2).await;
    let first_session = registry.lookup("alice").await.unwrap().id();
    let mut new_alice = connect(addr, "alice").await;
    timeout(Duration::from_secs(5), async {
        while registry.lookup("alice").await.map(|c| c.id()) == Some(first_session) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let frame = encode_envelope(&json!({"recipientId": "alice", "ciphertext": "z"}));

    // Act
    bob.send(Message::Text(frame.clone())).await.unwrap();

    // Assert
    assert_eq!(next_text(&mut new_alice).await, frame);
    let stale = timeout(Duration::from_millis(300), old_alice.next()).await;
    assert!(stale.is_err(), "superseded session must not receive the envelope");
}

#[tokio::test]
async fn test_disconnect_unregisters_user() {
    // Arrange
    let (addr, registry) = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    wait_for_sessions(&registry, 1).await;

    // Act
    alice.close(None).await.unwrap();

    // Assert
    wait_for_sessions(&registry, 0).await;
    assert!(registry.lookup("alice").await.is_none());
}

#[tokio::test]
async fn test_api_and_relay_share_one_port() {
    // Arrange
    let (addr, registry) = start_relay().await;
    let _alice = connect(addr, "alice").await;
    wait_for_sessions(&registry, 1).await;

    // Act
    let ping: serde_json::Value = reqwest::get(format!("http://{addr}/api/ping"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(ping["message"], "pong");
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_bare_user_id_path_is_accepted() {
    // Arrange
    let (addr, registry) = start_relay().await;

    // Act
    let (_carol, _) = connect_async(format!("ws://{addr}/carol")).await.unwrap();

    // Assert
    wait_for_sessions(&registry, 1).await;
    assert!(registry.lookup("carol").await.is_some());
}
