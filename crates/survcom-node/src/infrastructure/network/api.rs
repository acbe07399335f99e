//! Axum HTTP API: node status, directory sync endpoints and user lookup.
//!
//! Endpoints:
//! - GET  /
//! - GET  /api/ping
//! - GET  /api/users/sync      (peer pull)
//! - POST /api/users/sync      (peer push)
//! - GET  /api/users
//! - GET  /api/users/find/:username
//! - POST /api/users/register
//! - POST /api/users/login
//! - GET  /api/nodes
//!
//! WebSocket upgrades on any path are relay sessions; see
//! [`super::relay_server`].
//!
//! Register and login answer with a signed account token.  Errors are
//! answered as `{"error": "..."}` with the matching status code.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use survcom_core::{
    generate_user_id, now_millis, Node, NodeId, SyncPullResponse, SyncPushRequest,
    SyncPushResponse, UserRecord, SYNC_PATH,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::relay_server::relay_upgrade;
use crate::application::directory::{merge_records, DirectoryStore, PeerStore, StoreError};
use crate::application::relay::RelayService;
use crate::infrastructure::auth::{TokenError, TokenIssuer};

/// Shared state for all API handlers and relay sessions.
pub struct ApiState {
    pub directory: Arc<dyn DirectoryStore>,
    pub peers: Arc<dyn PeerStore>,
    pub relay: Arc<RelayService>,
    pub tokens: Arc<TokenIssuer>,
    pub node_id: NodeId,
    pub node_name: String,
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/api/ping", get(handle_ping))
        .route(SYNC_PATH, get(handle_sync_pull).post(handle_sync_push))
        .route("/api/users", get(handle_list_users))
        .route("/api/users/find/:username", get(handle_find_user))
        .route("/api/users/register", post(handle_register))
        .route("/api/users/login", post(handle_login))
        .route("/api/nodes", get(handle_list_nodes))
        .fallback(handle_not_found)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), relay_upgrade))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve_api<F>(listener: TcpListener, router: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on {addr}");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP API server failed")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    NotFound(&'static str),
    Conflict(&'static str),
    Store(StoreError),
    Token(TokenError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::Token(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.to_string()),
            ApiError::Store(e) => {
                error!("API store failure: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal store error".to_string())
            }
            ApiError::Token(e) => {
                error!("API token failure: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to issue token".to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// ── Response / request bodies ─────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub message: String,
    pub status: String,
    pub node_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub timestamp: u64,
    pub message: String,
    pub node_name: String,
    pub node_id: NodeId,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub public_key: String,
    pub last_seen: u64,
}

impl From<&UserRecord> for UserSummary {
    fn from(rec: &UserRecord) -> Self {
        Self {
            id: rec.id.clone(),
            username: rec.username.clone(),
            public_key: rec.public_key.clone(),
            last_seen: rec.last_seen,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserListResponse {
    pub count: usize,
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindUserResponse {
    pub user: UserSummary,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "publicKey", alias = "public_key")]
    pub public_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub username: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_server: Option<String>,
}

impl From<&UserRecord> for AccountView {
    fn from(rec: &UserRecord) -> Self {
        Self {
            id: rec.id.clone(),
            username: rec.username.clone(),
            public_key: rec.public_key.clone(),
            home_server: rec.home_server.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub message: String,
    pub user: AccountView,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub last_seen: u64,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            address: node.address.clone(),
            port: node.port,
            last_seen: node.last_seen,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeListResponse {
    pub count: usize,
    pub nodes: Vec<NodeSummary>,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn handle_not_found() -> ApiError {
    ApiError::NotFound("no such endpoint")
}

async fn handle_root(State(state): State<Arc<ApiState>>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "Survival Communicator Server".to_string(),
        status: "online".to_string(),
        node_name: state.node_name.clone(),
    })
}

async fn handle_ping(State(state): State<Arc<ApiState>>) -> Json<PingResponse> {
    Json(PingResponse {
        timestamp: now_millis(),
        message: "pong".to_string(),
        node_name: state.node_name.clone(),
        node_id: state.node_id.clone(),
    })
}

async fn handle_sync_pull(State(state): State<Arc<ApiState>>) -> Result<Json<SyncPullResponse>, ApiError> {
    let users = state.directory.all_users().await?;
    Ok(Json(SyncPullResponse::from_records(&users)))
}

async fn handle_sync_push(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<SyncPushRequest>, JsonRejection>,
) -> Result<Json<SyncPushResponse>, ApiError> {
    let Json(body) = body.map_err(|_| ApiError::BadRequest("expected a JSON body with a users array"))?;

    let now = now_millis();
    let incoming = body.users.into_iter().map(|entry| entry.into_record(None, now));
    let report = merge_records(state.directory.as_ref(), incoming).await;
    info!(
        processed = report.processed,
        imported = report.imported,
        "accepted pushed directory"
    );

    Ok(Json(SyncPushResponse {
        message: "sync completed".to_string(),
        processed: report.processed,
        imported: report.imported,
    }))
}

async fn handle_list_users(State(state): State<Arc<ApiState>>) -> Result<Json<UserListResponse>, ApiError> {
    let users = state.directory.all_users().await?;
    Ok(Json(UserListResponse {
        count: users.len(),
        users: users.iter().map(UserSummary::from).collect(),
    }))
}

async fn handle_find_user(
    State(state): State<Arc<ApiState>>,
    Path(username): Path<String>,
) -> Result<Json<FindUserResponse>, ApiError> {
    let user = state
        .directory
        .find_user_by_username(&username)
        .await?
        .ok_or(ApiError::NotFound("user not found"))?;
    Ok(Json(FindUserResponse {
        user: UserSummary::from(&user),
    }))
}

async fn handle_register(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    const MISSING: &str = "username and publicKey are required";
    let Json(body) = body.map_err(|_| ApiError::BadRequest(MISSING))?;
    let (Some(username), Some(public_key)) = (body.username, body.public_key) else {
        return Err(ApiError::BadRequest(MISSING));
    };

    if state.directory.find_user_by_username(&username).await?.is_some() {
        return Err(ApiError::Conflict("username already taken"));
    }

    let record = UserRecord::new(
        generate_user_id(),
        username,
        public_key,
        now_millis(),
        Some(state.node_name.clone()),
    )
    .map_err(|_| ApiError::BadRequest(MISSING))?;

    match state.directory.insert_user(&record).await {
        Ok(()) => {}
        Err(StoreError::Duplicate(_)) => return Err(ApiError::Conflict("username already taken")),
        Err(e) => return Err(e.into()),
    }
    info!(user_id = %record.id, "registered user");
    let token = state.tokens.issue(&record)?;

    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            message: "user registered".to_string(),
            user: AccountView::from(&record),
            token,
        }),
    ))
}

async fn handle_login(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AccountResponse>, ApiError> {
    const MISSING: &str = "username is required";
    let Json(body) = body.map_err(|_| ApiError::BadRequest(MISSING))?;
    let username = body
        .username
        .filter(|u| !u.is_empty())
        .ok_or(ApiError::BadRequest(MISSING))?;

    let user = state
        .directory
        .find_user_by_username(&username)
        .await?
        .ok_or(ApiError::NotFound("user not found"))?;
    state.directory.touch_user(&user.id, now_millis()).await?;
    let token = state.tokens.issue(&user)?;

    Ok(Json(AccountResponse {
        message: "login successful".to_string(),
        user: AccountView::from(&user),
        token,
    }))
}

async fn handle_list_nodes(State(state): State<Arc<ApiState>>) -> Result<Json<NodeListResponse>, ApiError> {
    let nodes = state.peers.all_nodes().await?;
    Ok(Json(NodeListResponse {
        count: nodes.len(),
        nodes: nodes.iter().map(NodeSummary::from).collect(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
