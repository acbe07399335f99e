//! WebSocket relay sessions, served on the HTTP API port.
//!
//! Clients connect to `ws://<node>:<listen_port>/<anything>/<userId>`.  Any
//! request carrying `Upgrade: websocket` is taken by [`relay_upgrade`] before
//! routing, whatever its path; everything else falls through to the API
//! routes.  The upgrade is refused with `400 Bad Request` when the path
//! carries no user id.  Each accepted session runs in its own Tokio task with
//! two halves:
//!
//! - **reader**: every inbound text frame goes to
//!   [`RelayService::on_message`] tagged with the session's user id;
//! - **writer**: drains the session's [`SessionChannel`] queue into the
//!   socket, which is how envelopes from other sessions reach this client.
//!
//! When the reader ends (close frame, error, EOF) the writer is stopped and
//! the session is unregistered, unless a newer session for the same user has
//! already replaced it.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::api::{ApiState, ErrorBody};
use crate::application::relay::{user_id_from_path, RelayService, SessionChannel};

/// Middleware that turns WebSocket upgrade requests into relay sessions.
pub async fn relay_upgrade(State(state): State<Arc<ApiState>>, request: Request, next: Next) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    if user_id_from_path(&path).is_none() {
        debug!("refusing relay upgrade for {path}: no user id");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "connection path must end in a user id".to_string(),
            }),
        )
            .into_response();
    }

    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let relay = Arc::clone(&state.relay);
    upgrade.on_upgrade(move |socket| run_session(socket, path, relay))
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

async fn run_session(socket: WebSocket, path: String, relay: Arc<RelayService>) {
    let (channel, mut outbound) = SessionChannel::open();
    let session = channel.id();
    let user_id = match relay.on_connect(&path, channel).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!("relay session for {path} refused: {e}");
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_user = user_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                debug!(user_id = %writer_user, "relay send failed, client gone");
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                relay.on_message(&user_id, &text).await;
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    relay.on_message(&user_id, &text).await;
                }
                Err(_) => warn!(user_id = %user_id, "dropping non-UTF-8 binary frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Ping/Pong are answered by the socket itself.
            }
            Err(e) => {
                debug!(user_id = %user_id, "relay read ended: {e}");
                break;
            }
        }
    }

    writer.abort();
    relay.on_disconnect(&user_id, session).await;
    debug!(user_id = %user_id, "relay session closed");
}
