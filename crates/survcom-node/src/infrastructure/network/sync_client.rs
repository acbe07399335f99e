//! HTTP implementation of [`SyncTransport`] on top of `reqwest`.
//!
//! Both directions use the peer's `/api/users/sync` endpoint at the address
//! and port recorded in the Peer Registry.  Every request carries the
//! configured timeout (default 5 s) so an unreachable peer costs at most
//! that long per pass.

use std::time::Duration;

use async_trait::async_trait;
use survcom_core::{Node, SyncPullResponse, SyncPushRequest, SYNC_PATH};
use tracing::debug;

use crate::application::sync_directory::{SyncError, SyncTransport};

pub struct HttpSyncTransport {
    client: reqwest::Client,
}

impl HttpSyncTransport {
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error if the client cannot be built
    /// (for example when no TLS backend is available).
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn url(peer: &Node) -> String {
        format!("{}{SYNC_PATH}", peer.base_url())
    }
}

fn transport_error(peer: &Node, err: reqwest::Error) -> SyncError {
    SyncError::Transport {
        peer: peer.base_url(),
        reason: err.to_string(),
    }
}

fn check_status(peer: &Node, response: &reqwest::Response) -> Result<(), SyncError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SyncError::Status {
            peer: peer.base_url(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn pull(&self, peer: &Node) -> Result<SyncPullResponse, SyncError> {
        let url = Self::url(peer);
        debug!(%url, "pulling peer directory");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(peer, e))?;
        check_status(peer, &response)?;

        let body = response.bytes().await.map_err(|e| transport_error(peer, e))?;
        serde_json::from_slice(&body).map_err(|e| SyncError::Decode {
            peer: peer.base_url(),
            reason: e.to_string(),
        })
    }

    async fn push(&self, peer: &Node, body: &SyncPushRequest) -> Result<(), SyncError> {
        let url = Self::url(peer);
        debug!(%url, users = body.users.len(), "pushing local directory");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(peer, e))?;
        check_status(peer, &response)
    }
}
