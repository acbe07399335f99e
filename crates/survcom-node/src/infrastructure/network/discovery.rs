//! UDP broadcast peer discovery.
//!
//! The node binds one UDP socket on the discovery port (default 4000) and
//! uses it for everything:
//!
//! - **Announce job**: on a fixed schedule, send an `ANNOUNCE` datagram to
//!   the broadcast address of every non-loopback IPv4 interface.
//! - **Listener**: receive datagrams, hand valid announces to
//!   [`AnnounceHandler`], and answer newcomers with a unicast announce to the
//!   datagram's source address.
//!
//! Malformed or oversized datagrams are logged at warn level and dropped.
//! Receive and send errors are logged and never stop the listener; repeated
//! receive errors back off up to [`MAX_RECV_BACKOFF`].

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use get_if_addrs::{get_if_addrs, IfAddr};
use survcom_core::protocol::MAX_DATAGRAM_SIZE;
use survcom_core::{
    decode_datagram, encode_datagram, now_millis, AnnounceMessage, DiscoveryMessage, NodeId,
    ProtocolError,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::application::directory::PeerStore;
use crate::application::discover_peers::{AnnounceHandler, AnnounceOutcome};
use crate::infrastructure::scheduler::Scheduler;

const INITIAL_RECV_BACKOFF: Duration = Duration::from_millis(100);
pub const MAX_RECV_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Broadcast could not be enabled on the socket.
    #[error("failed to configure discovery socket: {0}")]
    SocketOption(#[source] std::io::Error),

    #[error("failed to encode announce: {0}")]
    Encode(#[from] ProtocolError),

    #[error("failed to send announce to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// How this node presents itself on the discovery port.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub bind_addr: SocketAddr,
    pub node_name: String,
    /// HTTP API port advertised to peers.
    pub api_port: u16,
}

pub struct DiscoveryService {
    socket: UdpSocket,
    handler: AnnounceHandler,
    node_name: String,
    api_port: u16,
    /// Destination port for broadcasts: the port this socket is bound to.
    broadcast_port: u16,
}

impl DiscoveryService {
    /// Binds the discovery socket with broadcast enabled.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::BindFailed`] if the port is unavailable, or
    /// [`DiscoveryError::SocketOption`] if broadcast cannot be enabled.
    pub async fn bind(
        settings: DiscoverySettings,
        local_id: NodeId,
        peers: Arc<dyn PeerStore>,
    ) -> Result<Self, DiscoveryError> {
        let addr = settings.bind_addr;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket.set_broadcast(true).map_err(DiscoveryError::SocketOption)?;
        let broadcast_port = socket
            .local_addr()
            .map_err(DiscoveryError::SocketOption)?
            .port();

        info!("discovery listening on UDP {addr}");
        Ok(Self {
            socket,
            handler: AnnounceHandler::new(local_id, peers),
            node_name: settings.node_name,
            api_port: settings.api_port,
            broadcast_port,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Registers the listener and the periodic announce on `scheduler`.
    pub fn start(self: Arc<Self>, scheduler: &mut Scheduler, announce_interval: Duration) {
        let listener = Arc::clone(&self);
        scheduler.spawn_task("discovery-listener", async move {
            listener.run_listener().await;
        });
        scheduler.spawn_repeating("discovery-announce", Duration::ZERO, announce_interval, move || {
            let service = Arc::clone(&self);
            async move {
                service.broadcast_announce().await;
            }
        });
    }

    /// The announce this node currently sends.
    pub fn announce(&self) -> AnnounceMessage {
        AnnounceMessage {
            id: self.handler.local_id().clone(),
            name: self.node_name.clone(),
            port: self.api_port,
            timestamp: now_millis(),
            reply: false,
        }
    }

    /// Sends one announce to every broadcast target; returns how many sends
    /// succeeded.
    pub async fn broadcast_announce(&self) -> usize {
        let targets = broadcast_targets(self.broadcast_port);
        if targets.is_empty() {
            warn!("no IPv4 broadcast-capable interface found; announce skipped");
            return 0;
        }

        let mut sent = 0;
        for target in targets {
            match self.send_announce(target, false).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("{e}"),
            }
        }
        debug!(targets = sent, "announce broadcast");
        sent
    }

    /// Sends this node's announce to a single address.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Encode`] or [`DiscoveryError::Send`].
    pub async fn send_announce(&self, target: SocketAddr, reply: bool) -> Result<(), DiscoveryError> {
        let mut msg = self.announce();
        msg.reply = reply;
        let bytes = encode_datagram(&DiscoveryMessage::Announce(msg))?;
        self.socket
            .send_to(&bytes, target)
            .await
            .map_err(|source| DiscoveryError::Send { target, source })?;
        Ok(())
    }

    /// Receives datagrams until the task is cancelled.
    pub async fn run_listener(&self) {
        // One byte of headroom so oversized datagrams are detectable.
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        let mut consecutive_errors = 0u32;
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let pause = recv_error_backoff(consecutive_errors);
                    error!("discovery recv error: {e}; retrying in {pause:?}");
                    tokio::time::sleep(pause).await;
                    continue;
                }
            };
            consecutive_errors = 0;
            self.handle_datagram(&buf[..len], src).await;
        }
    }

    /// Processes one received datagram.  Returns `None` if it was not a
    /// valid discovery message.
    pub async fn handle_datagram(&self, datagram: &[u8], src: SocketAddr) -> Option<AnnounceOutcome> {
        let msg = match decode_datagram(datagram) {
            Ok(DiscoveryMessage::Announce(msg)) => msg,
            Err(e) => {
                warn!("dropping discovery datagram from {src}: {e}");
                return None;
            }
        };

        let outcome = self.handler.handle(&msg, src.ip(), now_millis()).await;
        if outcome.should_reply() {
            if let Err(e) = self.send_announce(src, true).await {
                warn!("{e}");
            }
        }
        Some(outcome)
    }
}

/// Pause before the next receive after `consecutive` failures in a row:
/// 100 ms, doubling, capped at [`MAX_RECV_BACKOFF`].
pub fn recv_error_backoff(consecutive: u32) -> Duration {
    let shift = consecutive.saturating_sub(1).min(16);
    INITIAL_RECV_BACKOFF
        .saturating_mul(1u32 << shift)
        .min(MAX_RECV_BACKOFF)
}

/// Broadcast addresses of all non-loopback IPv4 interfaces on `port`.
///
/// Interfaces that report no broadcast address get one derived from their
/// netmask.
pub fn broadcast_targets(port: u16) -> Vec<SocketAddr> {
    let interfaces = match get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("failed to enumerate network interfaces: {e}");
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) => Some(v4.broadcast.unwrap_or_else(|| directed_broadcast(v4.ip, v4.netmask))),
            IfAddr::V6(_) => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|ip| SocketAddr::new(IpAddr::V4(ip), port))
        .collect()
}

/// `ip | !netmask`, e.g. `192.168.1.20/24` → `192.168.1.255`.
pub fn directed_broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}
