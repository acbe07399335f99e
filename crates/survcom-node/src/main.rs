//! Survival Communicator node: entry point.
//!
//! Wires the stores, the background subsystems and the HTTP API together and
//! runs them on the Tokio runtime until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! survcom-node [OPTIONS]
//!
//! Options:
//!   --config <PATH>          TOML configuration file [default: survcom.toml]
//!   --name <NAME>            Node display name
//!   --port <PORT>            HTTP API and WebSocket relay port
//!   --discovery-port <PORT>  UDP discovery port
//!   --jwt-secret <SECRET>    Account token signing secret
//!   --database <PATH>        SQLite database file
//!   --sync-interval <SECS>   Directory sync period
//!   --init-config            Write the effective configuration and exit
//! ```
//!
//! Every option can also be set through the matching `SURVCOM_*` environment
//! variable.  Command-line values win over the file, the file over defaults.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config, init tracing
//!  └─ SqliteStore::open()
//!  └─ Scheduler
//!       ├─ discovery-listener   (UDP recv loop)
//!       ├─ discovery-announce   (every 60 s)
//!       └─ directory-sync       (after 10 s, every 5 min)
//!  └─ axum HTTP API + relay    (until Ctrl+C)
//! ```
//!
//! A subsystem whose socket cannot be bound is logged and left out; the rest
//! of the node keeps running.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use survcom_core::NodeId;
use survcom_node::application::directory::{DirectoryStore, PeerStore};
use survcom_node::application::relay::{ConnectionRegistry, RelayService};
use survcom_node::application::sync_directory::SyncEngine;
use survcom_node::infrastructure::auth::TokenIssuer;
use survcom_node::infrastructure::network::api::{build_router, serve_api, ApiState};
use survcom_node::infrastructure::network::discovery::{DiscoveryService, DiscoverySettings};
use survcom_node::infrastructure::network::sync_client::HttpSyncTransport;
use survcom_node::infrastructure::scheduler::Scheduler;
use survcom_node::infrastructure::storage::config::{load_config, save_config, AppConfig};
use survcom_node::infrastructure::storage::database::SqliteStore;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Survival Communicator node.
///
/// Discovers peers on the LAN, keeps the shared user directory in sync and
/// relays encrypted messages between connected users.
#[derive(Debug, Parser)]
#[command(
    name = "survcom-node",
    about = "Offline-first LAN messaging node: discovery, directory sync and relay",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "survcom.toml", env = "SURVCOM_CONFIG")]
    config: PathBuf,

    /// Display name announced to peers.
    #[arg(long, env = "SURVCOM_NODE_NAME")]
    name: Option<String>,

    /// HTTP API and relay port (also advertised in announces).
    #[arg(long, env = "SURVCOM_PORT")]
    port: Option<u16>,

    #[arg(long, env = "SURVCOM_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// SQLite database file; its directory is created if missing.
    #[arg(long, env = "SURVCOM_DATABASE")]
    database: Option<PathBuf>,

    /// Seconds between directory sync passes.
    #[arg(long, env = "SURVCOM_SYNC_INTERVAL")]
    sync_interval: Option<u64>,

    /// Secret used to sign account tokens.
    #[arg(long, env = "SURVCOM_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Write the effective configuration to `--config` and exit.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?;

        if let Some(name) = self.name {
            config.node.name = name;
        }
        if let Some(port) = self.port {
            config.network.listen_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(path) = self.database {
            config.storage.database_path = path;
        }
        if let Some(secs) = self.sync_interval {
            config.sync.interval_secs = secs;
        }
        if let Some(secret) = self.jwt_secret {
            config.auth.jwt_secret = secret;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let init_config = cli.init_config;
    let config = cli.into_app_config()?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    if init_config {
        save_config(&config_path, &config)
            .with_context(|| format!("failed to write config to {}", config_path.display()))?;
        info!("wrote configuration to {}", config_path.display());
        return Ok(());
    }

    run(config, ctrl_c()).await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => {
            error!("failed to listen for Ctrl+C signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

fn token_issuer(config: &AppConfig) -> TokenIssuer {
    if config.auth.jwt_secret.is_empty() {
        warn!("no auth.jwt_secret configured; account tokens will not survive a restart");
        TokenIssuer::with_random_secret(config.token_lifetime())
    } else {
        TokenIssuer::new(config.auth.jwt_secret.as_bytes(), config.token_lifetime())
    }
}

/// Runs the node until `shutdown` resolves.
async fn run<F>(config: AppConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = Arc::new(
        SqliteStore::open(&config.storage.database_path).with_context(|| {
            format!(
                "failed to open database {}",
                config.storage.database_path.display()
            )
        })?,
    );
    let directory: Arc<dyn DirectoryStore> = store.clone();
    let peers: Arc<dyn PeerStore> = store;

    let node_id = NodeId::generate();
    info!(node_id = %node_id, name = %config.node.name, "Survival Communicator node starting");

    let mut scheduler = Scheduler::new();

    // ── Discovery ─────────────────────────────────────────────────────────────
    let settings = DiscoverySettings {
        bind_addr: config.discovery_addr()?,
        node_name: config.node.name.clone(),
        api_port: config.network.listen_port,
    };
    match DiscoveryService::bind(settings, node_id.clone(), Arc::clone(&peers)).await {
        Ok(service) => Arc::new(service).start(&mut scheduler, config.announce_interval()),
        Err(e) => error!("peer discovery disabled: {e}"),
    }

    // ── Directory sync ────────────────────────────────────────────────────────
    let transport =
        HttpSyncTransport::new(config.request_timeout()).context("failed to build HTTP sync client")?;
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&directory),
        Arc::clone(&peers),
        Arc::new(transport),
    ));
    scheduler.spawn_repeating(
        "directory-sync",
        config.sync_initial_delay(),
        config.sync_interval(),
        move || {
            let engine = Arc::clone(&engine);
            async move {
                engine.run_pass().await;
            }
        },
    );

    // ── HTTP API and relay ────────────────────────────────────────────────────
    let state = Arc::new(ApiState {
        directory,
        peers,
        relay: Arc::new(RelayService::new(Arc::new(ConnectionRegistry::new()))),
        tokens: Arc::new(token_issuer(&config)),
        node_id,
        node_name: config.node.name.clone(),
    });

    let api_addr = config.api_addr()?;
    let served = match TcpListener::bind(api_addr).await {
        Ok(listener) => {
            info!("node ready.  Press Ctrl-C to exit.");
            serve_api(listener, build_router(state), shutdown).await
        }
        Err(e) => {
            error!("HTTP API and relay disabled: failed to bind {api_addr}: {e}");
            shutdown.await;
            Ok(())
        }
    };

    scheduler.shutdown();
    info!("Survival Communicator node stopped");
    served
}

// ── Tests ─────────────────────────────────────────────────────────────────────
