//! lw-escrowd: the LanWeave key escrow service
//!
//! Usage:
//!   lw-escrowd --master-key <key> [--port 8443] [--db keys.db]
//!              [--cert server.crt --key server.key | --http]
//!
//! Archives per-artifact symmetric keys, sealed at rest under a server-wide
//! master key. Production serves TLS 1.2+ with ECDHE AEAD suites; --http is
//! a development toggle.

mod auth;
mod config;
mod server;
mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::auth::AuthTokens;
use crate::config::{resolve_master_key, EscrowConfig};
use crate::server::ServerState;
use crate::storage::EscrowStore;

#[derive(Parser, Debug)]
#[command(name = "lw-escrowd", version, about = "LanWeave key escrow service")]
struct Cli {
    /// Listen port
    #[arg(long, default_value_t = 8443)]
    port: u16,

    /// SQLite database path
    #[arg(long, default_value = "keys.db")]
    db: String,

    /// Master key sealing stored keys (64 hex chars or a passphrase)
    #[arg(long, env = "ESCROW_MASTER_KEY", hide_env_values = true, default_value = "")]
    master_key: String,

    /// TLS certificate file
    #[arg(long, default_value = "server.crt")]
    cert: String,

    /// TLS private key file
    #[arg(long = "key", default_value = "server.key")]
    key_file: String,

    /// Comma-separated bearer tokens (empty = open mode)
    #[arg(long, env = "ESCROW_TOKENS", default_value = "")]
    tokens: String,

    /// Serve plaintext HTTP instead of TLS (dev only)
    #[arg(long)]
    http: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LW_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let master_key = resolve_master_key(&cli.master_key).map_err(|e| anyhow::anyhow!("{e}"))?;

    let auth_tokens: Vec<String> = cli
        .tokens
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if auth_tokens.is_empty() {
        warn!("no API tokens configured, running in open mode");
    } else {
        info!(count = auth_tokens.len(), "API tokens configured");
    }

    let cfg = EscrowConfig {
        port: cli.port,
        db_path: cli.db,
        cert_file: cli.cert,
        key_file: cli.key_file,
        auth_tokens,
        http_mode: cli.http,
    };

    let store = EscrowStore::open(&cfg.db_path, master_key)
        .await
        .with_context(|| format!("opening key store {}", cfg.db_path))?;
    info!(db = %cfg.db_path, "key store initialized");

    let app = server::router(
        Arc::new(ServerState { store }),
        Arc::new(AuthTokens::new(cfg.auth_tokens.clone())),
    );

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    if cfg.http_mode {
        info!(%addr, "serving plaintext HTTP (dev mode)");
        server::serve_plain(listener, app).await
    } else {
        let tls = server::tls_config(&cfg.cert_file, &cfg.key_file)
            .context("cannot start TLS server without certificates")?;
        info!(%addr, cert = %cfg.cert_file, "serving HTTPS");
        server::serve_tls(listener, TlsAcceptor::from(Arc::new(tls)), app).await
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
