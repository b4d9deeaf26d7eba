//! lwd: the LanWeave node daemon
//!
//! Usage:
//!   lwd [--config ~/.lanweave/lanweave.toml] [--new-net]
//!
//! The vault passphrase comes from --env-pass or LANWEAVE_PASSPHRASE; on
//! first run, pass --new-net to provision a fresh env.enc.

mod control;
mod daemon;
mod dht;
mod public;
mod respond;
mod state;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::{info, warn};

use lw_core::NodeConfig;

#[derive(Parser, Debug)]
#[command(name = "lwd", version, about = "LanWeave mesh node daemon")]
struct Cli {
    /// Path to lanweave.toml configuration file
    #[arg(long, short = 'c', env = "LANWEAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Provision a fresh env.enc (backs up any existing one)
    #[arg(long)]
    new_net: bool,

    /// Vault passphrase (prefer the environment variable)
    #[arg(long, env = "LANWEAVE_PASSPHRASE", hide_env_values = true)]
    env_pass: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LW_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "LW_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "lwd starting");

    let cfg = load_config(cli.config.as_deref()).await?;

    let Some(pass) = cli.env_pass.filter(|p| !p.is_empty()) else {
        anyhow::bail!("vault passphrase missing: supply --env-pass or set LANWEAVE_PASSPHRASE");
    };

    daemon::run(cfg, SecretString::from(pass), cli.new_net).await
}

async fn load_config(path: Option<&std::path::Path>) -> Result<NodeConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => lw_core::StoragePaths::default_base().join("lanweave.toml"),
    };
    if path.exists() {
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        warn!("config file not found: {} (using defaults)", path.display());
        Ok(NodeConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
