use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level node configuration (loaded from lanweave.toml).
///
/// Immutable once constructed; engines receive it by value at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub net: NetConfig,
    pub discovery: DiscoveryConfig,
    pub escrow: EscrowClientConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Peer-facing HTTP port, bound on the selected interface IP
    pub api_port: u16,
    /// Loopback-only control HTTP port
    pub control_port: u16,
    /// HTTP bind IP override (default: the selected interface IP)
    pub bind_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// IPv4 multicast group for beacons
    pub mc_group: String,
    /// Multicast UDP port
    pub mc_port: u16,
    /// Beacon emission interval in seconds
    pub beacon_interval_secs: u64,
    /// CIDR used to choose the NIC, e.g. "192.168.1.0/24"
    pub mc_subnet: Option<String>,
    /// Interface name to force (overrides mc_subnet)
    pub mc_iface: Option<String>,
}

/// Client-side escrow settings. An empty URL disables escrow uploads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowClientConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Base storage directory (default: ~/.lanweave)
    pub base_dir: Option<PathBuf>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            api_port: 8080,
            control_port: 8081,
            bind_ip: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mc_group: "239.255.255.250".into(),
            mc_port: 35888,
            beacon_interval_secs: 3,
            mc_subnet: None,
            mc_iface: None,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}
