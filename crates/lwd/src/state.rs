//! Shared state handed to both HTTP routers.

use std::sync::Arc;

use lw_chain::ChainLog;
use lw_core::{EventBus, NodeConfig, StoragePaths};
use lw_crypto::{MixKeypair, NodeIdentity, KEY_SIZE};
use lw_peers::PeerDirectory;
use lw_replicate::{BlobCache, CommandCenter, ReplicationEngine};

use crate::dht::ProviderTable;

pub struct AppState {
    pub cfg: NodeConfig,
    pub identity: NodeIdentity,
    pub mix_keys: MixKeypair,
    pub peers: Arc<PeerDirectory>,
    pub chain: Arc<ChainLog>,
    pub cache: Arc<BlobCache>,
    pub engine: ReplicationEngine,
    pub commands: Arc<CommandCenter>,
    pub dht: ProviderTable,
    pub events: EventBus,
    pub paths: StoragePaths,
    /// Vault File Key: seals peer snapshots, including published ones.
    pub file_key: [u8; KEY_SIZE],
    /// Shared client for mix forwards and snapshot fetches (10 s deadline).
    pub http: reqwest::Client,
}

pub type SharedState = Arc<AppState>;
