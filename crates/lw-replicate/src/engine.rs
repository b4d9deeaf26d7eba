//! The replication engine: originate, admit, forward.
//!
//! Blob lifecycle on a node: unknown → accepted (block appended, ciphertext
//! persisted) → forwarded (fanout attempted once per sender). Admission and
//! origination serialize their (read-tip, append) pair behind one async
//! mutex; fanout happens after it is released, one task per peer.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use lw_chain::ChainLog;
use lw_core::types::{Block, PeerRecord, ReplicateEnvelope};
use lw_core::{EventBus, LwError, LwResult, NodeEvent, StoragePaths};
use lw_crypto::{ArtifactKey, KeyStore};
use lw_peers::PeerDirectory;

use crate::escrow::EscrowClient;
use crate::seen::SeenSet;
use crate::store::BlobCache;

/// Per-peer forward deadline during fanout.
const FANOUT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReplicationEngine {
    self_id: String,
    paths: StoragePaths,
    chain: Arc<ChainLog>,
    peers: Arc<PeerDirectory>,
    cache: Arc<BlobCache>,
    seen: SeenSet,
    keys: KeyStore,
    escrow: Option<EscrowClient>,
    events: EventBus,
    client: reqwest::Client,
    /// Serializes (read-tip, verify, append, persist) across admissions.
    admit_lock: Mutex<()>,
}

/// Outcome of a peer-to-peer admission.
#[derive(Debug)]
pub enum Admission {
    Stored {
        store_key: String,
        sent: usize,
        hops: u32,
        tip: String,
    },
    /// Duplicate msg-id: idempotent no-op.
    Seen,
}

/// Outcome of a local origination.
#[derive(Debug)]
pub struct OriginateOutcome {
    pub msgid: String,
    pub name: String,
    pub hash_hex: String,
    pub store_key: String,
    pub fanout: usize,
    pub peers_seen: usize,
    pub key_file: String,
}

impl ReplicationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: String,
        paths: StoragePaths,
        chain: Arc<ChainLog>,
        peers: Arc<PeerDirectory>,
        cache: Arc<BlobCache>,
        escrow: Option<EscrowClient>,
        events: EventBus,
    ) -> anyhow::Result<Self> {
        let keys = KeyStore::at(&paths.keys_dir);
        let client = reqwest::Client::builder().timeout(FANOUT_TIMEOUT).build()?;
        Ok(Self {
            self_id,
            paths,
            chain,
            peers,
            cache,
            seen: SeenSet::new(),
            keys,
            escrow,
            events,
            client,
            admit_lock: Mutex::new(()),
        })
    }

    pub fn tip(&self) -> String {
        self.chain.tip()
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Seal `plaintext` once under a fresh artifact key, link it into the
    /// chain, persist the ciphertext, and fan the envelope out to every
    /// known peer. Origination succeeds iff the local chunk write and chain
    /// append succeed; escrow upload and fanout are best-effort.
    pub async fn originate(&self, name: &str, plaintext: &[u8]) -> LwResult<OriginateOutcome> {
        let artifact_key = ArtifactKey::generate();
        let cipher = lw_crypto::seal(artifact_key.as_bytes(), plaintext)
            .map_err(|e| LwError::Crypto(e.to_string()))?;
        let hash_hex = lw_crypto::sha256_hex(&cipher);

        let key_file = KeyStore::key_file_name(&hash_hex, name);
        if let Err(e) = self.keys.save(&key_file, &artifact_key) {
            warn!(hash = %hash_hex, "artifact key stash failed: {e}");
        }
        if let Some(escrow) = &self.escrow {
            if let Err(e) = escrow
                .save_key(&hash_hex, &artifact_key.to_b64(), &self.self_id, name)
                .await
            {
                warn!(hash = %hash_hex, "escrow upload failed: {e}");
            }
        }

        // ciphertext first: a failed chunk write must leave the chain alone
        std::fs::write(self.paths.chunk_file(&hash_hex), &cipher)?;
        set_private(&self.paths.chunk_file(&hash_hex))?;

        let msgid = crate::new_msgid();
        let envelope;
        {
            let _guard = self.admit_lock.lock().await;
            let prev_hash = self.chain.tip();
            envelope = ReplicateEnvelope {
                msgid: msgid.clone(),
                origin_id: self.self_id.clone(),
                name: name.to_string(),
                hash_hex: hash_hex.clone(),
                prev_hash,
                cipher_b64: b64().encode(&cipher),
                created_unix: lw_core::unix_now(),
                hops: 0,
            };
            self.chain
                .append(&block_of(&envelope, cipher.len()))
                .map_err(LwError::Other)?;
        }
        self.seen.insert(&msgid);

        let store_key = BlobCache::blob_key(&hash_hex, name);
        let env_bytes = serde_json::to_vec(&envelope).map_err(|e| LwError::Protocol(e.to_string()))?;
        self.cache.put(&store_key, env_bytes.clone());

        let peers_seen = self.peers.len();
        let fanout = self.fanout(env_bytes, None).await;

        debug!(hash = %hash_hex, name, fanout, "blob originated");
        self.events.publish(NodeEvent::BlobOriginated {
            hash_hex: hash_hex.clone(),
            name: name.to_string(),
            fanout,
        });

        Ok(OriginateOutcome {
            msgid,
            name: name.to_string(),
            hash_hex,
            store_key,
            fanout,
            peers_seen,
            key_file,
        })
    }

    /// Admission pipeline for an envelope received from a peer.
    ///
    /// The seen-set is consulted only after the chain-link check so an
    /// out-of-order envelope still earns the precise chain-mismatch answer.
    pub async fn admit(
        &self,
        mut envelope: ReplicateEnvelope,
        caller_ip: Option<IpAddr>,
    ) -> LwResult<Admission> {
        let (store_key, env_bytes, hops, tip) = {
            let _guard = self.admit_lock.lock().await;

            let local_tip = self.chain.tip();
            if envelope.prev_hash != local_tip {
                return Err(LwError::ChainMismatch {
                    local_tip,
                    prev_hash: envelope.prev_hash,
                });
            }

            if !self.seen.insert(&envelope.msgid) {
                return Ok(Admission::Seen);
            }

            let cipher = b64()
                .decode(&envelope.cipher_b64)
                .map_err(|_| LwError::Protocol("bad cipher base64".into()))?;
            if lw_crypto::sha256_hex(&cipher) != envelope.hash_hex {
                return Err(LwError::Protocol("hash mismatch".into()));
            }

            self.chain
                .append(&block_of(&envelope, cipher.len()))
                .map_err(LwError::Other)?;

            let chunk_path = self.paths.chunk_file(&envelope.hash_hex);
            std::fs::write(&chunk_path, &cipher)?;
            set_private(&chunk_path)?;

            envelope.hops += 1;
            let store_key = BlobCache::blob_key(&envelope.hash_hex, &envelope.name);
            let env_bytes =
                serde_json::to_vec(&envelope).map_err(|e| LwError::Protocol(e.to_string()))?;
            self.cache.put(&store_key, env_bytes.clone());

            (store_key, env_bytes, envelope.hops, self.chain.tip())
        };

        self.events.publish(NodeEvent::BlobAccepted {
            hash_hex: envelope.hash_hex.clone(),
            name: envelope.name.clone(),
            origin_id: envelope.origin_id.clone(),
        });

        let sent = self.fanout(env_bytes, caller_ip).await;
        debug!(hash = %envelope.hash_hex, sent, hops, "blob admitted and forwarded");

        Ok(Admission::Stored { store_key, sent, hops, tip })
    }

    /// Forward the serialized envelope to every known peer except self and
    /// (for admissions) the caller. One task per peer; failures are logged
    /// and the next peer is still attempted.
    async fn fanout(&self, env_bytes: Vec<u8>, exclude_ip: Option<IpAddr>) -> usize {
        let targets: Vec<PeerRecord> = self
            .peers
            .list()
            .into_iter()
            .filter(|p| p.node_id != self.self_id && !p.addr.is_empty())
            .filter(|p| match exclude_ip {
                Some(ip) => peer_ip(p) != Some(ip),
                None => true,
            })
            .collect();

        let mut handles = Vec::with_capacity(targets.len());
        for peer in targets {
            let client = self.client.clone();
            let body = env_bytes.clone();
            handles.push(tokio::spawn(async move {
                let url = format!("http://{}/replicate", peer.addr);
                match client
                    .post(&url)
                    .header("content-type", "application/json")
                    .body(body)
                    .send()
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(addr = %peer.addr, "replicate forward failed: {e}");
                        false
                    }
                }
            }));
        }

        let mut sent = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                sent += 1;
            }
        }
        sent
    }

    /// Local decrypt: load `chunks/<hash>.bin`, open it with either the
    /// supplied key or the stashed key file for this hash+extension.
    pub fn decrypt_chunk(
        &self,
        hash_hex: &str,
        name: &str,
        key_b64: Option<&str>,
    ) -> LwResult<Vec<u8>> {
        let chunk_path = self.paths.chunk_file(hash_hex);
        let cipher = std::fs::read(&chunk_path)
            .map_err(|_| LwError::NotFound(format!("chunk {hash_hex}")))?;

        let key = match key_b64 {
            Some(b64_str) => ArtifactKey::from_b64(b64_str)
                .map_err(|_| LwError::Protocol("bad keyB64".into()))?,
            None => {
                let file_name = KeyStore::key_file_name(hash_hex, name);
                self.keys
                    .load(&file_name)
                    .map_err(|_| LwError::NotFound(format!("key file {file_name}")))?
            }
        };

        lw_crypto::open(key.as_bytes(), &cipher)
            .map_err(|_| LwError::Forbidden("decrypt failed".into()))
    }

    pub fn chunk_path(&self, hash_hex: &str) -> std::path::PathBuf {
        self.paths.chunk_file(hash_hex)
    }
}

fn block_of(envelope: &ReplicateEnvelope, size: usize) -> Block {
    Block {
        hash: envelope.hash_hex.clone(),
        prev_hash: envelope.prev_hash.clone(),
        name: envelope.name.clone(),
        size,
        created_unix: envelope.created_unix,
        origin_id: envelope.origin_id.clone(),
    }
}

fn peer_ip(peer: &PeerRecord) -> Option<IpAddr> {
    peer.addr.rsplit_once(':')?.0.parse().ok()
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

fn set_private(path: &std::path::Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
