//! Node identity: a stable machine fingerprint and the X25519 mix keypair.
//!
//! The node-id survives restarts (it is derived from machine facts, not
//! stored state) so peers can key their directories on it. The mix keypair
//! is regenerated at every startup and advertised in beacons.

use serde::Serialize;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

/// Default org salt mixed into the fingerprint; override with
/// `LANWEAVE_ORG_SALT` to partition meshes sharing hardware.
const DEFAULT_ORG_SALT: &[u8] = b"lanweave-mesh-v1";

#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Lowercase SHA-256 hex over the salted machine fingerprint.
    pub node_id: String,
    pub hostname: String,
}

#[derive(Serialize)]
struct Fingerprint {
    host: String,
    os: &'static str,
    macs: Vec<String>,
}

impl NodeIdentity {
    /// Derive the identity from hostname, OS, and the sorted set of
    /// non-loopback MAC-bearing interface names. Hex keeps XOR distance
    /// arithmetic (mix path selection) on clean big-endian integers.
    pub fn derive() -> Self {
        let hostname = hostname();
        let fp = Fingerprint {
            host: hostname.clone(),
            os: std::env::consts::OS,
            macs: interface_names(),
        };
        let canonical = serde_json::to_vec(&fp).unwrap_or_default();

        let org_salt = std::env::var("LANWEAVE_ORG_SALT")
            .map(|s| s.into_bytes())
            .unwrap_or_else(|_| DEFAULT_ORG_SALT.to_vec());

        let inner = Sha256::digest(&canonical);
        let mut outer = Sha256::new();
        outer.update(&org_salt);
        outer.update(inner);
        let node_id = hex::encode(outer.finalize());

        Self { node_id, hostname }
    }

    /// Short display form for logs.
    pub fn short_id(&self) -> &str {
        &self.node_id[..8.min(self.node_id.len())]
    }
}

/// X25519 keypair used to peel onion layers addressed to this node.
pub struct MixKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl MixKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    pub fn public_b64(&self) -> String {
        use base64::Engine as _;
        crate::b64().encode(self.public.as_bytes())
    }

    /// X25519 shared secret against a peer-supplied ephemeral public key.
    pub fn shared_secret(&self, ephemeral_pub: &[u8; 32]) -> [u8; 32] {
        let their = PublicKey::from(*ephemeral_pub);
        *self.secret.diffie_hellman(&their).as_bytes()
    }
}

impl std::fmt::Debug for MixKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixKeypair")
            .field("public", &self.public_b64())
            .finish()
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown-host".into())
}

fn interface_names() -> Vec<String> {
    let mut names: Vec<String> = if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|ifa| !ifa.is_loopback())
        .map(|ifa| ifa.name)
        .collect();
    names.sort();
    names.dedup();
    names
}
