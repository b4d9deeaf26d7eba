//! Wire records exchanged between nodes.
//!
//! Every record here crosses a trust boundary, so schemas are strict:
//! unknown fields are rejected at deserialization and mapped to a protocol
//! error at the HTTP surface.

use serde::{Deserialize, Serialize};

/// Advertised by every node in encrypted multicast beacons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Beacon {
    /// Always "beacon"
    #[serde(rename = "type")]
    pub kind: String,
    pub node_id: String,
    pub api_port: u16,
    pub hostname: String,
    pub ts: i64,
    /// X25519 mix public key, base64url no-pad (32 bytes)
    pub pubkey: String,
}

/// One entry in the peer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub node_id: String,
    /// "ip:api_port" of the peer-facing HTTP surface
    pub addr: String,
    pub api_port: u16,
    pub hostname: String,
    /// Unix seconds of the most recent sighting; never moves backwards
    pub last_seen: i64,
    /// X25519 mix public key, base64url no-pad; empty when unknown
    #[serde(default)]
    pub pubkey_b64: String,
}

impl PeerRecord {
    /// Decoded 32-byte mix public key, if present and well-formed.
    pub fn pubkey(&self) -> Option<[u8; 32]> {
        use base64::Engine as _;
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&self.pubkey_b64)
            .ok()?;
        raw.try_into().ok()
    }
}

/// One hash-linked entry in the local chain log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub prev_hash: String,
    pub name: String,
    pub size: usize,
    pub created_unix: i64,
    pub origin_id: String,
}

/// The exact blob propagated between peers; the ciphertext is immutable
/// once emitted and receivers never re-encrypt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicateEnvelope {
    pub msgid: String,
    pub origin_id: String,
    pub name: String,
    /// Lowercase SHA-256 hex of the ciphertext bytes
    pub hash_hex: String,
    /// Originator's chain tip at the time of emission
    pub prev_hash: String,
    /// base64url no-pad of nonce ‖ ciphertext
    pub cipher_b64: String,
    pub created_unix: i64,
    pub hops: u32,
}

/// Command fanned out over the peer mesh (encrypt/decrypt a folder).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncCommand {
    /// "encrypt" or "decrypt"
    #[serde(rename = "type")]
    pub kind: String,
    pub folder_path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub origin_node: String,
    #[serde(default)]
    pub msgid: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// One onion layer on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnionPacket {
    /// base64url no-pad, 32 bytes
    pub ephemeral_pub: String,
    /// base64url no-pad of nonce ‖ ciphertext
    pub ciphertext: String,
}

/// Decrypted content of one onion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnionLayer {
    /// Next hop "ip:port", empty at the terminal hop
    pub next: String,
    /// base64url no-pad of the inner onion or the final envelope
    pub payload: String,
    pub meta: OnionMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnionMeta {
    #[serde(rename = "final")]
    pub final_hop: bool,
    pub msgid: String,
    pub ttl: i32,
}

/// What the terminal hop unwraps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalEnvelope {
    /// "text" or "file"
    #[serde(rename = "type")]
    pub kind: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub msgid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// base64url no-pad payload: sealed text or raw file bytes
    pub data_b64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rejects_unknown_fields() {
        let json = r#"{
            "msgid": "m", "origin_id": "o", "name": "n", "hash_hex": "h",
            "prev_hash": "", "cipher_b64": "c", "created_unix": 1,
            "hops": 0, "enckey_b64": "legacy"
        }"#;
        assert!(serde_json::from_str::<ReplicateEnvelope>(json).is_err());
    }

    #[test]
    fn sync_command_defaults() {
        let cmd: SyncCommand =
            serde_json::from_str(r#"{"type":"encrypt","folder_path":"/tmp/x"}"#).unwrap();
        assert_eq!(cmd.kind, "encrypt");
        assert!(!cmd.recursive);
        assert!(cmd.msgid.is_empty());
    }

    #[test]
    fn peer_record_pubkey_roundtrip() {
        use base64::Engine as _;
        let pk = [7u8; 32];
        let rec = PeerRecord {
            node_id: "n".into(),
            addr: "10.0.0.2:8080".into(),
            api_port: 8080,
            hostname: "host".into(),
            last_seen: 0,
            pubkey_b64: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(pk),
        };
        assert_eq!(rec.pubkey(), Some(pk));

        let none = PeerRecord {
            pubkey_b64: String::new(),
            ..rec
        };
        assert_eq!(none.pubkey(), None);
    }
}
