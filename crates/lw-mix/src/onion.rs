//! Onion build and peel.
//!
//! Each layer is an `OnionPacket`: a fresh ephemeral X25519 public key plus
//! an AEAD ciphertext keyed by SHA-256 of the X25519 shared secret against
//! the hop's advertised key. Layer plaintext is an `OnionLayer` whose
//! payload is the next packet, bottoming out at the final envelope bytes.

use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use lw_core::types::{OnionLayer, OnionMeta, OnionPacket};
use lw_crypto::MixKeypair;

use crate::path::Hop;

/// Result of peeling one layer at a hop.
#[derive(Debug)]
pub struct PeeledLayer {
    /// Next hop "ip:port"; empty at the terminal hop.
    pub next: String,
    /// Decoded inner bytes: the next onion packet, or the final envelope.
    pub inner: Vec<u8>,
    pub final_hop: bool,
    pub msgid: String,
    pub ttl: i32,
}

impl PeeledLayer {
    pub fn is_terminal(&self) -> bool {
        self.next.is_empty() || self.final_hop
    }
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

/// Fresh URL-safe 128-bit message id.
pub fn new_msgid() -> String {
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    b64().encode(raw)
}

/// Wrap `payload` (final envelope bytes) for the ordered path `hops`
/// (intermediates first, destination last). Returns the serialized
/// outermost packet, to be posted to `hops[0]`.
///
/// A relay cannot rewrite the downstream packet it forwards (it lacks the
/// next hop's AEAD key), so each hop's decrement is baked in here: layer i
/// carries `ttl - i`, one less than the layer enclosing it.
pub fn build_onion(hops: &[Hop], payload: &[u8], msgid: &str, ttl: i32) -> anyhow::Result<Vec<u8>> {
    if hops.is_empty() {
        anyhow::bail!("empty relay path");
    }
    if ttl < hops.len() as i32 {
        anyhow::bail!("ttl {ttl} too small for a {}-hop path", hops.len());
    }

    let mut inner = payload.to_vec();
    for i in (0..hops.len()).rev() {
        let terminal = i == hops.len() - 1;
        let layer = OnionLayer {
            next: if terminal { String::new() } else { hops[i + 1].addr.clone() },
            payload: b64().encode(&inner),
            meta: OnionMeta {
                final_hop: terminal,
                msgid: msgid.to_string(),
                ttl: ttl - i as i32,
            },
        };
        let plain = serde_json::to_vec(&layer)?;

        let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let ephemeral_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(hops[i].pubkey));
        let key = layer_key(shared.as_bytes());

        let sealed = lw_crypto::seal(&key, &plain)?;
        let packet = OnionPacket {
            ephemeral_pub: b64().encode(ephemeral_pub.as_bytes()),
            ciphertext: b64().encode(&sealed),
        };
        inner = serde_json::to_vec(&packet)?;
    }
    Ok(inner)
}

/// Peel one layer with this node's keypair. AEAD failure means the packet
/// was not built for this hop.
pub fn peel(keys: &MixKeypair, packet_bytes: &[u8]) -> anyhow::Result<PeeledLayer> {
    let packet: OnionPacket = serde_json::from_slice(packet_bytes)
        .map_err(|e| anyhow::anyhow!("bad onion packet: {e}"))?;

    let eph_raw = b64()
        .decode(&packet.ephemeral_pub)
        .map_err(|_| anyhow::anyhow!("bad ephemeral key encoding"))?;
    let eph: [u8; 32] = eph_raw
        .try_into()
        .map_err(|_| anyhow::anyhow!("bad ephemeral key length"))?;
    let sealed = b64()
        .decode(&packet.ciphertext)
        .map_err(|_| anyhow::anyhow!("bad ciphertext encoding"))?;

    let key = layer_key(&keys.shared_secret(&eph));
    let plain = lw_crypto::open(&key, &sealed)?;

    let layer: OnionLayer =
        serde_json::from_slice(&plain).map_err(|e| anyhow::anyhow!("bad onion layer: {e}"))?;
    let inner = b64()
        .decode(&layer.payload)
        .map_err(|_| anyhow::anyhow!("bad layer payload encoding"))?;

    Ok(PeeledLayer {
        next: layer.next,
        inner,
        final_hop: layer.meta.final_hop,
        msgid: layer.meta.msgid,
        ttl: layer.meta.ttl,
    })
}

/// Per-hop AEAD key: SHA-256 of the raw X25519 shared secret.
fn layer_key(shared: &[u8; 32]) -> [u8; 32] {
    Sha256::digest(shared).into()
}

/// Pre-shared key sealing text payloads end to end. Prototype scheme: a
/// fixed key derived from a domain constant, shared by every node.
pub fn text_key() -> [u8; 32] {
    use hkdf::Hkdf;
    let hk = Hkdf::<Sha256>::new(None, b"lanweave-mix-text-key-v1");
    let mut key = [0u8; 32];
    hk.expand(b"text", &mut key).expect("32 bytes is a valid HKDF length");
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use lw_core::types::FinalEnvelope;

    fn keypair_hop(addr: &str, kp: &MixKeypair, node_id: &str) -> Hop {
        Hop {
            node_id: node_id.into(),
            addr: addr.into(),
            pubkey: kp.public_bytes(),
        }
    }

    fn final_envelope() -> FinalEnvelope {
        FinalEnvelope {
            kind: "text".into(),
            sender_id: "sender".into(),
            receiver_id: "receiver".into(),
            msgid: "m-1".into(),
            name: String::new(),
            data_b64: "cGluZw".into(),
        }
    }

    #[test]
    fn three_hop_onion_peels_end_to_end() {
        let (a, b, c) = (MixKeypair::generate(), MixKeypair::generate(), MixKeypair::generate());
        let hops = vec![
            keypair_hop("10.0.0.1:8080", &a, "n-a"),
            keypair_hop("10.0.0.2:8080", &b, "n-b"),
            keypair_hop("10.0.0.3:8080", &c, "n-c"),
        ];
        let payload = serde_json::to_vec(&final_envelope()).unwrap();
        let msgid = new_msgid();
        let onion = build_onion(&hops, &payload, &msgid, 8).unwrap();

        let l1 = peel(&a, &onion).unwrap();
        assert!(!l1.is_terminal());
        assert_eq!(l1.next, "10.0.0.2:8080");
        assert_eq!(l1.msgid, msgid);
        assert_eq!(l1.ttl, 8);

        let l2 = peel(&b, &l1.inner).unwrap();
        assert!(!l2.is_terminal());
        assert_eq!(l2.next, "10.0.0.3:8080");
        assert_eq!(l2.ttl, 7);

        let l3 = peel(&c, &l2.inner).unwrap();
        assert!(l3.is_terminal());
        // one decrement per intermediate hop
        assert_eq!(l3.ttl, 6);
        let env: FinalEnvelope = serde_json::from_slice(&l3.inner).unwrap();
        assert_eq!(env.data_b64, "cGluZw");
        assert_eq!(env.sender_id, "sender");
    }

    #[test]
    fn ttl_too_small_for_path_is_rejected() {
        let (a, b, c) = (MixKeypair::generate(), MixKeypair::generate(), MixKeypair::generate());
        let hops = vec![
            keypair_hop("10.0.0.1:8080", &a, "n-a"),
            keypair_hop("10.0.0.2:8080", &b, "n-b"),
            keypair_hop("10.0.0.3:8080", &c, "n-c"),
        ];
        // the terminal layer would carry ttl - 2 <= 0
        assert!(build_onion(&hops, b"x", "m", 2).is_err());
        assert!(build_onion(&hops, b"x", "m", 3).is_ok());
    }

    #[test]
    fn wrong_hop_cannot_peel() {
        let intended = MixKeypair::generate();
        let intruder = MixKeypair::generate();
        let hops = vec![keypair_hop("10.0.0.1:8080", &intended, "n")];
        let onion = build_onion(&hops, b"payload", "m", 4).unwrap();

        assert!(peel(&intruder, &onion).is_err());
        assert!(peel(&intended, &onion).is_ok());
    }

    #[test]
    fn intermediate_never_sees_plaintext() {
        let (a, b) = (MixKeypair::generate(), MixKeypair::generate());
        let hops = vec![
            keypair_hop("10.0.0.1:8080", &a, "n-a"),
            keypair_hop("10.0.0.2:8080", &b, "n-b"),
        ];
        let payload = b"the secret body";
        let onion = build_onion(&hops, payload, "m", 4).unwrap();

        let l1 = peel(&a, &onion).unwrap();
        // what the intermediate holds is another sealed packet
        assert!(!l1
            .inner
            .windows(payload.len())
            .any(|w| w == payload.as_slice()));
    }

    #[test]
    fn corrupted_packet_is_rejected() {
        let kp = MixKeypair::generate();
        let hops = vec![keypair_hop("10.0.0.1:8080", &kp, "n")];
        let onion = build_onion(&hops, b"x", "m", 4).unwrap();

        let mut packet: OnionPacket = serde_json::from_slice(&onion).unwrap();
        let mut ct = packet.ciphertext.into_bytes();
        ct[10] = if ct[10] == b'A' { b'B' } else { b'A' };
        packet.ciphertext = String::from_utf8(ct).unwrap();
        let tampered = serde_json::to_vec(&packet).unwrap();

        assert!(peel(&kp, &tampered).is_err());
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(build_onion(&[], b"x", "m", 4).is_err());
    }

    #[test]
    fn text_key_is_stable() {
        assert_eq!(text_key(), text_key());
        let sealed = lw_crypto::seal(&text_key(), b"ping").unwrap();
        assert_eq!(lw_crypto::open(&text_key(), &sealed).unwrap(), b"ping");
    }
}
