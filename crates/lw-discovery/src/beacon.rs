//! Beacon wire codec.
//!
//! Datagram layout: `"MIXB1"` (5 B) ‖ nonce (24 B) ‖ AEAD ciphertext of the
//! JSON beacon record, sealed under the Beacon Key. Anything that fails the
//! magic check or the AEAD open is foreign traffic and is dropped without
//! comment.

use lw_core::types::Beacon;
use lw_crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

const MAGIC: &[u8; 5] = b"MIXB1";

pub fn seal_beacon(beacon: &Beacon, beacon_key: &[u8; KEY_SIZE]) -> anyhow::Result<Vec<u8>> {
    let plain = serde_json::to_vec(beacon)?;
    let sealed = lw_crypto::seal(beacon_key, &plain)?;

    let mut out = Vec::with_capacity(MAGIC.len() + sealed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn open_beacon(datagram: &[u8], beacon_key: &[u8; KEY_SIZE]) -> anyhow::Result<Beacon> {
    if datagram.len() <= MAGIC.len() + NONCE_SIZE + TAG_SIZE {
        anyhow::bail!("datagram too short");
    }
    if &datagram[..MAGIC.len()] != MAGIC {
        anyhow::bail!("bad magic");
    }
    let plain = lw_crypto::open(beacon_key, &datagram[MAGIC.len()..])?;
    let beacon: Beacon = serde_json::from_slice(&plain)?;
    if beacon.kind != "beacon" {
        anyhow::bail!("unexpected record type: {}", beacon.kind);
    }
    Ok(beacon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Beacon {
        Beacon {
            kind: "beacon".into(),
            node_id: "aa".repeat(32),
            api_port: 8080,
            hostname: "host-1".into(),
            ts: 1_700_000_000,
            pubkey: "cHVi".into(),
        }
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = [1u8; KEY_SIZE];
        let pkt = seal_beacon(&sample(), &key).unwrap();
        let beacon = open_beacon(&pkt, &key).unwrap();
        assert_eq!(beacon.node_id, sample().node_id);
        assert_eq!(beacon.api_port, 8080);
    }

    #[test]
    fn wire_prefix_is_magic() {
        let pkt = seal_beacon(&sample(), &[1u8; KEY_SIZE]).unwrap();
        assert_eq!(&pkt[..5], b"MIXB1");
    }

    #[test]
    fn open_rejects_wrong_key() {
        let pkt = seal_beacon(&sample(), &[1u8; KEY_SIZE]).unwrap();
        assert!(open_beacon(&pkt, &[2u8; KEY_SIZE]).is_err());
    }

    #[test]
    fn open_rejects_any_flipped_ciphertext_byte() {
        let key = [1u8; KEY_SIZE];
        let pkt = seal_beacon(&sample(), &key).unwrap();
        for i in 5..pkt.len() {
            let mut bad = pkt.clone();
            bad[i] ^= 0x80;
            assert!(open_beacon(&bad, &key).is_err(), "byte {i} accepted");
        }
    }

    #[test]
    fn open_rejects_bad_magic_and_short_input() {
        let key = [1u8; KEY_SIZE];
        let mut pkt = seal_beacon(&sample(), &key).unwrap();
        pkt[0] = b'Z';
        assert!(open_beacon(&pkt, &key).is_err());
        assert!(open_beacon(&pkt[..10], &key).is_err());
    }

    #[test]
    fn open_rejects_non_beacon_record() {
        let key = [1u8; KEY_SIZE];
        let mut b = sample();
        b.kind = "probe".into();
        let pkt = seal_beacon(&b, &key).unwrap();
        assert!(open_beacon(&pkt, &key).is_err());
    }
}
