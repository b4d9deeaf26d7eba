//! Relay path selection by XOR distance.
//!
//! Intermediate hops are the peers furthest from the local node-id in XOR
//! space, which spreads traffic away from the originator's neighborhood;
//! the destination is always the terminal hop.

use lw_core::types::PeerRecord;
use lw_core::{LwError, LwResult};

/// One usable hop: a peer with a known address and mix public key.
#[derive(Debug, Clone)]
pub struct Hop {
    pub node_id: String,
    pub addr: String,
    pub pubkey: [u8; 32],
}

impl Hop {
    fn of(record: &PeerRecord) -> Option<Self> {
        let pubkey = record.pubkey()?;
        if record.addr.is_empty() {
            return None;
        }
        Some(Self {
            node_id: record.node_id.clone(),
            addr: record.addr.clone(),
            pubkey,
        })
    }
}

/// XOR distance between two node-ids, as big-endian byte strings.
///
/// Hex-encoded ids are compared on their decoded bytes; anything else falls
/// back to raw ASCII. Shorter operands are left-padded with zeros. Returns
/// the XOR as bytes; lexicographic comparison of equal-length arrays is
/// numeric comparison.
pub fn xor_distance(a: &str, b: &str) -> Vec<u8> {
    let ax = decode_id(a);
    let bx = decode_id(b);
    let n = ax.len().max(bx.len());
    let ax = left_pad(ax, n);
    let bx = left_pad(bx, n);
    ax.iter().zip(bx.iter()).map(|(x, y)| x ^ y).collect()
}

fn decode_id(id: &str) -> Vec<u8> {
    if id.len() % 2 == 0 && !id.is_empty() {
        if let Ok(raw) = hex::decode(id) {
            return raw;
        }
    }
    id.as_bytes().to_vec()
}

fn left_pad(mut bytes: Vec<u8>, n: usize) -> Vec<u8> {
    if bytes.len() >= n {
        return bytes;
    }
    let mut padded = vec![0u8; n - bytes.len()];
    padded.append(&mut bytes);
    padded
}

/// Select up to `max_hops` hops ending at `dest_id`.
///
/// The destination must be a known peer with a 32-byte public key. The
/// remaining candidates are sorted by descending XOR distance from
/// `self_id`; the top `max_hops - 1` become intermediates, destination
/// appended last. Self and key-less peers never appear on the path.
pub fn choose_hops(
    self_id: &str,
    dest_id: &str,
    peers: &[PeerRecord],
    max_hops: usize,
) -> LwResult<Vec<Hop>> {
    let max_hops = max_hops.max(1);

    let mut dest: Option<Hop> = None;
    let mut candidates: Vec<Hop> = Vec::with_capacity(peers.len());
    for record in peers {
        if record.node_id == self_id {
            continue;
        }
        let Some(hop) = Hop::of(record) else { continue };
        if record.node_id == dest_id {
            dest = Some(hop);
        } else {
            candidates.push(hop);
        }
    }

    let dest = dest.ok_or_else(|| {
        LwError::NotFound(format!("destination {dest_id} not found among peers"))
    })?;

    candidates.sort_by(|a, b| {
        xor_distance(self_id, &b.node_id).cmp(&xor_distance(self_id, &a.node_id))
    });
    candidates.truncate(max_hops - 1);
    candidates.push(dest);
    Ok(candidates)
}
