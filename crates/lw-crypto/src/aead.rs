//! XChaCha20-Poly1305 seal/open with the nonce carried in-band.
//!
//! Sealed form: `[24-byte random nonce][ciphertext][16-byte tag]`. This is
//! the framing used by beacons, peer snapshots, replicated blobs, onion
//! layers, and escrowed keys alike.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Seal `plaintext` under `key` with a fresh OS-random nonce.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("seal failed: {e}"))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open `[nonce][ciphertext][tag]` produced by [`seal`].
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> anyhow::Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        anyhow::bail!(
            "sealed blob too short: {} bytes (minimum {})",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        );
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("open failed: wrong key or corrupted data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [3u8; KEY_SIZE];
        let sealed = seal(&key, b"beacon body").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"beacon body");
    }

    #[test]
    fn open_wrong_key_fails() {
        let sealed = seal(&[1u8; KEY_SIZE], b"secret").unwrap();
        assert!(open(&[2u8; KEY_SIZE], &sealed).is_err());
    }

    #[test]
    fn open_tampered_ciphertext_fails() {
        let key = [5u8; KEY_SIZE];
        let mut sealed = seal(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn open_flipped_nonce_fails() {
        let key = [5u8; KEY_SIZE];
        let mut sealed = seal(&key, b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn open_short_input_fails() {
        assert!(open(&[0u8; KEY_SIZE], &[0u8; NONCE_SIZE + TAG_SIZE - 1]).is_err());
    }

    #[test]
    fn sealed_size() {
        let key = [9u8; KEY_SIZE];
        let sealed = seal(&key, &[0u8; 100]).unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 100 + TAG_SIZE);
    }

    #[test]
    fn nonces_are_unique_per_seal() {
        let key = [7u8; KEY_SIZE];
        let a = seal(&key, b"x").unwrap();
        let b = seal(&key, b"x").unwrap();
        assert_ne!(&a[..NONCE_SIZE], &b[..NONCE_SIZE]);
    }
}
