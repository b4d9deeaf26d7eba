//! lw-crypto: key handling for the LanWeave mesh
//!
//! Everything symmetric is XChaCha20-Poly1305 with a random 192-bit nonce
//! prepended to the ciphertext. The key hierarchy:
//!
//! ```text
//! Passphrase (Argon2id, salt in env.enc header)
//!   └── Vault key → seals env.enc, which stores:
//!         ├── Beacon Key (32 B) — beacon datagrams only
//!         └── File Key   (32 B) — peer-snapshot file only
//! Per-artifact keys (32 B random) — one per replicated blob, stashed
//!   locally under keys/ and archived in the escrow service
//! X25519 node keypair — mix relay layers, regenerated at startup
//! ```

pub mod aead;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod vault;

pub use aead::{open, seal};
pub use identity::{MixKeypair, NodeIdentity};
pub use kdf::derive_vault_key;
pub use keys::{ArtifactKey, KeyStore};
pub use vault::{SealedVault, VaultSecrets};

/// Symmetric key size (256-bit).
pub const KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size (192-bit).
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

pub(crate) fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

/// Lowercase SHA-256 hex of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
