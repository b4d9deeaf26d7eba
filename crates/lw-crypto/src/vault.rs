//! Sealed vault: the passphrase-protected env.enc file.
//!
//! File layout (byte-exact, stable across machines):
//! ```text
//! "MENV1" (5 B) ‖ salt (16 B) ‖ nonce (24 B) ‖ plaintext-len (4 B BE) ‖ ct
//! ```
//! The plaintext is a two-field JSON record carrying the base64url-encoded
//! Beacon Key and File Key. The length prefix is reserved framing; readers
//! skip it.

use anyhow::Context;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use lw_core::{LwError, LwResult};

use crate::kdf::derive_vault_key;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

const MAGIC: &[u8; 5] = b"MENV1";
const SALT_SIZE: usize = 16;
const HEADER_SIZE: usize = 5 + SALT_SIZE + NONCE_SIZE + 4;

/// The two long-lived symmetric keys. Zeroized on drop.
pub struct VaultSecrets {
    pub beacon_key: [u8; KEY_SIZE],
    pub file_key: [u8; KEY_SIZE],
}

impl Drop for VaultSecrets {
    fn drop(&mut self) {
        self.beacon_key.zeroize();
        self.file_key.zeroize();
    }
}

impl std::fmt::Debug for VaultSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSecrets")
            .field("beacon_key", &"[REDACTED]")
            .field("file_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct VaultRecord {
    beacon_key_b64: String,
    file_key_b64: String,
}

/// Handle on the env.enc file.
#[derive(Debug, Clone)]
pub struct SealedVault {
    path: PathBuf,
}

impl SealedVault {
    pub fn at(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generate two fresh 32-byte keys and write the sealed file.
    ///
    /// Fails when the file already exists unless `overwrite` is set, in
    /// which case the old file is renamed to an `env.enc.backup` sibling
    /// first.
    pub fn provision(&self, passphrase: &SecretString, overwrite: bool) -> LwResult<VaultSecrets> {
        if self.path.exists() {
            if !overwrite {
                return Err(LwError::Config(format!(
                    "vault already exists: {} (pass overwrite to replace)",
                    self.path.display()
                )));
            }
            let backup = self.path.with_extension("enc.backup");
            std::fs::rename(&self.path, &backup)
                .with_context(|| format!("backing up vault to {}", backup.display()))
                .map_err(LwError::Other)?;
        }

        let mut secrets = VaultSecrets {
            beacon_key: [0u8; KEY_SIZE],
            file_key: [0u8; KEY_SIZE],
        };
        rand::rngs::OsRng.fill_bytes(&mut secrets.beacon_key);
        rand::rngs::OsRng.fill_bytes(&mut secrets.file_key);

        self.write_sealed(passphrase, &secrets)?;
        Ok(secrets)
    }

    /// Parse, authenticate, and decrypt the sealed file.
    pub fn open(&self, passphrase: &SecretString) -> LwResult<VaultSecrets> {
        let raw = std::fs::read(&self.path)
            .with_context(|| format!("reading vault: {}", self.path.display()))
            .map_err(LwError::Other)?;

        if raw.len() < HEADER_SIZE + TAG_SIZE {
            return Err(LwError::Crypto("vault file too short".into()));
        }
        if &raw[..5] != MAGIC {
            return Err(LwError::Crypto("bad vault magic".into()));
        }

        let mut offset = 5;
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&raw[offset..offset + SALT_SIZE]);
        offset += SALT_SIZE;
        let nonce = XNonce::from_slice(&raw[offset..offset + NONCE_SIZE]);
        offset += NONCE_SIZE;
        offset += 4; // reserved plaintext-length prefix
        let ct = &raw[offset..];

        let key = derive_vault_key(passphrase, &salt).map_err(LwError::Other)?;
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
        let mut plain = cipher
            .decrypt(nonce, ct)
            .map_err(|_| LwError::Crypto("vault decrypt failed (wrong passphrase?)".into()))?;

        let record: VaultRecord = serde_json::from_slice(&plain)
            .map_err(|e| LwError::Crypto(format!("corrupt vault record: {e}")))?;
        plain.zeroize();

        let mut secrets = VaultSecrets {
            beacon_key: [0u8; KEY_SIZE],
            file_key: [0u8; KEY_SIZE],
        };
        decode_key(&record.beacon_key_b64, &mut secrets.beacon_key, "beacon key")?;
        decode_key(&record.file_key_b64, &mut secrets.file_key, "file key")?;
        Ok(secrets)
    }

    /// Re-seal existing secrets with a fresh salt and nonce (passphrase
    /// rotation keeps the same keys).
    pub fn reseal(&self, passphrase: &SecretString, secrets: &VaultSecrets) -> LwResult<()> {
        self.write_sealed(passphrase, secrets)
    }

    fn write_sealed(&self, passphrase: &SecretString, secrets: &VaultSecrets) -> LwResult<()> {
        let b64 = crate::b64();
        let record = VaultRecord {
            beacon_key_b64: b64.encode(secrets.beacon_key),
            file_key_b64: b64.encode(secrets.file_key),
        };
        let mut plain = serde_json::to_vec(&record).map_err(|e| LwError::Crypto(e.to_string()))?;

        let mut salt = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let key = derive_vault_key(passphrase, &salt).map_err(LwError::Other)?;
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
        let ct = cipher
            .encrypt(XNonce::from_slice(&nonce_bytes), plain.as_slice())
            .map_err(|e| LwError::Crypto(format!("vault seal failed: {e}")))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + ct.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&(plain.len() as u32).to_be_bytes());
        out.extend_from_slice(&ct);
        plain.zeroize();

        write_private(&self.path, &out).map_err(LwError::Other)?;
        Ok(())
    }
}

fn decode_key(b64_str: &str, out: &mut [u8; KEY_SIZE], what: &str) -> LwResult<()> {
    let raw = crate::b64()
        .decode(b64_str)
        .map_err(|_| LwError::Crypto(format!("invalid {what} in vault")))?;
    if raw.len() != KEY_SIZE {
        return Err(LwError::Crypto(format!("invalid {what} length in vault")));
    }
    out.copy_from_slice(&raw);
    Ok(())
}

/// Write `data` to `path` world-unreadable (0600 on unix).
pub(crate) fn write_private(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("setting mode on {}", path.display()))?;
    }
    Ok(())
}
