//! Passphrase → vault key via Argon2id.

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// Argon2id cost parameters for the vault KDF: 64 MiB, t=2, p=1.
const MEM_COST_KIB: u32 = 64 * 1024;
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;

/// The key that seals env.enc. Zeroized on drop; Debug never prints bytes.
#[derive(Clone)]
pub struct VaultKey {
    bytes: [u8; KEY_SIZE],
}

impl VaultKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Derive the vault key from a passphrase and the 16-byte salt stored in the
/// env.enc header. The salt is public; only the passphrase is secret.
pub fn derive_vault_key(passphrase: &SecretString, salt: &[u8; 16]) -> anyhow::Result<VaultKey> {
    let params = Params::new(MEM_COST_KIB, TIME_COST, PARALLELISM, Some(KEY_SIZE))
        .map_err(|e| anyhow::anyhow!("invalid Argon2id params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;

    Ok(VaultKey { bytes: key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_deterministic() {
        let pass = SecretString::from("p-1");
        let salt = [1u8; 16];
        let k1 = derive_vault_key(&pass, &salt).unwrap();
        let k2 = derive_vault_key(&pass, &salt).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn kdf_passphrase_sensitivity() {
        let salt = [1u8; 16];
        let k1 = derive_vault_key(&SecretString::from("p-1"), &salt).unwrap();
        let k2 = derive_vault_key(&SecretString::from("p-2"), &salt).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn kdf_salt_sensitivity() {
        let pass = SecretString::from("p-1");
        let k1 = derive_vault_key(&pass, &[1u8; 16]).unwrap();
        let k2 = derive_vault_key(&pass, &[2u8; 16]).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
