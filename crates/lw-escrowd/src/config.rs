//! Escrow service configuration and the master-key gate.

use sha2::{Digest, Sha256};

use lw_core::{LwError, LwResult};

#[derive(Debug, Clone)]
pub struct EscrowConfig {
    pub port: u16,
    pub db_path: String,
    pub cert_file: String,
    pub key_file: String,
    pub auth_tokens: Vec<String>,
    /// Dev toggle: serve plaintext HTTP instead of TLS.
    pub http_mode: bool,
}

/// Resolve the 32-byte master key from its configured string form.
///
/// A 64-hex-char value decodes to the raw key; anything else is hashed with
/// SHA-256. Missing or all-zero keys are a fatal startup error.
pub fn resolve_master_key(configured: &str) -> LwResult<[u8; 32]> {
    if configured.is_empty() {
        return Err(LwError::Config(
            "master key is required: use --master-key or ESCROW_MASTER_KEY".into(),
        ));
    }

    let key: [u8; 32] = if configured.len() == 64 {
        match hex::decode(configured) {
            Ok(raw) => raw.try_into().expect("64 hex chars decode to 32 bytes"),
            Err(_) => Sha256::digest(configured.as_bytes()).into(),
        }
    } else {
        Sha256::digest(configured.as_bytes()).into()
    };

    if key.iter().all(|&b| b == 0) {
        return Err(LwError::Config("master key must not be all zeros".into()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_master_key_is_fatal() {
        assert!(matches!(resolve_master_key(""), Err(LwError::Config(_))));
    }

    #[test]
    fn all_zero_master_key_is_fatal() {
        let zeros = "00".repeat(32);
        assert!(matches!(resolve_master_key(&zeros), Err(LwError::Config(_))));
    }

    #[test]
    fn hex_key_decodes_raw() {
        let hex_key = "ab".repeat(32);
        let key = resolve_master_key(&hex_key).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn passphrase_key_is_hashed() {
        let a = resolve_master_key("some passphrase").unwrap();
        let b = resolve_master_key("some passphrase").unwrap();
        let c = resolve_master_key("other passphrase").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
