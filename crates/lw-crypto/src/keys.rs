//! Per-artifact keys and their local stash.
//!
//! Every replicated blob is sealed once under a fresh 32-byte key. The raw
//! key is written to `keys/<first-16-hash-hex>.<ext>.fkey` (0700 directory,
//! 0600 file) so the originator can decrypt later even when the escrow
//! service is unreachable.

use anyhow::Context;
use rand::RngCore;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A per-artifact symmetric key. Zeroized on drop.
#[derive(Clone)]
pub struct ArtifactKey {
    bytes: [u8; KEY_SIZE],
}

impl ArtifactKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_b64(&self) -> String {
        use base64::Engine as _;
        crate::b64().encode(self.bytes)
    }

    pub fn from_b64(s: &str) -> anyhow::Result<Self> {
        use base64::Engine as _;
        let raw = crate::b64()
            .decode(s)
            .map_err(|_| anyhow::anyhow!("invalid key base64"))?;
        let bytes: [u8; KEY_SIZE] = raw
            .try_into()
            .map_err(|_| anyhow::anyhow!("key must be {KEY_SIZE} bytes"))?;
        Ok(Self { bytes })
    }
}

impl Drop for ArtifactKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// The on-disk stash under `keys/`.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn at(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    /// `<first-16-of-hash>.<ext>.fkey`, where `ext` is taken from the
    /// artifact name (defaulting to "bin").
    pub fn key_file_name(hash_hex: &str, artifact_name: &str) -> String {
        let short = &hash_hex[..hash_hex.len().min(16)];
        format!("{short}.{}.fkey", extension_of(artifact_name))
    }

    pub fn save(&self, file_name: &str, key: &ArtifactKey) -> anyhow::Result<PathBuf> {
        lw_core::paths::create_private_dir(&self.dir)?;
        let path = self.dir.join(file_name);
        crate::vault::write_private(&path, key.as_bytes())
            .with_context(|| format!("stashing artifact key: {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, file_name: &str) -> anyhow::Result<ArtifactKey> {
        let path = self.dir.join(file_name);
        let raw = std::fs::read(&path)
            .with_context(|| format!("reading artifact key: {}", path.display()))?;
        let bytes: [u8; KEY_SIZE] = raw
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid key file size: {}", path.display()))?;
        Ok(ArtifactKey::from_bytes(bytes))
    }
}

fn extension_of(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generate_is_random() {
        let a = ArtifactKey::generate();
        let b = ArtifactKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn b64_roundtrip() {
        let key = ArtifactKey::generate();
        let back = ArtifactKey::from_b64(&key.to_b64()).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn from_b64_rejects_wrong_length() {
        assert!(ArtifactKey::from_b64("c2hvcnQ").is_err());
        assert!(ArtifactKey::from_b64("!!!").is_err());
    }

    #[test]
    fn key_file_naming() {
        let hash = "aabbccddeeff00112233445566778899";
        assert_eq!(
            KeyStore::key_file_name(hash, "report.txt"),
            "aabbccddeeff0011.txt.fkey"
        );
        assert_eq!(KeyStore::key_file_name(hash, "no-extension"), "aabbccddeeff0011.bin.fkey");
        assert_eq!(KeyStore::key_file_name(hash, ".hidden"), "aabbccddeeff0011.bin.fkey");
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = KeyStore::at(&tmp.path().join("keys"));
        let key = ArtifactKey::generate();
        let name = KeyStore::key_file_name("0123456789abcdef0123", "a.txt");

        store.save(&name, &key).unwrap();
        let back = store.load(&name).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn load_missing_key_fails() {
        let tmp = TempDir::new().unwrap();
        let store = KeyStore::at(&tmp.path().join("keys"));
        assert!(store.load("absent.bin.fkey").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let store = KeyStore::at(&tmp.path().join("keys"));
        let path = store.save("k.bin.fkey", &ArtifactKey::generate()).unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(tmp.path().join("keys"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
