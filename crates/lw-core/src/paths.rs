//! On-disk layout under the per-user base directory.
//!
//! ```text
//! ~/.lanweave/
//!   env.enc          sealed vault (BeaconKey + FileKey)
//!   peers.enc        sealed peer snapshot
//!   chunks/<hash>.bin persisted ciphertexts
//!   chain/chain.jsonl append-only chain log
//!   keys/<hash16>.<ext>.fkey stashed artifact keys
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub base_dir: PathBuf,
    pub env_enc: PathBuf,
    pub peers_enc: PathBuf,
    pub chunks_dir: PathBuf,
    pub chain_dir: PathBuf,
    pub keys_dir: PathBuf,
}

impl StoragePaths {
    /// Resolve the layout under `base` and create the directories that must
    /// exist before the engines start. `chunks/` and the base itself are
    /// created 0700; `keys/` is created lazily by the key store.
    pub fn init(base: &Path) -> Result<Self> {
        let paths = Self::under(base);
        create_private_dir(&paths.base_dir)?;
        create_private_dir(&paths.chunks_dir)?;
        create_private_dir(&paths.chain_dir)?;
        Ok(paths)
    }

    /// Layout only, no directory creation. Used by tests and read paths.
    pub fn under(base: &Path) -> Self {
        Self {
            base_dir: base.to_path_buf(),
            env_enc: base.join("env.enc"),
            peers_enc: base.join("peers.enc"),
            chunks_dir: base.join("chunks"),
            chain_dir: base.join("chain"),
            keys_dir: base.join("keys"),
        }
    }

    /// Default base directory: `~/.lanweave`.
    pub fn default_base() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join(".lanweave")
    }

    pub fn chunk_file(&self, hash_hex: &str) -> PathBuf {
        self.chunks_dir.join(format!("{hash_hex}.bin"))
    }

    pub fn chain_log(&self) -> PathBuf {
        self.chain_dir.join("chain.jsonl")
    }
}

pub fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating directory: {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("setting mode on: {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("store");
        let paths = StoragePaths::init(&base).unwrap();

        assert!(paths.chunks_dir.is_dir());
        assert!(paths.chain_dir.is_dir());
        assert_eq!(paths.env_enc, base.join("env.enc"));
        assert_eq!(paths.chunk_file("abcd"), base.join("chunks/abcd.bin"));
        assert_eq!(paths.chain_log(), base.join("chain/chain.jsonl"));
    }

    #[cfg(unix)]
    #[test]
    fn directories_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let paths = StoragePaths::init(&tmp.path().join("s")).unwrap();
        let mode = std::fs::metadata(&paths.chunks_dir)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
