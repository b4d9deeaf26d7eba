//! Sealed peer-snapshot persistence.
//!
//! On-disk layout: `nonce (24 B) ‖ AEAD ciphertext` of a JSON list of peer
//! records, sealed under the vault File Key. Startup load is best-effort:
//! a missing, truncated, or tampered file logs and leaves the directory
//! empty.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lw_core::types::PeerRecord;
use lw_crypto::KEY_SIZE;

use crate::directory::PeerDirectory;

/// How often the directory is re-sealed to disk.
const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Seal the current directory contents to `path`. Empty directories are
/// skipped so a fresh node does not clobber a snapshot from a prior run.
pub fn save_snapshot(
    dir: &PeerDirectory,
    path: &Path,
    file_key: &[u8; KEY_SIZE],
) -> anyhow::Result<usize> {
    let peers = dir.list();
    if peers.is_empty() {
        debug!("peer snapshot skipped: directory empty");
        return Ok(0);
    }

    let plain = serde_json::to_vec(&peers)?;
    let sealed = lw_crypto::seal(file_key, &plain)?;
    std::fs::write(path, &sealed)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(peers.len())
}

/// Best-effort restore at startup; returns how many peers were merged.
pub fn load_snapshot(dir: &PeerDirectory, path: &Path, file_key: &[u8; KEY_SIZE]) -> usize {
    let sealed = match std::fs::read(path) {
        Ok(data) => data,
        // missing on first run is normal
        Err(_) => return 0,
    };
    let plain = match lw_crypto::open(file_key, &sealed) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %path.display(), "peer snapshot unreadable, starting empty: {e}");
            return 0;
        }
    };
    let peers: Vec<PeerRecord> = match serde_json::from_slice(&plain) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %path.display(), "peer snapshot corrupt, starting empty: {e}");
            return 0;
        }
    };
    let n = dir.merge(peers);
    info!(count = n, path = %path.display(), "restored peer snapshot");
    n
}

/// Long-lived task: save immediately, then every five minutes until
/// cancelled, with a final save on the way out.
pub async fn autosave_loop(
    dir: Arc<PeerDirectory>,
    path: std::path::PathBuf,
    file_key: [u8; KEY_SIZE],
    cancel: CancellationToken,
) {
    save_once(&dir, &path, &file_key);

    let mut ticker = tokio::time::interval(AUTOSAVE_INTERVAL);
    ticker.tick().await; // consume the immediate first tick
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                save_once(&dir, &path, &file_key);
                return;
            }
            _ = ticker.tick() => save_once(&dir, &path, &file_key),
        }
    }
}

fn save_once(dir: &PeerDirectory, path: &Path, file_key: &[u8; KEY_SIZE]) {
    match save_snapshot(dir, path, file_key) {
        Ok(0) => {}
        Ok(n) => debug!(count = n, path = %path.display(), "peer snapshot saved"),
        Err(e) => warn!(path = %path.display(), "peer snapshot save failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(node_id: &str) -> PeerRecord {
        PeerRecord {
            node_id: node_id.into(),
            addr: "10.0.0.9:8080".into(),
            api_port: 8080,
            hostname: "h".into(),
            last_seen: 42,
            pubkey_b64: String::new(),
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("peers.enc");
        let key = [4u8; KEY_SIZE];

        let dir = PeerDirectory::new();
        dir.upsert(record("a"));
        dir.upsert(record("b"));
        assert_eq!(save_snapshot(&dir, &path, &key).unwrap(), 2);

        let restored = PeerDirectory::new();
        assert_eq!(load_snapshot(&restored, &path, &key), 2);
        assert_eq!(restored.get("a").unwrap().last_seen, 42);
    }

    #[test]
    fn empty_directory_is_not_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("peers.enc");
        let dir = PeerDirectory::new();
        assert_eq!(save_snapshot(&dir, &path, &[0u8; KEY_SIZE]).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = PeerDirectory::new();
        assert_eq!(load_snapshot(&dir, &tmp.path().join("absent.enc"), &[0u8; KEY_SIZE]), 0);
        assert!(dir.is_empty());
    }

    #[test]
    fn load_wrong_key_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("peers.enc");
        let dir = PeerDirectory::new();
        dir.upsert(record("a"));
        save_snapshot(&dir, &path, &[1u8; KEY_SIZE]).unwrap();

        let restored = PeerDirectory::new();
        assert_eq!(load_snapshot(&restored, &path, &[2u8; KEY_SIZE]), 0);
        assert!(restored.is_empty());
    }

    #[test]
    fn load_truncated_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("peers.enc");
        std::fs::write(&path, [0u8; 10]).unwrap();
        let dir = PeerDirectory::new();
        assert_eq!(load_snapshot(&dir, &path, &[0u8; KEY_SIZE]), 0);
    }
}
