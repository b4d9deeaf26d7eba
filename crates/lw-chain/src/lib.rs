//! lw-chain: the per-node append-only chain log.
//!
//! Blocks are persisted as line-delimited JSON under `chain/chain.jsonl`;
//! the tip is the hash of the most recently appended block. Append and tip
//! reads share one mutex, so a (read-tip, append) pair observed by the
//! replication engine is linearizable. No rollback, no pruning.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;

use lw_core::types::Block;

#[derive(Debug)]
pub struct ChainLog {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    log_path: PathBuf,
    tip: String,
    blocks: usize,
}

impl ChainLog {
    /// Open (or start) the log at `log_path`, scanning existing lines to
    /// recover the tip. Unparseable trailing lines are an error: a chain
    /// whose history cannot be read must not silently fork.
    pub fn open(log_path: &Path) -> anyhow::Result<Self> {
        let mut tip = String::new();
        let mut blocks = 0usize;
        if log_path.exists() {
            let data = std::fs::read_to_string(log_path)
                .with_context(|| format!("reading chain log: {}", log_path.display()))?;
            for line in data.lines().filter(|l| !l.trim().is_empty()) {
                let block: Block = serde_json::from_str(line)
                    .with_context(|| format!("corrupt chain line in {}", log_path.display()))?;
                tip = block.hash;
                blocks += 1;
            }
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                log_path: log_path.to_path_buf(),
                tip,
                blocks,
            }),
        })
    }

    /// Hash of the most recently appended block; empty string before the
    /// first append.
    pub fn tip(&self) -> String {
        self.inner.lock().expect("chain poisoned").tip.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("chain poisoned").blocks
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one block and advance the tip. Serialized; the caller is
    /// responsible for having checked `block.prev_hash` against `tip()`
    /// under its own admission discipline.
    pub fn append(&self, block: &Block) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("chain poisoned");

        if let Some(parent) = inner.log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating chain dir: {}", parent.display()))?;
        }
        let mut line = serde_json::to_vec(block)?;
        line.push(b'\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.log_path)
            .with_context(|| format!("opening chain log: {}", inner.log_path.display()))?;
        file.write_all(&line)
            .with_context(|| format!("appending to chain log: {}", inner.log_path.display()))?;

        inner.tip = block.hash.clone();
        inner.blocks += 1;
        Ok(())
    }

    /// All blocks in append order (re-read from disk; the log is the source
    /// of truth).
    pub fn list(&self) -> anyhow::Result<Vec<Block>> {
        let inner = self.inner.lock().expect("chain poisoned");
        if !inner.log_path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&inner.log_path)?;
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }

    /// Created-unix of the last block, for status reporting.
    pub fn last_block_time(&self) -> anyhow::Result<Option<i64>> {
        Ok(self.list()?.last().map(|b| b.created_unix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block(hash: &str, prev: &str) -> Block {
        Block {
            hash: hash.into(),
            prev_hash: prev.into(),
            name: "a.txt".into(),
            size: 5,
            created_unix: 100,
            origin_id: "origin".into(),
        }
    }

    #[test]
    fn fresh_log_has_empty_tip() {
        let tmp = TempDir::new().unwrap();
        let chain = ChainLog::open(&tmp.path().join("chain/chain.jsonl")).unwrap();
        assert_eq!(chain.tip(), "");
        assert!(chain.is_empty());
    }

    #[test]
    fn append_advances_tip_and_links() {
        let tmp = TempDir::new().unwrap();
        let chain = ChainLog::open(&tmp.path().join("chain/chain.jsonl")).unwrap();

        chain.append(&block("h1", "")).unwrap();
        assert_eq!(chain.tip(), "h1");
        chain.append(&block("h2", "h1")).unwrap();
        assert_eq!(chain.tip(), "h2");

        let blocks = chain.list().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].prev_hash, blocks[0].hash);
    }

    #[test]
    fn reopen_recovers_tip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chain/chain.jsonl");
        {
            let chain = ChainLog::open(&path).unwrap();
            chain.append(&block("h1", "")).unwrap();
            chain.append(&block("h2", "h1")).unwrap();
        }
        let reopened = ChainLog::open(&path).unwrap();
        assert_eq!(reopened.tip(), "h2");
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn corrupt_line_fails_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chain.jsonl");
        std::fs::write(&path, "{\"not\": \"a block\"}\n").unwrap();
        assert!(ChainLog::open(&path).is_err());
    }

    #[test]
    fn last_block_time_tracks_latest() {
        let tmp = TempDir::new().unwrap();
        let chain = ChainLog::open(&tmp.path().join("chain.jsonl")).unwrap();
        assert_eq!(chain.last_block_time().unwrap(), None);
        let mut b = block("h1", "");
        b.created_unix = 777;
        chain.append(&b).unwrap();
        assert_eq!(chain.last_block_time().unwrap(), Some(777));
    }
}
