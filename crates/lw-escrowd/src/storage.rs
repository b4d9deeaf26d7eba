//! Transactional key store: SQLite rows, each key sealed under the
//! server-wide master key before it touches disk.

use base64::Engine as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use lw_core::{LwError, LwResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS file_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_hash TEXT UNIQUE NOT NULL,
    origin_node_id TEXT NOT NULL,
    key_encrypted BLOB NOT NULL,
    file_name TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_keys_node ON file_keys(origin_node_id);
CREATE INDEX IF NOT EXISTS idx_file_keys_hash ON file_keys(file_hash);
";

/// A stored key row, decrypted for the caller.
#[derive(Debug)]
pub struct KeyRecord {
    pub file_hash: String,
    pub origin_node_id: String,
    pub key_b64: String,
    pub file_name: String,
    pub created_at: i64,
}

/// A listing row: everything except key material.
#[derive(Debug, serde::Serialize)]
pub struct KeyRow {
    pub file_hash: String,
    pub origin_node_id: String,
    pub file_name: String,
    pub created_at: i64,
}

pub struct EscrowStore {
    pool: SqlitePool,
    master_key: [u8; 32],
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

impl EscrowStore {
    /// Open (creating if missing) the database at `db_path` and run the
    /// schema. Use `sqlite::memory:` for tests.
    pub async fn open(db_path: &str, master_key: [u8; 32]) -> anyhow::Result<Self> {
        let options = if db_path == "sqlite::memory:" {
            SqliteConnectOptions::from_str(db_path)?
        } else {
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, master_key })
    }

    /// Upsert a key: seal it under the master key, replace any existing row
    /// for the same hash.
    pub async fn save_key(
        &self,
        file_hash: &str,
        node_id: &str,
        key_b64: &str,
        file_name: &str,
    ) -> LwResult<()> {
        let raw_key = b64()
            .decode(key_b64)
            .map_err(|_| LwError::Protocol("key_b64 must be base64url without padding".into()))?;
        if raw_key.len() != 32 {
            return Err(LwError::Protocol("key must be 32 bytes".into()));
        }

        let sealed = lw_crypto::seal(&self.master_key, &raw_key)
            .map_err(|e| LwError::Crypto(e.to_string()))?;

        sqlx::query(
            "INSERT INTO file_keys (file_hash, origin_node_id, key_encrypted, file_name, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(file_hash) DO UPDATE SET
                 key_encrypted = excluded.key_encrypted,
                 file_name = excluded.file_name",
        )
        .bind(file_hash)
        .bind(node_id)
        .bind(&sealed)
        .bind(file_name)
        .bind(lw_core::unix_now())
        .execute(&self.pool)
        .await
        .map_err(|e| LwError::Other(e.into()))?;
        Ok(())
    }

    /// Fetch and unseal the key for `file_hash`; `None` when unknown.
    pub async fn get_key(&self, file_hash: &str) -> LwResult<Option<KeyRecord>> {
        let row = sqlx::query(
            "SELECT file_hash, origin_node_id, key_encrypted, file_name, created_at
             FROM file_keys WHERE file_hash = ?",
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LwError::Other(e.into()))?;

        let Some(row) = row else { return Ok(None) };

        let sealed: Vec<u8> = row.get("key_encrypted");
        let raw = lw_crypto::open(&self.master_key, &sealed)
            .map_err(|_| LwError::Crypto("stored key unsealing failed".into()))?;

        Ok(Some(KeyRecord {
            file_hash: row.get("file_hash"),
            origin_node_id: row.get("origin_node_id"),
            key_b64: b64().encode(&raw),
            file_name: row.get::<Option<String>, _>("file_name").unwrap_or_default(),
            created_at: row.get("created_at"),
        }))
    }

    /// All rows for `node_id`, newest first, without key material.
    pub async fn list_keys(&self, node_id: &str) -> LwResult<Vec<KeyRow>> {
        let rows = sqlx::query(
            "SELECT file_hash, origin_node_id, file_name, created_at
             FROM file_keys WHERE origin_node_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LwError::Other(e.into()))?;

        Ok(rows
            .into_iter()
            .map(|row| KeyRow {
                file_hash: row.get("file_hash"),
                origin_node_id: row.get("origin_node_id"),
                file_name: row.get::<Option<String>, _>("file_name").unwrap_or_default(),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Delete the row only when the caller's node-id matches its origin.
    /// Returns whether a row was removed.
    pub async fn delete_key(&self, file_hash: &str, node_id: &str) -> LwResult<bool> {
        let result = sqlx::query("DELETE FROM file_keys WHERE file_hash = ? AND origin_node_id = ?")
            .bind(file_hash)
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(|e| LwError::Other(e.into()))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> EscrowStore {
        EscrowStore::open("sqlite::memory:", [7u8; 32]).await.unwrap()
    }

    fn key_b64() -> String {
        b64().encode([0x42u8; 32])
    }

    #[tokio::test]
    async fn save_get_roundtrip() {
        let store = store().await;
        store.save_key("abc", "n1", &key_b64(), "doc.txt").await.unwrap();

        let rec = store.get_key("abc").await.unwrap().unwrap();
        assert_eq!(rec.key_b64, key_b64());
        assert_eq!(rec.origin_node_id, "n1");
        assert_eq!(rec.file_name, "doc.txt");
    }

    #[tokio::test]
    async fn get_unknown_hash_is_none() {
        let store = store().await;
        assert!(store.get_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = store().await;
        store.save_key("h", "n1", &key_b64(), "old.txt").await.unwrap();
        let new_key = b64().encode([0x99u8; 32]);
        store.save_key("h", "n1", &new_key, "new.txt").await.unwrap();

        let rec = store.get_key("h").await.unwrap().unwrap();
        assert_eq!(rec.key_b64, new_key);
        assert_eq!(rec.file_name, "new.txt");
        assert_eq!(store.list_keys("n1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_rejects_malformed_keys() {
        let store = store().await;
        assert!(matches!(
            store.save_key("h", "n", "not base64!!", "f").await,
            Err(LwError::Protocol(_))
        ));
        let short = b64().encode([1u8; 16]);
        assert!(matches!(
            store.save_key("h", "n", &short, "f").await,
            Err(LwError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn stored_blob_is_sealed_not_raw() {
        let store = store().await;
        store.save_key("h", "n", &key_b64(), "f").await.unwrap();

        let row = sqlx::query("SELECT key_encrypted FROM file_keys WHERE file_hash = 'h'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let sealed: Vec<u8> = row.get("key_encrypted");
        // nonce ‖ ct layout, and the raw key never appears in the blob
        assert_eq!(sealed.len(), 24 + 32 + 16);
        assert!(!sealed.windows(32).any(|w| w == [0x42u8; 32]));
    }

    #[tokio::test]
    async fn list_excludes_other_nodes() {
        let store = store().await;
        store.save_key("h1", "n1", &key_b64(), "a").await.unwrap();
        store.save_key("h2", "n1", &key_b64(), "b").await.unwrap();
        store.save_key("h3", "n2", &key_b64(), "c").await.unwrap();

        let rows = store.list_keys("n1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.origin_node_id == "n1"));
    }

    #[tokio::test]
    async fn delete_requires_matching_origin() {
        let store = store().await;
        store.save_key("h", "n1", &key_b64(), "f").await.unwrap();

        // wrong node: no effect
        assert!(!store.delete_key("h", "n2").await.unwrap());
        assert!(store.get_key("h").await.unwrap().is_some());

        // owner: removed
        assert!(store.delete_key("h", "n1").await.unwrap());
        assert!(store.get_key("h").await.unwrap().is_none());
    }
}
