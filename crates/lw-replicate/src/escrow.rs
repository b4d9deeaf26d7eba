//! HTTP client for the key escrow service.
//!
//! Uploads each artifact key under its ciphertext hash so a blob can be
//! recovered on another machine; reads it back during decrypt. All calls
//! carry the configured bearer token and a 30-second deadline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use lw_core::{LwError, LwResult};

const ESCROW_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct EscrowClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SaveKeyRequest<'a> {
    hash: &'a str,
    key_b64: &'a str,
    node_id: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct EscrowKey {
    pub status: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub key_b64: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EscrowKeyRow {
    pub file_hash: String,
    pub origin_node_id: String,
    #[serde(default)]
    pub file_name: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct EscrowList {
    pub status: String,
    pub node_id: String,
    pub count: usize,
    pub keys: Vec<EscrowKeyRow>,
}

impl EscrowClient {
    pub fn new(base_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ESCROW_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            client,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn save_key(
        &self,
        hash: &str,
        key_b64: &str,
        node_id: &str,
        name: &str,
    ) -> LwResult<()> {
        let url = format!("{}/keys/save", self.base_url);
        let body = SaveKeyRequest { hash, key_b64, node_id, name };
        let resp = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| LwError::BadGateway(format!("escrow save: {e}")))?;
        if !resp.status().is_success() {
            return Err(LwError::BadGateway(format!(
                "escrow save: http {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn get_key(&self, hash: &str) -> LwResult<EscrowKey> {
        let url = format!("{}/keys/get", self.base_url);
        let resp = self
            .authed(self.client.get(&url).query(&[("hash", hash)]))
            .send()
            .await
            .map_err(|e| LwError::BadGateway(format!("escrow get: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LwError::NotFound(format!("escrow key for {hash}")));
        }
        if !resp.status().is_success() {
            return Err(LwError::BadGateway(format!("escrow get: http {}", resp.status())));
        }
        resp.json()
            .await
            .map_err(|e| LwError::BadGateway(format!("escrow get body: {e}")))
    }

    pub async fn list_keys(&self, node_id: &str) -> LwResult<EscrowList> {
        let url = format!("{}/keys/list", self.base_url);
        let resp = self
            .authed(self.client.get(&url).query(&[("node_id", node_id)]))
            .send()
            .await
            .map_err(|e| LwError::BadGateway(format!("escrow list: {e}")))?;
        if !resp.status().is_success() {
            return Err(LwError::BadGateway(format!("escrow list: http {}", resp.status())));
        }
        resp.json()
            .await
            .map_err(|e| LwError::BadGateway(format!("escrow list body: {e}")))
    }

    pub async fn delete_key(&self, hash: &str, node_id: &str) -> LwResult<()> {
        let url = format!("{}/keys/delete", self.base_url);
        let resp = self
            .authed(
                self.client
                    .delete(&url)
                    .query(&[("hash", hash), ("node_id", node_id)]),
            )
            .send()
            .await
            .map_err(|e| LwError::BadGateway(format!("escrow delete: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LwError::NotFound(format!("escrow key for {hash}")));
        }
        if !resp.status().is_success() {
            return Err(LwError::BadGateway(format!(
                "escrow delete: http {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn health(&self) -> LwResult<bool> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LwError::BadGateway(format!("escrow health: {e}")))?;
        Ok(resp.status().is_success())
    }
}
