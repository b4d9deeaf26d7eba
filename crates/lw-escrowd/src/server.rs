//! Escrow HTTP surface and the TLS/plaintext serving loops.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use lw_core::LwError;

use crate::auth::{bearer_auth, AuthTokens};
use crate::storage::EscrowStore;

pub struct ServerState {
    pub store: EscrowStore,
}

pub fn router(state: Arc<ServerState>, tokens: Arc<AuthTokens>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/keys/save", post(save_key))
        .route("/keys/get", get(get_key))
        .route("/keys/list", get(list_keys))
        .route("/keys/delete", delete(delete_key))
        .layer(middleware::from_fn_with_state(tokens, bearer_auth))
        .with_state(state)
}

async fn health() -> Response {
    Json(json!({ "status": "ok", "service": "lw-escrowd" })).into_response()
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SaveBody {
    hash: String,
    key_b64: String,
    node_id: String,
    #[serde(default)]
    name: String,
}

async fn save_key(State(state): State<Arc<ServerState>>, body: axum::body::Bytes) -> Response {
    let req: SaveBody = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return status_error(StatusCode::BAD_REQUEST, &format!("invalid JSON: {e}"));
        }
    };
    if req.hash.is_empty() || req.key_b64.is_empty() || req.node_id.is_empty() {
        return status_error(
            StatusCode::BAD_REQUEST,
            "missing required fields: hash, key_b64, node_id",
        );
    }

    match state
        .store
        .save_key(&req.hash, &req.node_id, &req.key_b64, &req.name)
        .await
    {
        Ok(()) => {
            info!(hash = %req.hash, node = %req.node_id, name = %req.name, "key saved");
            Json(json!({ "status": "ok", "hash": req.hash })).into_response()
        }
        Err(LwError::Protocol(msg)) => status_error(StatusCode::BAD_REQUEST, &msg),
        Err(e) => {
            warn!("save failed: {e}");
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save key")
        }
    }
}

#[derive(Deserialize)]
struct HashQuery {
    hash: String,
}

async fn get_key(State(state): State<Arc<ServerState>>, Query(query): Query<HashQuery>) -> Response {
    match state.store.get_key(&query.hash).await {
        Ok(Some(rec)) => Json(json!({
            "status": "ok",
            "hash": rec.file_hash,
            "key_b64": rec.key_b64,
            "name": rec.file_name,
            "node_id": rec.origin_node_id,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "not_found", "hash": query.hash })),
        )
            .into_response(),
        Err(e) => {
            warn!("get failed: {e}");
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to retrieve key")
        }
    }
}

#[derive(Deserialize)]
struct NodeQuery {
    node_id: String,
}

async fn list_keys(State(state): State<Arc<ServerState>>, Query(query): Query<NodeQuery>) -> Response {
    match state.store.list_keys(&query.node_id).await {
        Ok(rows) => Json(json!({
            "status": "ok",
            "node_id": query.node_id,
            "count": rows.len(),
            "keys": rows,
        }))
        .into_response(),
        Err(e) => {
            warn!("list failed: {e}");
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list keys")
        }
    }
}

#[derive(Deserialize)]
struct DeleteQuery {
    hash: String,
    node_id: String,
}

async fn delete_key(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    match state.store.delete_key(&query.hash, &query.node_id).await {
        Ok(true) => {
            info!(hash = %query.hash, node = %query.node_id, "key deleted");
            Json(json!({ "status": "ok", "hash": query.hash })).into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "not_found",
                "error": "key not found or not owned by this node",
            })),
        )
            .into_response(),
        Err(e) => {
            warn!("delete failed: {e}");
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete key")
        }
    }
}

fn status_error(code: StatusCode, msg: &str) -> Response {
    (code, Json(json!({ "status": "error", "error": msg }))).into_response()
}

/// Plaintext serving loop (dev mode).
pub async fn serve_plain(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app).await.context("escrow http server")
}

/// TLS serving loop: accept, handshake, hand the stream to hyper with the
/// router as the service. Suite and version restrictions happen in
/// [`tls_config`].
pub async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, app: Router) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("escrow accept")?;
        let acceptor = acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%peer, "tls handshake failed: {e}");
                    return;
                }
            };

            let service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                use tower::ServiceExt as _;
                app.clone().oneshot(request.map(axum::body::Body::new))
            });

            let io = hyper_util::rt::TokioIo::new(tls_stream);
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                warn!(%peer, "connection error: {e}");
            }
        });
    }
}

/// Restricted rustls server config: TLS 1.2 minimum, ECDHE AEAD suites only.
pub fn tls_config(cert_path: &str, key_path: &str) -> Result<rustls::ServerConfig> {
    use rustls::crypto::aws_lc_rs::cipher_suite as suites;

    let certs = {
        let mut reader = std::io::BufReader::new(
            std::fs::File::open(cert_path).with_context(|| format!("opening cert {cert_path}"))?,
        );
        rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("parsing certificate chain")?
    };
    let key = {
        let mut reader = std::io::BufReader::new(
            std::fs::File::open(key_path).with_context(|| format!("opening key {key_path}"))?,
        );
        rustls_pemfile::private_key(&mut reader)
            .context("parsing private key")?
            .ok_or_else(|| anyhow::anyhow!("no private key in {key_path}"))?
    };

    let provider = rustls::crypto::CryptoProvider {
        cipher_suites: vec![
            suites::TLS13_AES_128_GCM_SHA256,
            suites::TLS13_AES_256_GCM_SHA384,
            suites::TLS13_CHACHA20_POLY1305_SHA256,
            suites::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            suites::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            suites::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            suites::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            suites::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            suites::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        ],
        ..rustls::crypto::aws_lc_rs::default_provider()
    };

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .context("tls protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("tls certificate")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt as _;

    async fn test_router(tokens: Vec<String>) -> Router {
        let store = EscrowStore::open("sqlite::memory:", [5u8; 32]).await.unwrap();
        router(
            Arc::new(ServerState { store }),
            Arc::new(AuthTokens::new(tokens)),
        )
    }

    fn key_b64() -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode([9u8; 32])
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn save_request(token: Option<&str>) -> axum::http::Request<axum::body::Body> {
        let body = serde_json::json!({
            "hash": "abc123", "key_b64": key_b64(), "node_id": "n1", "name": "doc.txt",
        });
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/keys/save")
            .header("content-type", "application/json");
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {t}"));
        }
        builder
            .body(axum::body::Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn save_then_get_returns_exact_key() {
        let app = test_router(vec![]).await;

        let resp = app.clone().oneshot(save_request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/keys/get?hash=abc123")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["key_b64"], key_b64());
        assert_eq!(json["node_id"], "n1");
    }

    #[tokio::test]
    async fn get_unknown_hash_is_404() {
        let app = test_router(vec![]).await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/keys/get?hash=nope")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["status"], "not_found");
    }

    #[tokio::test]
    async fn auth_gate_and_health_bypass() {
        let app = test_router(vec!["secret-token".into()]).await;

        // missing token
        let resp = app.clone().oneshot(save_request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // wrong token
        let resp = app.clone().oneshot(save_request(Some("wrong"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // right token
        let resp = app
            .clone()
            .oneshot(save_request(Some("secret-token")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // health bypasses auth entirely
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_enforces_ownership() {
        let app = test_router(vec![]).await;
        app.clone().oneshot(save_request(None)).await.unwrap();

        // wrong node: 404, key survives
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("DELETE")
                    .uri("/keys/delete?hash=abc123&node_id=n2")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/keys/get?hash=abc123")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // owner: deleted, then gone
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("DELETE")
                    .uri("/keys/delete?hash=abc123&node_id=n1")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/keys/get?hash=abc123")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_omits_key_material() {
        let app = test_router(vec![]).await;
        app.clone().oneshot(save_request(None)).await.unwrap();

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/keys/list?node_id=n1")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["count"], 1);
        assert!(json["keys"][0].get("key_b64").is_none());
        assert_eq!(json["keys"][0]["file_hash"], "abc123");
    }

    #[tokio::test]
    async fn save_rejects_bad_body() {
        let app = test_router(vec![]).await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/keys/save")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from("{\"hash\":\"h\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
