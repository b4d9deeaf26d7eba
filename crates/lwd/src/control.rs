//! Loopback-only control surface.
//!
//! Origination, status, snapshot plumbing, and command broadcast. A guard
//! layer rejects any non-loopback remote address before dispatch; binding
//! to 127.0.0.1 is the first line, the guard is the second.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use lw_core::types::{FinalEnvelope, SyncCommand};
use lw_core::LwError;

use crate::respond::error_response;
use crate::state::SharedState;

const SEND_TEXT_CAP: usize = 1 << 20; // 1 MiB
const SEND_FILE_CAP: usize = 128 << 20; // 128 MiB

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/peers", get(peers))
        .route("/sync/status", get(sync_status))
        .route("/chain/list", get(chain_list))
        .route("/mix/send-text", post(send_text))
        .route("/mix/send-file", post(send_file))
        .route("/chunks/decrypt", get(chunks_decrypt))
        .route("/backup/get", get(backup_get))
        .route("/peers/save", get(peers_save).post(peers_save))
        .route("/peers/load", get(peers_load).post(peers_load))
        .route("/peers/publish", get(peers_publish).post(peers_publish))
        .route("/peers/fetch", get(peers_fetch).post(peers_fetch))
        .route("/command/broadcast", post(command_broadcast))
        .route("/command/pending", get(command_pending))
        .route("/env/export", get(env_export))
        .layer(DefaultBodyLimit::max(SEND_FILE_CAP))
        .layer(middleware::from_fn(loopback_guard))
        .with_state(state)
}

/// Defense in depth: even if the listener binding changes, remote callers
/// never reach a control handler.
async fn loopback_guard(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !addr.ip().is_loopback() {
        warn!(remote = %addr, "control surface rejected non-loopback caller");
        return error_response(LwError::Forbidden("local-only".into()));
    }
    next.run(request).await
}

async fn status(State(state): State<SharedState>) -> Response {
    Json(json!({
        "node_id": state.identity.node_id,
        "hostname": state.identity.hostname,
        "api_port": state.cfg.net.api_port,
        "control": true,
        "time": lw_core::unix_now(),
    }))
    .into_response()
}

async fn peers(State(state): State<SharedState>) -> Response {
    Json(state.peers.list()).into_response()
}

async fn sync_status(State(state): State<SharedState>) -> Response {
    let blocks_count = state.chain.len();
    let last_block_time = state.chain.last_block_time().ok().flatten().unwrap_or(0);
    let chunks_count = std::fs::read_dir(&state.paths.chunks_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".bin"))
                .count()
        })
        .unwrap_or(0);
    let peers_count = state.peers.len();

    Json(json!({
        "blocks_count": blocks_count,
        "chunks_count": chunks_count,
        "peers_count": peers_count,
        "chain_tip": state.chain.tip(),
        "node_id": state.identity.node_id,
        "last_block_time": last_block_time,
        "synced": peers_count > 0 || blocks_count > 0,
        "time": lw_core::unix_now(),
    }))
    .into_response()
}

async fn chain_list(State(state): State<SharedState>) -> Response {
    match state.chain.list() {
        Ok(blocks) => Json(blocks).into_response(),
        Err(e) => error_response(LwError::Other(e)),
    }
}

#[derive(Deserialize)]
struct SendTextQuery {
    to: String,
}

async fn send_text(
    State(state): State<SharedState>,
    Query(query): Query<SendTextQuery>,
    body: Bytes,
) -> Response {
    if body.len() > SEND_TEXT_CAP {
        return error_response(LwError::Protocol("text body too large".into()));
    }

    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let sealed = match lw_crypto::seal(&lw_mix::text_key(), &body) {
        Ok(s) => s,
        Err(e) => return error_response(LwError::Crypto(e.to_string())),
    };
    let msgid = lw_mix::new_msgid();
    let envelope = FinalEnvelope {
        kind: "text".into(),
        sender_id: state.identity.node_id.clone(),
        receiver_id: query.to.clone(),
        msgid: msgid.clone(),
        name: String::new(),
        data_b64: b64.encode(&sealed),
    };
    let payload = match serde_json::to_vec(&envelope) {
        Ok(p) => p,
        Err(e) => return error_response(LwError::Protocol(e.to_string())),
    };

    let hops = match lw_mix::choose_hops(
        &state.identity.node_id,
        &query.to,
        &state.peers.list(),
        lw_mix::DEFAULT_MAX_HOPS,
    ) {
        Ok(h) => h,
        Err(e) => return error_response(e),
    };
    let onion = match lw_mix::build_onion(&hops, &payload, &msgid, lw_mix::DEFAULT_TTL) {
        Ok(o) => o,
        Err(e) => return error_response(LwError::Crypto(e.to_string())),
    };

    let first = hops[0].addr.clone();
    let url = format!("http://{first}/mix/relay");
    if let Err(e) = state.http.post(&url).body(onion).send().await {
        return error_response(LwError::BadGateway(format!("inject to {first} failed: {e}")));
    }

    Json(json!({
        "status": "sent",
        "type": "text",
        "msgid": msgid,
        "first_hop": first,
        "hops": hops.len(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct SendFileQuery {
    name: String,
}

async fn send_file(
    State(state): State<SharedState>,
    Query(query): Query<SendFileQuery>,
    body: Bytes,
) -> Response {
    if query.name.is_empty() {
        return error_response(LwError::Protocol("missing ?name=<filename>".into()));
    }
    match state.engine.originate(&query.name, &body).await {
        Ok(out) => Json(json!({
            "status": "ok",
            "msgid": out.msgid,
            "name": out.name,
            "hash": out.hash_hex,
            "store_key": out.store_key,
            "fanout": out.fanout,
            "peers_seen": out.peers_seen,
            "key_file": out.key_file,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct DecryptQuery {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "keyB64")]
    key_b64: Option<String>,
    out: Option<String>,
}

async fn chunks_decrypt(
    State(state): State<SharedState>,
    Query(query): Query<DecryptQuery>,
) -> Response {
    let plain = match state
        .engine
        .decrypt_chunk(&query.hash, &query.name, query.key_b64.as_deref())
    {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    if let Some(out_name) = &query.out {
        let out_path = state.paths.chunks_dir.join(out_name);
        return match std::fs::write(&out_path, &plain) {
            Ok(()) => Json(json!({
                "status": "saved",
                "path": out_path.display().to_string(),
                "bytes": plain.len(),
            }))
            .into_response(),
            Err(e) => error_response(LwError::Io(e)),
        };
    }

    (
        StatusCode::OK,
        [("content-type", "application/octet-stream")],
        plain,
    )
        .into_response()
}

#[derive(Deserialize)]
struct KeyQuery {
    key: String,
}

async fn backup_get(State(state): State<SharedState>, Query(query): Query<KeyQuery>) -> Response {
    match state.cache.get(&query.key) {
        Some(blob) => (
            StatusCode::OK,
            [("content-type", "application/octet-stream")],
            blob,
        )
            .into_response(),
        None => error_response(LwError::NotFound(format!("key {}", query.key))),
    }
}

#[derive(Deserialize)]
struct SaveQuery {
    out: Option<String>,
}

async fn peers_save(State(state): State<SharedState>, Query(query): Query<SaveQuery>) -> Response {
    let file = query.out.as_deref().unwrap_or("peers.enc");
    let path = state.paths.base_dir.join(file);
    match lw_peers::save_snapshot(&state.peers, &path, &state.file_key) {
        Ok(count) => Json(json!({
            "status": "ok",
            "file": path.display().to_string(),
            "peers": count,
        }))
        .into_response(),
        Err(e) => error_response(LwError::Other(e)),
    }
}

#[derive(Deserialize)]
struct LoadQuery {
    #[serde(rename = "in")]
    input: Option<String>,
}

async fn peers_load(State(state): State<SharedState>, Query(query): Query<LoadQuery>) -> Response {
    let file = query.input.as_deref().unwrap_or("peers.enc");
    let path = state.paths.base_dir.join(file);
    let merged = lw_peers::load_snapshot(&state.peers, &path, &state.file_key);
    Json(json!({
        "status": "ok",
        "merged": merged,
        "from": path.display().to_string(),
    }))
    .into_response()
}

async fn peers_publish(State(state): State<SharedState>) -> Response {
    let peers = state.peers.list();
    let plain = match serde_json::to_vec(&peers) {
        Ok(p) => p,
        Err(e) => return error_response(LwError::Protocol(e.to_string())),
    };
    let sealed = match lw_crypto::seal(&state.file_key, &plain) {
        Ok(s) => s,
        Err(e) => return error_response(LwError::Crypto(e.to_string())),
    };

    let store_key = format!("peers:{}", state.identity.node_id);
    let size = sealed.len();
    state.cache.put(&store_key, sealed);
    state.dht.put(&store_key, &[state.identity.node_id.clone()]);

    Json(json!({ "status": "ok", "dht_key": store_key, "size": size })).into_response()
}

#[derive(Deserialize)]
struct FetchQuery {
    from: String,
}

async fn peers_fetch(State(state): State<SharedState>, Query(query): Query<FetchQuery>) -> Response {
    let store_key = format!("peers:{}", query.from);
    let providers = state.dht.get(&store_key);
    let Some(provider) = providers.first() else {
        return error_response(LwError::NotFound(format!("no providers for {store_key}")));
    };

    let Some(addr) = state
        .peers
        .list()
        .into_iter()
        .find(|p| &p.node_id == provider && !p.addr.is_empty())
        .map(|p| p.addr)
    else {
        return error_response(LwError::Protocol("provider address unknown".into()));
    };

    let url = format!("http://{addr}/fetch?key={store_key}");
    let sealed = match state.http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.bytes().await {
            Ok(b) => b,
            Err(e) => return error_response(LwError::BadGateway(e.to_string())),
        },
        Ok(resp) => {
            return error_response(LwError::BadGateway(format!(
                "provider fetch failed: http {}",
                resp.status()
            )))
        }
        Err(e) => return error_response(LwError::BadGateway(e.to_string())),
    };

    let plain = match lw_crypto::open(&state.file_key, &sealed) {
        Ok(p) => p,
        Err(_) => return error_response(LwError::Forbidden("snapshot decrypt failed".into())),
    };
    let records: Vec<lw_core::types::PeerRecord> = match serde_json::from_slice(&plain) {
        Ok(r) => r,
        Err(e) => return error_response(LwError::Protocol(format!("bad snapshot: {e}"))),
    };
    let merged = state.peers.merge(records);

    Json(json!({ "status": "ok", "merged": merged, "from_provider": addr })).into_response()
}

async fn command_broadcast(State(state): State<SharedState>, body: Bytes) -> Response {
    let cmd: SyncCommand = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => return error_response(LwError::Protocol(format!("bad command: {e}"))),
    };
    match state.commands.broadcast(cmd).await {
        Ok((stamped, sent)) => Json(json!({
            "status": "broadcast",
            "type": stamped.kind,
            "msgid": stamped.msgid,
            "sent": sent,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn command_pending(State(state): State<SharedState>) -> Response {
    match state.commands.take_pending() {
        Some(cmd) => Json(json!({ "status": "pending", "command": cmd })).into_response(),
        None => Json(json!({ "status": "none" })).into_response(),
    }
}

async fn env_export(State(state): State<SharedState>) -> Response {
    match std::fs::read(&state.paths.env_enc) {
        Ok(data) => (
            StatusCode::OK,
            [
                ("content-type", "application/octet-stream"),
                ("content-disposition", "attachment; filename=env.enc"),
            ],
            data,
        )
            .into_response(),
        Err(_) => error_response(LwError::NotFound("env.enc".into())),
    }
}
