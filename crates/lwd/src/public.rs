//! Peer-facing HTTP surface, bound on the selected interface IP.
//!
//! Routes: `/replicate`, `/mix/relay`, `/fetch`, `/dht/put`, `/dht/get`,
//! `/p2p/command`. Everything here is reachable by any LAN host; the
//! engines' own checks (AEAD, hash, chain link, seen-set) are the trust
//! boundary.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use lw_core::types::{FinalEnvelope, ReplicateEnvelope, SyncCommand};
use lw_core::{LwError, NodeEvent};
use lw_replicate::{Admission, CommandReceipt};

use crate::respond::error_response;
use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/replicate", post(replicate))
        .route("/mix/relay", post(mix_relay))
        .route("/fetch", get(fetch))
        .route("/dht/put", post(dht_put))
        .route("/dht/get", get(dht_get))
        .route("/p2p/command", post(p2p_command))
        .with_state(state)
}

async fn replicate(
    State(state): State<SharedState>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let envelope: ReplicateEnvelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(e) => return error_response(LwError::Protocol(format!("bad envelope: {e}"))),
    };

    match state.engine.admit(envelope, Some(caller.ip())).await {
        Ok(Admission::Stored { store_key, sent, hops, tip }) => Json(json!({
            "status": "stored",
            "key": store_key,
            "sent": sent,
            "hops": hops,
            "tip": tip,
        }))
        .into_response(),
        Ok(Admission::Seen) => Json(json!({ "status": "seen" })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn mix_relay(State(state): State<SharedState>, body: Bytes) -> Response {
    let layer = match lw_mix::peel(&state.mix_keys, &body) {
        Ok(layer) => layer,
        Err(e) => {
            // packet-shape errors are the caller's fault; AEAD failure means
            // the layer was not built for this hop
            let msg = e.to_string();
            return if msg.starts_with("bad ") {
                error_response(LwError::Protocol(msg))
            } else {
                error_response(LwError::Forbidden(msg))
            };
        }
    };

    // this hop's decrement is already baked into the forwarded layer
    if layer.ttl <= 0 {
        return error_response(LwError::Protocol("ttl expired".into()));
    }

    if layer.is_terminal() {
        return deliver_final(&state, &layer.msgid, layer.inner);
    }

    // mixing jitter before the hand-off
    let jitter_ms = rand::thread_rng().gen_range(lw_mix::JITTER_MIN_MS..=lw_mix::JITTER_MAX_MS);
    tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;

    let next = layer.next.clone();
    let url = format!("http://{next}/mix/relay");
    match state.http.post(&url).body(layer.inner).send().await {
        Ok(_) => Json(json!({ "status": "forwarded", "to": next })).into_response(),
        Err(e) => {
            warn!(to = %next, "mix forward failed: {e}");
            error_response(LwError::BadGateway(format!("forward to {next} failed")))
        }
    }
}

/// Terminal-hop processing: unwrap the final envelope and stash its payload
/// in the blob cache. Unparseable payloads degrade to a raw stash.
fn deliver_final(state: &SharedState, layer_msgid: &str, inner: Vec<u8>) -> Response {
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let envelope: FinalEnvelope = match serde_json::from_slice(&inner) {
        Ok(env) => env,
        Err(_) => {
            let key = format!("mixmsg-{}", millis_now());
            debug!(%key, bytes = inner.len(), "mix final: stored raw payload");
            state.cache.put(key, inner);
            return Json(json!({ "status": "ok", "final": true, "raw": true })).into_response();
        }
    };

    match envelope.kind.as_str() {
        "text" => {
            let sealed = match b64.decode(&envelope.data_b64) {
                Ok(raw) => raw,
                Err(_) => return error_response(LwError::Protocol("bad text payload".into())),
            };
            let plain = match lw_crypto::open(&lw_mix::text_key(), &sealed) {
                Ok(p) => p,
                Err(_) => return error_response(LwError::Forbidden("text decrypt failed".into())),
            };
            state.cache.put(format!("text-{}", envelope.msgid), plain);
            state.events.publish(NodeEvent::MixDelivered {
                msgid: envelope.msgid.clone(),
                kind: "text".into(),
            });
            Json(json!({
                "status": "ok", "final": true, "type": "text", "msgid": envelope.msgid,
            }))
            .into_response()
        }
        "file" => {
            let raw = match b64.decode(&envelope.data_b64) {
                Ok(raw) => raw,
                Err(_) => return error_response(LwError::Protocol("bad file payload".into())),
            };
            state
                .cache
                .put(format!("file-{}-{}", envelope.msgid, envelope.name), raw);
            state.events.publish(NodeEvent::MixDelivered {
                msgid: envelope.msgid.clone(),
                kind: "file".into(),
            });
            Json(json!({
                "status": "ok", "final": true, "type": "file",
                "msgid": envelope.msgid, "name": envelope.name,
            }))
            .into_response()
        }
        _ => {
            state.cache.put(format!("mixmsg-{layer_msgid}"), inner);
            Json(json!({
                "status": "ok", "final": true, "type": "unknown", "msgid": envelope.msgid,
            }))
            .into_response()
        }
    }
}

#[derive(Deserialize)]
struct KeyQuery {
    key: String,
}

async fn fetch(State(state): State<SharedState>, query: Query<KeyQuery>) -> Response {
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
#[serde(deny_unknown_fields)]
struct DhtPutBody {
    key: String,
    providers: Vec<String>,
}

async fn dht_put(State(state): State<SharedState>, body: Bytes) -> Response {
    let put: DhtPutBody = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return error_response(LwError::Protocol(format!("bad dht put: {e}"))),
    };
    if put.key.is_empty() || put.providers.is_empty() {
        return error_response(LwError::Protocol("need key + providers[]".into()));
    }
    state.dht.put(&put.key, &put.providers);
    Json(json!({ "status": "ok" })).into_response()
}

async fn dht_get(State(state): State<SharedState>, query: Query<KeyQuery>) -> Response {
    Json(json!({
        "key": query.key,
        "providers": state.dht.get(&query.key),
    }))
    .into_response()
}

async fn p2p_command(State(state): State<SharedState>, body: Bytes) -> Response {
    let cmd: SyncCommand = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => return error_response(LwError::Protocol(format!("bad command: {e}"))),
    };
    let msgid = cmd.msgid.clone();
    let kind = cmd.kind.clone();
    match state.commands.receive(cmd) {
        CommandReceipt::Received => Json(json!({
            "status": "received", "type": kind, "msgid": msgid,
        }))
        .into_response(),
        CommandReceipt::Seen => Json(json!({ "status": "seen" })).into_response(),
    }
}

fn millis_now() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
