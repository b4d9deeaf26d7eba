//! Error-to-status mapping at the HTTP boundary.
//!
//! Engines speak `LwError`; handlers convert here and never leak internal
//! detail beyond the taxonomy's message strings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use lw_core::LwError;

pub fn error_response(err: LwError) -> Response {
    match &err {
        LwError::ChainMismatch { local_tip, prev_hash } => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "chain_mismatch",
                "local_tip": local_tip,
                "prev_hash": prev_hash,
            })),
        )
            .into_response(),
        LwError::Protocol(msg) => status_json(StatusCode::BAD_REQUEST, msg),
        LwError::NotFound(msg) => status_json(StatusCode::NOT_FOUND, msg),
        LwError::Forbidden(msg) => status_json(StatusCode::FORBIDDEN, msg),
        LwError::BadGateway(msg) => status_json(StatusCode::BAD_GATEWAY, msg),
        LwError::Crypto(msg) => status_json(StatusCode::FORBIDDEN, msg),
        LwError::Config(msg) => status_json(StatusCode::INTERNAL_SERVER_ERROR, msg),
        LwError::Io(e) => status_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        LwError::Other(e) => status_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn status_json(code: StatusCode, msg: &str) -> Response {
    (code, Json(json!({ "status": "error", "error": msg }))).into_response()
}
