//! Bearer-token gate in front of every route except `/health`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, Default)]
pub struct AuthTokens {
    tokens: Vec<String>,
}

impl AuthTokens {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    pub fn open_mode(&self) -> bool {
        self.tokens.is_empty()
    }

    fn accepts(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }
}

pub async fn bearer_auth(
    State(tokens): State<Arc<AuthTokens>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    // no tokens configured = open access (dev mode, warned at startup)
    if tokens.open_mode() {
        return next.run(request).await;
    }

    let Some(header) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return unauthorized("missing authorization");
    };

    let Some((scheme, token)) = header.split_once(' ') else {
        return unauthorized("invalid authorization format");
    };
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return unauthorized("invalid authorization format");
    }

    if !tokens.accepts(token) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "status": "error", "error": "invalid token" })),
        )
            .into_response();
    }

    next.run(request).await
}

fn unauthorized(msg: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "status": "error", "error": msg })),
    )
        .into_response()
}
