//! Routers served by the listeners
//!
//! - `GET /health`: public liveness probe
//! - `GET /api/session`: behind the gate, reports how the caller was admitted
//!
//! The redirect router answers everything on the plain port with a 301 to
//! the HTTPS port when TLS is up.

use axum::extract::{Extension, State};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::gate::{assign_request_id, protect, AccessContext, Gate};

/// Application router with the gate applied to `/api`
pub fn router(gate: Gate) -> Router {
    let protected = protect(Router::new().route("/api/session", get(session)), gate);

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    authorized: bool,
    is_external_access: bool,
    origin: String,
}

async fn session(Extension(context): Extension<AccessContext>) -> Json<SessionInfo> {
    Json(SessionInfo {
        authorized: true,
        is_external_access: context.class.is_external(),
        origin: context.origin.to_string(),
    })
}

// ============================================================================
// HTTP to HTTPS redirect
// ============================================================================

/// Router sending every request to the same path on `https_port`
pub fn redirect_router(https_port: u16) -> Router {
    Router::new()
        .fallback(redirect_to_https)
        .with_state(https_port)
        .layer(TraceLayer::new_for_http())
}

async fn redirect_to_https(State(https_port): State<u16>, headers: HeaderMap, uri: Uri) -> Response {
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let location = format!("https://{}:{}{}", host_without_port(host), https_port, path);

    match HeaderValue::from_str(&location) {
        Ok(value) => {
            debug!(location = %location, "Redirecting to HTTPS");
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response()
        }
        Err(_) => (StatusCode::BAD_REQUEST, "invalid Host header").into_response(),
    }
}

/// Strip a trailing `:port`, keeping bracketed IPv6 literals intact
pub fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
