//! HTTP gate middleware
//!
//! Sits in front of protected routes, asks the [`AccessPolicy`] about every
//! request and turns denials into 401 JSON bodies:
//!
//! ```json
//! {"requiresPassword": true, "message": "...", "isExternalAccess": true}
//! {"requiresPassword": true, "message": "...", "locked": true, "remainingHours": 24}
//! {"requiresPassword": true, "message": "...", "remainingAttempts": 3}
//! ```
//!
//! The credential is read from the `x-access-password` header, falling back
//! to the `password` query parameter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use warden_common::{classify, OriginClass, OriginKey, RequestId};

use crate::policy::{AccessPolicy, Decision};

/// Header carrying the shared secret
pub const CREDENTIAL_HEADER: &str = "x-access-password";

/// Header used to correlate requests with log lines
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for [`require_access`]
#[derive(Clone)]
pub struct Gate {
    policy: Arc<AccessPolicy>,
    /// Read the origin from forwarding headers instead of the socket
    trust_proxy: bool,
}

impl Gate {
    pub fn new(policy: Arc<AccessPolicy>, trust_proxy: bool) -> Self {
        Self {
            policy,
            trust_proxy,
        }
    }

    pub fn policy(&self) -> &Arc<AccessPolicy> {
        &self.policy
    }
}

/// Who is asking; attached to requests the gate lets through
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub origin: OriginKey,
    pub class: OriginClass,
}

/// Wrap every route of `router` with the gate
pub fn protect<S>(router: Router<S>, gate: Gate) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(gate, require_access))
}

/// Axum middleware enforcing the access policy
pub async fn require_access(State(gate): State<Gate>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let origin = request_origin(request.headers(), peer, gate.trust_proxy);
    let host = request_host(&request).map(str::to_string);
    let credential = request_credential(&request);

    let decision = gate
        .policy
        .authorize(&origin, host.as_deref(), credential.as_deref());

    debug!(
        origin = %origin,
        host = ?host,
        decision = %decision,
        "Gate decision"
    );

    match decision {
        Decision::Allow => {
            request.extensions_mut().insert(AccessContext {
                class: classify(&origin),
                origin: OriginKey::new(origin),
            });
            next.run(request).await
        }
        denied => deny(denied),
    }
}

/// Attach a request id (client supplied or fresh), log inside its span and
/// echo it on the response
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(RequestId::from_header)
        .unwrap_or_default();

    request.extensions_mut().insert(request_id.clone());

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Origin key for a request
///
/// The socket peer by default. Behind a trusted proxy, the first
/// `X-Forwarded-For` entry, then `X-Real-IP`, then the peer. With no peer at
/// all the origin is empty, which classifies as external.
pub fn request_origin(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        if let Some(origin) = forwarded.or_else(real_ip) {
            return origin.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_canonical().to_string())
        .unwrap_or_default()
}

/// Host header, or the URI authority for HTTP/2
fn request_host(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
}

#[derive(Debug, Deserialize)]
struct CredentialQuery {
    password: Option<String>,
}

/// Credential from the header, else the query string
fn request_credential(request: &Request) -> Option<String> {
    if let Some(value) = request
        .headers()
        .get(CREDENTIAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(value.to_string());
    }

    Query::<CredentialQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.password)
        .filter(|p| !p.is_empty())
}

// ============================================================================
// Denial bodies
// ============================================================================

/// JSON body of a 401 from the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    pub requires_password: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_external_access: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_hours: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
}

impl Denial {
    /// Body for a refusing decision; `None` for [`Decision::Allow`]
    pub fn from_decision(decision: Decision) -> Option<Self> {
        let base = Denial {
            requires_password: true,
            message: String::new(),
            is_external_access: None,
            locked: None,
            remaining_hours: None,
            remaining_attempts: None,
        };

        let denial = match decision {
            Decision::Allow => return None,
            Decision::RequireCredential { external } => Denial {
                message: if external {
                    "Password required for external access".to_string()
                } else {
                    "Password required".to_string()
                },
                is_external_access: Some(external),
                ..base
            },
            Decision::Locked { remaining_hours } => Denial {
                message: format!(
                    "Too many failed attempts, access locked. Time remaining: {} hour(s)",
                    remaining_hours
                ),
                locked: Some(true),
                remaining_hours: Some(remaining_hours),
                ..base
            },
            Decision::InvalidCredential { remaining_attempts } => Denial {
                message: format!(
                    "Incorrect password, {} attempt(s) remaining",
                    remaining_attempts
                ),
                remaining_attempts: Some(remaining_attempts),
                ..base
            },
        };
        Some(denial)
    }
}

fn deny(decision: Decision) -> Response {
    match Denial::from_decision(decision) {
        Some(body) => (StatusCode::UNAUTHORIZED, Json(body)).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn test_origin_from_peer() {
        let forwarded = headers(&[("x-forwarded-for", "10.0.0.1")]);
        assert_eq!(
            request_origin(&forwarded, peer("8.8.8.8:5000"), false),
            "8.8.8.8"
        );
        assert_eq!(
            request_origin(&HeaderMap::new(), peer("[::ffff:192.168.1.9]:5000"), false),
            "192.168.1.9"
        );
        assert_eq!(request_origin(&HeaderMap::new(), None, false), "");
    }

    #[test]
    fn test_origin_behind_trusted_proxy() {
        let forwarded = headers(&[
            ("x-forwarded-for", " 203.0.113.5 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(
            request_origin(&forwarded, peer("127.0.0.1:80"), true),
            "203.0.113.5"
        );

        let real_ip = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(
            request_origin(&real_ip, peer("127.0.0.1:80"), true),
            "198.51.100.2"
        );

        assert_eq!(
            request_origin(&HeaderMap::new(), peer("127.0.0.1:80"), true),
            "127.0.0.1"
        );
    }

    #[test]
    fn test_credential_sources() {
        let request = http::Request::builder()
            .uri("/files?password=from-query")
            .header(CREDENTIAL_HEADER, "from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_credential(&request).as_deref(), Some("from-header"));

        let request = http::Request::builder()
            .uri("/files?password=a%20b&x=1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_credential(&request).as_deref(), Some("a b"));

        let request = http::Request::builder()
            .uri("/files?password=")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_credential(&request), None);

        let request = http::Request::builder().uri("/files").body(Body::empty()).unwrap();
        assert_eq!(request_credential(&request), None);
    }

    #[test]
    fn test_host_falls_back_to_authority() {
        let request = http::Request::builder()
            .uri("https://nas.lan:3443/files")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&request), Some("nas.lan"));

        let request = http::Request::builder()
            .uri("/files")
            .header(header::HOST, "nas.lan:3000")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&request), Some("nas.lan:3000"));
    }

    #[test]
    fn test_allow_has_no_denial() {
        assert!(Denial::from_decision(Decision::Allow).is_none());
    }

    #[test]
    fn test_require_credential_body() {
        let body = Denial::from_decision(Decision::RequireCredential { external: true }).unwrap();
        insta::assert_json_snapshot!(body, @r###"
        {
          "requiresPassword": true,
          "message": "Password required for external access",
          "isExternalAccess": true
        }
        "###);
    }

    #[test]
    fn test_locked_body() {
        let body = Denial::from_decision(Decision::Locked { remaining_hours: 24 }).unwrap();
        insta::assert_json_snapshot!(body, @r###"
        {
          "requiresPassword": true,
          "message": "Too many failed attempts, access locked. Time remaining: 24 hour(s)",
          "locked": true,
          "remainingHours": 24
        }
        "###);
    }

    #[test]
    fn test_invalid_credential_body() {
        let body = Denial::from_decision(Decision::InvalidCredential {
            remaining_attempts: 3,
        })
        .unwrap();
        insta::assert_json_snapshot!(body, @r###"
        {
          "requiresPassword": true,
          "message": "Incorrect password, 3 attempt(s) remaining",
          "remainingAttempts": 3
        }
        "###);
    }
}
