//! # Bridge HTTP API
//!
//! Builds the axum router that exposes one side of the bridge. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path      | Description                                    |
//! |--------|-----------|------------------------------------------------|
//! | GET    | `/health` | Liveness probe                                 |
//! | POST   | `/bridge` | Action endpoint, dispatched on `action`        |
//!
//! ## Status codes for `POST /bridge`
//!
//! | Outcome                                    | Code |
//! |--------------------------------------------|------|
//! | `verified`, signed payload, status, unblock | 200 |
//! | `rejected` or `tampered` verdict           | 403  |
//! | missing or wrong bridge token (any action) | 403  |
//! | malformed request                          | 400  |
//!
//! Malformed and unauthenticated requests never reach the verification
//! pipeline, so they leave no audit entry.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use nexus_bridge::config::{HEADER_BRIDGE_TOKEN, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use nexus_bridge::wire::{
    parse_ip, BridgeRequest, ErrorBody, IncomingPayload, OutgoingPayload, UnblockResponse,
};
use nexus_bridge::{Bridge, BridgeError, SourceInfo};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The bridge this node fronts.
    pub bridge: Arc<Bridge>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Whether `x-forwarded-for` is believed.
    pub trust_forwarded: bool,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all routes, CORS, and tracing.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so
/// the handler can see the peer address.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/bridge", post(bridge_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Transport metadata
// ---------------------------------------------------------------------------

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// The client IP: first `x-forwarded-for` hop when trusted, else the peer.
fn source_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> Option<IpAddr> {
    if trust_forwarded {
        let forwarded = header_string(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next().and_then(|hop| hop.trim().parse().ok()));
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer.map(|addr| addr.ip())
}

/// The host part of the `Origin` header. `None` for absent, opaque
/// (`null`) or IP-literal origins.
fn origin_domain(headers: &HeaderMap) -> Option<String> {
    let origin = header_string(headers, "origin")?;
    let rest = origin.split_once("://").map(|(_, r)| r).unwrap_or(origin.as_str());
    let authority = rest.split('/').next()?;
    if authority.starts_with('[') || authority == "null" {
        return None;
    }
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

/// Maps a pre-pipeline error to its HTTP response and metric.
fn refuse(state: &AppState, action: &str, err: BridgeError) -> Response {
    if matches!(err, BridgeError::Unauthenticated) {
        state.metrics.unauthenticated_total.inc();
        warn!(action, "bridge token rejected");
        error_response(StatusCode::FORBIDDEN, err.to_string())
    } else {
        state.metrics.malformed_total.inc();
        debug!(action, error = %err, "malformed bridge request");
        error_response(StatusCode::BAD_REQUEST, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
///
/// This is the liveness probe for orchestrators (k8s, systemd, etc.).
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /bridge`: parses the envelope and dispatches on `action`.
///
/// The body is taken as raw bytes rather than `Json<_>` so a malformed
/// envelope gets the same `{error}` body as every other refusal.
async fn bridge_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match BridgeRequest::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return refuse(&state, "unknown", e),
    };
    let token = header_string(&headers, HEADER_BRIDGE_TOKEN);
    let action = request.action();

    match request {
        BridgeRequest::VerifyIncoming { payload } => {
            let peer = connect_info.map(|ConnectInfo(addr)| addr);
            let source = SourceInfo::new(
                source_ip(&headers, peer, state.trust_forwarded),
                origin_domain(&headers),
            )
            .with_endpoint(action)
            .with_payload_size(body.len());
            verify_incoming(&state, token.as_deref(), &headers, payload, source)
        }
        BridgeRequest::SignOutgoing { payload } => sign_outgoing(&state, token.as_deref(), payload),
        BridgeRequest::BridgeStatus { limit } => bridge_status(&state, token.as_deref(), limit),
        BridgeRequest::AdminUnblock { ip } => admin_unblock(&state, token.as_deref(), &ip),
    }
}

fn verify_incoming(
    state: &AppState,
    token: Option<&str>,
    headers: &HeaderMap,
    payload: IncomingPayload,
    source: SourceInfo,
) -> Response {
    if let Err(e) = state.bridge.check_token(token) {
        return refuse(state, "verify_incoming", e);
    }

    let signed = match payload
        .with_header_fallback(
            header_string(headers, HEADER_SIGNATURE),
            header_string(headers, HEADER_NONCE),
            header_string(headers, HEADER_TIMESTAMP),
        )
        .into_signed()
    {
        Ok(s) => s,
        Err(e) => return refuse(state, "verify_incoming", e),
    };

    let timer = state.metrics.verification_latency_seconds.start_timer();
    let verdict = state.bridge.verify_incoming(&signed, &source);
    timer.observe_duration();

    state.metrics.observe_verdict(&verdict);
    state
        .metrics
        .blocked_ips
        .set(state.bridge.guard().blocked_count() as i64);

    let status = if verdict.is_verified() {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    (status, Json(verdict)).into_response()
}

fn sign_outgoing(state: &AppState, token: Option<&str>, payload: OutgoingPayload) -> Response {
    if let Err(e) = state.bridge.check_token(token) {
        return refuse(state, "sign_outgoing", e);
    }
    match payload.into_payload() {
        Ok(payload) => {
            state.metrics.signed_total.inc();
            (StatusCode::OK, Json(state.bridge.sign_outgoing(payload))).into_response()
        }
        Err(e) => refuse(state, "sign_outgoing", e),
    }
}

fn bridge_status(state: &AppState, token: Option<&str>, limit: Option<usize>) -> Response {
    if let Err(e) = state.bridge.check_token(token) {
        return refuse(state, "bridge_status", e);
    }
    (StatusCode::OK, Json(state.bridge.status(limit))).into_response()
}

fn admin_unblock(state: &AppState, token: Option<&str>, raw_ip: &str) -> Response {
    if let Err(e) = state.bridge.check_token(token) {
        return refuse(state, "admin_unblock", e);
    }
    let ip = match parse_ip(raw_ip) {
        Ok(ip) => ip,
        Err(e) => return refuse(state, "admin_unblock", e),
    };

    let unblocked = state.bridge.unblock(&ip).is_some();
    state
        .metrics
        .blocked_ips
        .set(state.bridge.guard().blocked_count() as i64);
    (StatusCode::OK, Json(UnblockResponse { ip, unblocked })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use nexus_bridge::config::BridgeConfig;
    use nexus_bridge::SharedSecret;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const TOKEN: &str = "bridge-token-1";
    const PEER: &str = "198.51.100.20:40000";

    fn test_app_state(trust_forwarded: bool) -> AppState {
        let config = BridgeConfig {
            allowed_domains: vec!["partner.example".into()],
            bridge_token: Some(TOKEN.into()),
            ..Default::default()
        };
        let bridge = Bridge::new(config, SharedSecret::from("s3cr3t")).expect("bridge");
        AppState {
            bridge: Arc::new(bridge),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().expect("metrics")),
            trust_forwarded,
        }
    }

    fn router(state: AppState) -> Router {
        let peer: SocketAddr = PEER.parse().unwrap();
        create_router(state).layer(MockConnectInfo(peer))
    }

    /// Sends a POST to `/bridge` and returns (status, parsed JSON body).
    async fn post_bridge(
        router: &Router,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri("/bridge")
            .header("content-type", "application/json");
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let req = req.body(Body::from(body.to_string())).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn signed_payload(router: &Router) -> Value {
        let (status, body) = post_bridge(
            router,
            json!({
                "action": "sign_outgoing",
                "payload": {"transactionId": "NX-TEST-1", "direction": "AtoB", "data": {"shipmentId": "SHP1"}}
            }),
            &[(HEADER_BRIDGE_TOKEN, TOKEN)],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["signedPayload"].clone()
    }

    fn from_partner() -> Vec<(&'static str, &'static str)> {
        vec![
            (HEADER_BRIDGE_TOKEN, TOKEN),
            ("origin", "https://api.partner.example"),
        ]
    }

    #[tokio::test]
    async fn test_health() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = router(test_app_state(false)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sign_verify_replay_status() {
        let state = test_app_state(false);
        let app = router(state.clone());
        let signed = signed_payload(&app).await;
        assert_eq!(signed["transactionId"], "NX-TEST-1");

        let verify = json!({"action": "verify_incoming", "payload": signed});
        let (status, body) = post_bridge(&app, verify.clone(), &from_partner()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "verified");

        let (status, body) = post_bridge(&app, verify, &from_partner()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "tampered");

        let status_request = json!({"action": "bridge_status"});
        let (status, _) = post_bridge(&app, status_request.clone(), &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            post_bridge(&app, status_request, &[(HEADER_BRIDGE_TOKEN, TOKEN)]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], 1);
        assert_eq!(body["tampered"], 1);
        assert_eq!(body["rejected"], 0);
        assert_eq!(body["blocked"][0]["ip"], "198.51.100.20");
        assert_eq!(body["recent"][0]["endpoint"], "verify_incoming");

        assert_eq!(state.metrics.verified_total.get(), 1);
        assert_eq!(state.metrics.tampered_total.get(), 1);
        assert_eq!(state.metrics.blocked_ips.get(), 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_400_without_audit() {
        let state = test_app_state(false);
        let app = router(state.clone());
        let mut signed = signed_payload(&app).await;
        signed.as_object_mut().unwrap().remove("nonce");

        let (status, body) = post_bridge(
            &app,
            json!({"action": "verify_incoming", "payload": signed}),
            &from_partner(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed request: missing nonce");
        assert_eq!(state.bridge.audit().recent(10).len(), 0);
        assert_eq!(state.metrics.malformed_total.get(), 1);
    }

    #[tokio::test]
    async fn test_garbage_body_is_400() {
        let app = router(test_app_state(false));
        let (status, body) = post_bridge(&app, json!({"no_action": true}), &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("malformed request"));
    }

    #[tokio::test]
    async fn test_wrong_token_is_403_without_audit() {
        let state = test_app_state(false);
        let app = router(state.clone());
        let signed = signed_payload(&app).await;

        let (status, body) = post_bridge(
            &app,
            json!({"action": "verify_incoming", "payload": signed}),
            &[(HEADER_BRIDGE_TOKEN, "guess")],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "bridge token rejected");
        assert_eq!(state.bridge.audit().counts().rejected, 0);
        assert_eq!(state.metrics.unauthenticated_total.get(), 1);
    }

    #[tokio::test]
    async fn test_unknown_origin_is_rejected() {
        let app = router(test_app_state(false));
        let signed = signed_payload(&app).await;

        let (status, body) = post_bridge(
            &app,
            json!({"action": "verify_incoming", "payload": signed}),
            &[(HEADER_BRIDGE_TOKEN, TOKEN), ("origin", "https://evilpartner.example")],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["error"], "source domain is not authorized");
    }

    #[tokio::test]
    async fn test_signature_headers_are_accepted() {
        let app = router(test_app_state(false));
        let (_, out) = post_bridge(
            &app,
            json!({
                "action": "sign_outgoing",
                "payload": {"direction": "BtoA", "data": {"shipmentId": "SHP9"}}
            }),
            &[(HEADER_BRIDGE_TOKEN, TOKEN)],
        )
        .await;
        let signed = &out["signedPayload"];
        let headers = &out["headers"];

        let body = json!({
            "action": "verify_incoming",
            "payload": {
                "transactionId": signed["transactionId"],
                "direction": signed["direction"],
                "data": signed["data"],
            }
        });
        let (status, verdict) = post_bridge(
            &app,
            body,
            &[
                (HEADER_BRIDGE_TOKEN, TOKEN),
                (HEADER_SIGNATURE, headers[HEADER_SIGNATURE].as_str().unwrap()),
                (HEADER_NONCE, headers[HEADER_NONCE].as_str().unwrap()),
                (HEADER_TIMESTAMP, headers[HEADER_TIMESTAMP].as_str().unwrap()),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", verdict);
    }

    #[tokio::test]
    async fn test_forwarded_for_only_when_trusted() {
        let state = test_app_state(true);
        let app = router(state.clone());
        let signed = signed_payload(&app).await;
        let verify = json!({"action": "verify_incoming", "payload": signed});
        let mut headers = from_partner();
        headers.push(("x-forwarded-for", "203.0.113.50, 10.0.0.1"));

        post_bridge(&app, verify.clone(), &headers).await;
        post_bridge(&app, verify, &headers).await;

        let guard = state.bridge.guard();
        assert!(guard.is_blocked(&"203.0.113.50".parse().unwrap()));
        assert!(!guard.is_blocked(&"198.51.100.20".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_admin_unblock() {
        let state = test_app_state(false);
        let app = router(state.clone());
        let signed = signed_payload(&app).await;
        let verify = json!({"action": "verify_incoming", "payload": signed});
        post_bridge(&app, verify.clone(), &from_partner()).await;
        post_bridge(&app, verify, &from_partner()).await;
        assert_eq!(state.bridge.guard().blocked_count(), 1);

        let unblock = json!({"action": "admin_unblock", "ip": "198.51.100.20"});
        let (status, _) = post_bridge(&app, unblock.clone(), &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = post_bridge(&app, unblock, &[(HEADER_BRIDGE_TOKEN, TOKEN)]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unblocked"], true);
        assert_eq!(state.bridge.guard().blocked_count(), 0);
        assert_eq!(state.metrics.blocked_ips.get(), 0);
    }

    #[tokio::test]
    async fn test_bridge_without_token_refuses_everything() {
        let config = BridgeConfig {
            allowed_domains: vec!["partner.example".into()],
            ..Default::default()
        };
        let state = AppState {
            bridge: Arc::new(Bridge::new(config, SharedSecret::from("s3cr3t")).expect("bridge")),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().expect("metrics")),
            trust_forwarded: false,
        };
        let app = router(state.clone());

        let requests = [
            json!({"action": "sign_outgoing", "payload": {"direction": "AtoB", "data": {}}}),
            json!({"action": "bridge_status"}),
            json!({"action": "admin_unblock", "ip": "198.51.100.20"}),
        ];
        for request in requests {
            let (status, body) = post_bridge(&app, request, &[]).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body["error"], "bridge token rejected");
        }
        assert_eq!(state.metrics.signed_total.get(), 0);
        assert_eq!(state.metrics.unauthenticated_total.get(), 3);
    }

    #[test]
    fn test_origin_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(origin_domain(&headers), None);

        headers.insert("origin", "https://API.Partner.example:8443".parse().unwrap());
        assert_eq!(origin_domain(&headers).as_deref(), Some("api.partner.example"));

        headers.insert("origin", "null".parse().unwrap());
        assert_eq!(origin_domain(&headers), None);

        headers.insert("origin", "http://192.0.2.1:80".parse().unwrap());
        assert_eq!(origin_domain(&headers), None);
    }

    #[test]
    fn test_source_ip_fallback() {
        let peer: SocketAddr = PEER.parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(source_ip(&headers, Some(peer), true), Some(peer.ip()));
        assert_eq!(source_ip(&headers, None, false), None);
    }
}
