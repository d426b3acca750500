// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The HTTP surface: webhook verification and receipt, public token status,
//! and a health probe.
//!
//! Order of checks on the webhook POST matters: rate limit (cheap map
//! lookup), then signature (one HMAC), then JSON parsing, then dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use waitline_core::WaitlineError;
use waitline_dispatch::Dispatcher;
use waitline_queue::QueueService;

use crate::ratelimit::RateLimiter;
use crate::signature::verify_signature;
use crate::webhook::{extract_events, WebhookPayload};

pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub queue: QueueService,
    /// The tenant this provider number is bound to.
    pub clinic_id: String,
    pub verify_token: String,
    pub app_secret: String,
    pub limiter: RateLimiter,
}

impl GatewayState {
    pub fn new(
        dispatcher: Dispatcher,
        queue: QueueService,
        clinic_id: String,
        verify_token: String,
        app_secret: String,
        rate_limit_requests: u32,
        rate_limit_window: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            queue,
            clinic_id,
            verify_token,
            app_secret,
            limiter: RateLimiter::new(rate_limit_requests, rate_limit_window),
        })
    }
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/status/{token_id}", get(token_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn serve(
    state: Arc<GatewayState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), WaitlineError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WaitlineError::Channel {
            message: format!("gateway failed to bind {addr}"),
            source: Some(Box::new(e)),
        })?;
    info!(%addr, "gateway listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .map_err(|e| WaitlineError::Channel {
        message: "gateway server error".to_string(),
        source: Some(Box::new(e)),
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Subscription handshake: echo the challenge iff the verify token matches.
async fn verify_webhook(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let token_matches = params.verify_token.as_deref() == Some(state.verify_token.as_str());
    if params.mode.as_deref() == Some("subscribe") && token_matches {
        if let Some(challenge) = params.challenge {
            info!("webhook subscription verified");
            return (StatusCode::OK, challenge).into_response();
        }
    }
    warn!("webhook verification rejected");
    StatusCode::FORBIDDEN.into_response()
}

async fn receive_webhook(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !state.limiter.check(peer.ip()) {
        warn!(ip = %peer.ip(), "webhook rate limit exceeded");
        return StatusCode::TOO_MANY_REQUESTS;
    }

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&state.app_secret, &body, signature) {
        warn!(ip = %peer.ip(), "webhook signature rejected");
        return StatusCode::UNAUTHORIZED;
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "unparseable webhook body");
            // Authenticated but malformed; 200 so the provider stops
            // redelivering something we will never understand.
            return StatusCode::OK;
        }
    };

    let clinic = match state.queue.clinic(&state.clinic_id).await {
        Ok(Some(clinic)) => clinic,
        Ok(None) => {
            error!(clinic_id = %state.clinic_id, "configured clinic missing");
            return StatusCode::OK;
        }
        Err(e) => {
            error!(error = %e, "clinic lookup failed");
            return StatusCode::OK;
        }
    };

    for event in extract_events(payload) {
        let message_id = event.message_id.clone();
        if let Err(e) = state.dispatcher.handle(&clinic, event).await {
            // The message id is already recorded, so a provider retry
            // would be dropped as a replay; log loudly instead of 500ing.
            error!(message_id, error = %e, "dispatch failed");
        }
    }
    StatusCode::OK
}

/// Public, unauthenticated by design: token ids are unguessable UUIDs and
/// the response contains no contact data.
async fn token_status(
    State(state): State<Arc<GatewayState>>,
    Path(token_id): Path<String>,
) -> Response {
    match state.queue.status_for_token(&token_id).await {
        Ok(Some(status)) => Json(serde_json::json!({
            "token": {
                "id": status.token.id,
                "label": status.token.display_number(),
                "token_number": status.token.token_number,
                "is_priority": status.token.is_priority,
                "status": status.token.status,
            },
            "tokens_ahead": status.tokens_ahead,
            "current_serving": status.current_serving,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown token" })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "status lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign_body;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use waitline_core::{types::now_iso, Clinic};
    use waitline_notify::{MessageProvider, Notifier};
    use waitline_storage::{queries, Database};
    use waitline_vault::PhoneVault;

    struct CaptureProvider {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageProvider for CaptureProvider {
        async fn send(&self, _phone: &str, body: &str, _kind: &str) -> Result<(), WaitlineError> {
            self.sent.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    struct TestServer {
        base: String,
        provider: Arc<CaptureProvider>,
        db: Database,
        _dir: tempfile::TempDir,
    }

    async fn spawn_gateway(rate_limit: u32) -> TestServer {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        queries::clinics::create_clinic(
            &db,
            &Clinic {
                id: "c1".into(),
                slug: "cityclinic".into(),
                name: "City Clinic".into(),
                daily_limit: 50,
                created_at: now_iso(),
            },
        )
        .await
        .unwrap();

        let vault = PhoneVault::new([5u8; 32], b"pepper".to_vec());
        let provider = Arc::new(CaptureProvider {
            sent: Mutex::new(Vec::new()),
        });
        let queue = QueueService::new(db.clone(), vault.clone(), 50);
        let notifier = Notifier::new(db.clone(), vault, provider.clone(), 300, 3);
        let dispatcher = Dispatcher::new(queue.clone(), notifier);
        let state = GatewayState::new(
            dispatcher,
            queue,
            "c1".into(),
            "verify-me".into(),
            "app-secret".into(),
            rate_limit,
            Duration::from_secs(60),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            provider,
            db,
            _dir: dir,
        }
    }

    fn join_payload(message_id: &str, text: &str) -> Vec<u8> {
        serde_json::json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "id": message_id,
                "from": "+15550001111",
                "type": "text",
                "text": { "body": text },
            }] } }] }]
        })
        .to_string()
        .into_bytes()
    }

    fn button_payload(message_id: &str, button_id: &str) -> Vec<u8> {
        serde_json::json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "id": message_id,
                "from": "+15550001111",
                "type": "interactive",
                "interactive": { "button_reply": { "id": button_id, "title": "tap" } },
            }] } }] }]
        })
        .to_string()
        .into_bytes()
    }

    async fn post_signed(server: &TestServer, body: Vec<u8>) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/webhook", server.base))
            .header("x-hub-signature-256", sign_body("app-secret", &body))
            .body(body)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let server = spawn_gateway(100).await;
        let response = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn subscription_handshake_echoes_challenge() {
        let server = spawn_gateway(100).await;
        let url = format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345",
            server.base
        );
        let response = reqwest::get(url).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "12345");

        let bad = format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345",
            server.base
        );
        assert_eq!(reqwest::get(bad).await.unwrap().status(), 403);
    }

    #[tokio::test]
    async fn unsigned_webhook_is_unauthorized() {
        let server = spawn_gateway(100).await;
        let response = reqwest::Client::new()
            .post(format!("{}/webhook", server.base))
            .body(join_payload("m1", "JOIN_cityclinic"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(server.provider.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tampered_body_is_unauthorized() {
        let server = spawn_gateway(100).await;
        let body = join_payload("m1", "JOIN_cityclinic");
        let signature = sign_body("app-secret", &body);
        let response = reqwest::Client::new()
            .post(format!("{}/webhook", server.base))
            .header("x-hub-signature-256", signature)
            .body(join_payload("m1", "JOIN_elsewhere"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn signed_message_reaches_the_dispatcher() {
        let server = spawn_gateway(100).await;
        let response = post_signed(&server, join_payload("m1", "JOIN_cityclinic")).await;
        assert_eq!(response.status(), 200);

        // The dispatcher replied (name prompt) and recorded the state.
        assert_eq!(server.provider.sent.lock().unwrap().len(), 1);
        let convo = queries::conversations::get_conversation(&server.db, "c1", "+15550001111")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            convo.state,
            waitline_core::ConversationState::AwaitingName
        );
    }

    #[tokio::test]
    async fn replayed_delivery_sends_no_second_reply() {
        let server = spawn_gateway(100).await;
        post_signed(&server, join_payload("m1", "JOIN_cityclinic")).await;
        post_signed(&server, join_payload("m1", "JOIN_cityclinic")).await;
        assert_eq!(server.provider.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_rejects_before_signature_checking() {
        let server = spawn_gateway(2).await;
        // Unsigned requests: the limiter must trip before the 401s would.
        let client = reqwest::Client::new();
        let mut statuses = Vec::new();
        for _ in 0..4 {
            let response = client
                .post(format!("{}/webhook", server.base))
                .body("{}")
                .send()
                .await
                .unwrap();
            statuses.push(response.status().as_u16());
        }
        assert_eq!(statuses, vec![401, 401, 429, 429]);
    }

    #[tokio::test]
    async fn status_endpoint_serves_public_view() {
        let server = spawn_gateway(100).await;
        // Issue a token through the conversation.
        post_signed(&server, join_payload("m1", "JOIN_cityclinic")).await;
        post_signed(&server, join_payload("m2", "Asha")).await;
        post_signed(&server, button_payload("m3", "CONFIRM_Asha")).await;

        let convo = queries::conversations::get_conversation(&server.db, "c1", "+15550001111")
            .await
            .unwrap()
            .unwrap();
        let token_id = convo.active_token_id.unwrap();

        let response = reqwest::get(format!("{}/status/{token_id}", server.base))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["tokens_ahead"], 0);
        assert_eq!(body["token"]["status"], "WAITING");

        let missing = reqwest::get(format!("{}/status/not-a-token", server.base))
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }
}
