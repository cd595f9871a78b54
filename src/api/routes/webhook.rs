//! Provider webhook ingestion.
//!
//! The body is verified against its signature, decoded into a
//! [`WebhookEvent`] and routed to exactly one handler. Every branch answers
//! with an explicit response so the provider never retries a request that
//! can't succeed.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::guards::{RateDecision, RateLimiter};
use crate::meeting::Outcome;
use crate::webhook::signature::{API_KEY_HEADER, SIGNATURE_HEADER};
use crate::webhook::{SignatureCheck, WebhookEvent};

pub fn router(state: AppState) -> Router {
    let limiter = state.limiter.clone();
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit))
        .with_state(state)
}

/// POST /webhook
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        debug!("Empty webhook body, acknowledging");
        return Ok(Json(json!({ "message": "Webhook endpoint is reachable" })));
    }

    let signature = header_str(&headers, SIGNATURE_HEADER);
    let api_key = header_str(&headers, API_KEY_HEADER);
    match state.verifier.verify(&body, signature, api_key) {
        SignatureCheck::Valid => {}
        SignatureCheck::Missing => {
            warn!("Webhook rejected: missing signature or API key");
            return Err(ApiError::unauthorized("Missing signature or API key"));
        }
        SignatureCheck::WrongApiKey | SignatureCheck::Invalid => {
            warn!("Webhook rejected: invalid signature");
            return Err(ApiError::unauthorized("Invalid signature"));
        }
    }

    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        debug!("Signed webhook body is not JSON, ignoring");
        return Ok(Json(json!({ "message": "Ignored non-JSON body" })));
    };

    let event: WebhookEvent = serde_json::from_value(payload)
        .map_err(|e| ApiError::bad_request(format!("Invalid event payload: {}", e)))?;

    info!("Webhook event received: {}", event.kind());
    let outcome = dispatch(&state, &event).await?;

    match outcome {
        Outcome::Applied(message) => debug!("{} -> {}", event.kind(), message),
        Outcome::Skipped(reason) => debug!("{} skipped: {}", event.kind(), reason),
    }

    Ok(Json(json!({ "success": true, "message": outcome.message() })))
}

async fn dispatch(state: &AppState, event: &WebhookEvent) -> ApiResult<Outcome> {
    let outcome = match event {
        WebhookEvent::SessionStarted(call) => state.lifecycle.session_started(call).await?,
        WebhookEvent::ParticipantLeft(call) => state.lifecycle.participant_left(call).await?,
        WebhookEvent::SessionEnded(call) | WebhookEvent::CallEnded(call) => {
            state.lifecycle.call_ended(call).await?
        }
        WebhookEvent::TranscriptionReady(ready) => state.lifecycle.transcript_ready(ready).await?,
        WebhookEvent::RecordingReady(ready) => state.lifecycle.recording_ready(ready).await?,
        WebhookEvent::MessageNew(message) => state.chat.handle(message).await?,
        WebhookEvent::Unknown => Outcome::Skipped("unhandled event type"),
    };
    Ok(outcome)
}

async fn rate_limit(
    State(limiter): State<RateLimiter>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), connect_info.map(|ConnectInfo(addr)| addr.ip()));

    match limiter.check(ip) {
        RateDecision::Allowed => next.run(request).await,
        RateDecision::Limited { retry_after } => {
            warn!("Rate limit exceeded for {}", ip);
            let mut response = ApiError::too_many_requests("Too many requests").into_response();
            let seconds = (retry_after.as_secs_f64().ceil() as u64).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

/// First `x-forwarded-for` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> IpAddr {
    header_str(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
