//! HTTP surface of the service.
//!
//! Provides endpoints for:
//! - Provider webhooks (POST /webhook)
//! - Meeting creation and lookup, including annotated transcripts
//! - The user and agent directory
//! - Service info and liveness

pub mod error;
pub mod routes;

use crate::chat::ChatResponder;
use crate::config::ServerConfig;
use crate::db::Database;
use crate::guards::RateLimiter;
use crate::meeting::MeetingLifecycle;
use crate::webhook::SignatureVerifier;
use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tracing::info;

/// Everything request handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub lifecycle: MeetingLifecycle,
    pub chat: ChatResponder,
    pub verifier: SignatureVerifier,
    pub limiter: RateLimiter,
    pub http: reqwest::Client,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .merge(routes::webhook::router(state.clone()))
        .merge(routes::meetings::router(state.clone()))
        .merge(routes::directory::router(state))
        .layer(ServiceBuilder::new())
}

pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub async fn start(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!("API server listening on http://{}", addr);
        info!("Endpoints:");
        info!("  GET  /                         - Service info");
        info!("  GET  /health                   - Liveness");
        info!("  POST /webhook                  - Provider events");
        info!("  POST /meetings                 - Create meeting");
        info!("  GET  /meetings/:id             - Get meeting");
        info!("  GET  /meetings/:id/transcript  - Annotated transcript");
        info!("  POST /users                    - Register user");
        info!("  POST /agents                   - Register agent");
        info!("  GET  /agents/:id               - Get agent");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "callpilot",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
