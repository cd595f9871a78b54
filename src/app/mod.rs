use crate::api::{ApiServer, AppState};
use crate::chat::ChatResponder;
use crate::cli::load_config;
use crate::config::Config;
use crate::db::Database;
use crate::gateway::{CallGateway, ChatProvider, StreamChatGateway, StreamVideoGateway};
use crate::guards::RateLimiter;
use crate::jobs::{EndMeetingOnTimeLimit, JobQueue, JobRunner, SummarizeTranscript};
use crate::llm::{LanguageModel, OpenAiClient};
use crate::meeting::{transcript, MeetingLifecycle};
use crate::webhook::SignatureVerifier;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// External collaborators, swappable for fakes.
#[derive(Clone)]
pub struct Services {
    pub gateway: Arc<dyn CallGateway>,
    pub chat: Arc<dyn ChatProvider>,
    pub llm: Arc<dyn LanguageModel>,
}

impl Services {
    pub fn from_config(config: &Config) -> Self {
        Self {
            gateway: Arc::new(StreamVideoGateway::new(&config.video, &config.llm)),
            chat: Arc::new(StreamChatGateway::new(&config.chat)),
            llm: Arc::new(OpenAiClient::new(&config.llm)),
        }
    }
}

/// Wire handlers, guards and workflows around one database.
pub fn assemble(
    config: &Config,
    db: Database,
    services: Services,
) -> Result<(AppState, JobRunner)> {
    let http = transcript::http_client(transcript::FETCH_TIMEOUT)?;
    let jobs = JobQueue::new(db.clone());

    let lifecycle = MeetingLifecycle::new(
        db.clone(),
        services.gateway.clone(),
        jobs,
        config.meeting.clone(),
        config.guards.connection_ttl(),
    );

    let chat = ChatResponder::new(
        db.clone(),
        services.chat.clone(),
        services.llm.clone(),
        &config.llm.chat_model,
        config.guards.message_ttl(),
    );

    let mut runner = JobRunner::new(db.clone(), config.jobs.clone());
    runner.register(Arc::new(SummarizeTranscript::new(
        db.clone(),
        http.clone(),
        services.llm.clone(),
        &config.llm.summary_model,
    )));
    runner.register(Arc::new(EndMeetingOnTimeLimit::new(
        db.clone(),
        services.gateway.clone(),
    )));

    let state = AppState {
        db,
        lifecycle,
        chat,
        verifier: SignatureVerifier::new(&config.video.api_key, &config.video.api_secret),
        limiter: RateLimiter::new(
            Duration::from_secs(config.rate_limit.window_seconds),
            config.rate_limit.max_requests,
        ),
        http,
    };

    Ok((state, runner))
}

pub async fn run_service(config_path: Option<&Path>) -> Result<()> {
    info!("Starting callpilot service");

    let config = load_config(config_path)?;
    warn_missing_secrets(&config);

    let db_path = config.database_path()?;
    let db = Database::open(&db_path)?;
    info!("Database ready at {:?}", db_path);

    let (state, runner) = assemble(&config, db, Services::from_config(&config))?;

    runner.recover().await?;
    let _runner = Arc::new(runner).spawn();

    ApiServer::new(config.server.clone(), state).start().await
}

fn warn_missing_secrets(config: &Config) {
    if config.video.api_key.is_empty() || config.video.api_secret.is_empty() {
        warn!("Video API key or secret is not configured; every webhook will be rejected");
    }
    if config.chat.api_key.is_empty() || config.chat.api_secret.is_empty() {
        warn!("Chat API key or secret is not configured");
    }
    if config.llm.api_key.is_empty() {
        warn!("Language model API key is not configured");
    }
}
