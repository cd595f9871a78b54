//! Shared fixtures: in-process fakes for the provider and the language
//! model, plus helpers to drive the router with signed webhooks.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use callpilot::api::{self, AppState};
use callpilot::app::{assemble, Services};
use callpilot::config::Config;
use callpilot::db::{
    AgentRecord, AgentRepository, Database, MeetingRecord, MeetingRepository, NewMeeting,
    UserRecord, UserRepository,
};
use callpilot::gateway::{
    CallGateway, CallState, ChatMessage, ChatProvider, CreateCall, ProviderUser, RealtimeSession,
};
use callpilot::jobs::JobRunner;
use callpilot::llm::{ChatTurn, LanguageModel};
use callpilot::webhook::SignatureVerifier;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const API_KEY: &str = "test-key";
pub const API_SECRET: &str = "test-secret";
pub const VIP_EMAIL: &str = "vip@example.com";

#[derive(Default)]
pub struct FakeGateway {
    pub created: Mutex<Vec<CreateCall>>,
    pub connects: AtomicUsize,
    pub ended: Mutex<Vec<String>>,
    pub limits: Mutex<Vec<(String, u64)>>,
    pub upserted: Mutex<Vec<ProviderUser>>,
    pub participants: Mutex<HashMap<String, Vec<String>>>,
    pub instructions: Arc<Mutex<Vec<String>>>,
    pub fail_connect: AtomicBool,
    pub fail_end: AtomicBool,
}

impl FakeGateway {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn ended_calls(&self) -> Vec<String> {
        self.ended.lock().unwrap().clone()
    }

    pub fn add_participant(&self, call_id: &str, user_id: &str) {
        self.participants
            .lock()
            .unwrap()
            .entry(call_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }
}

#[async_trait]
impl CallGateway for FakeGateway {
    async fn create_call(&self, _call_id: &str, request: &CreateCall) -> Result<()> {
        self.created.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallState>> {
        let participant_ids = self
            .participants
            .lock()
            .unwrap()
            .get(call_id)
            .cloned()
            .unwrap_or_default();
        Ok(Some(CallState {
            id: call_id.to_string(),
            participant_ids,
        }))
    }

    async fn update_call_settings(&self, call_id: &str, max_duration_seconds: u64) -> Result<()> {
        self.limits
            .lock()
            .unwrap()
            .push((call_id.to_string(), max_duration_seconds));
        Ok(())
    }

    async fn end_call(&self, call_id: &str) -> Result<()> {
        if self.fail_end.load(Ordering::SeqCst) {
            anyhow::bail!("provider unavailable");
        }
        self.ended.lock().unwrap().push(call_id.to_string());
        Ok(())
    }

    async fn upsert_users(&self, users: &[ProviderUser]) -> Result<()> {
        self.upserted.lock().unwrap().extend(users.iter().cloned());
        Ok(())
    }

    async fn connect_realtime_agent(
        &self,
        call_id: &str,
        agent_user_id: &str,
    ) -> Result<Box<dyn RealtimeSession>> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            anyhow::bail!("realtime bridge unreachable");
        }
        self.add_participant(call_id, agent_user_id);
        Ok(Box::new(FakeSession {
            id: format!("session-{}", n),
            instructions: self.instructions.clone(),
        }))
    }
}

struct FakeSession {
    id: String,
    instructions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RealtimeSession for FakeSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn update_instructions(&self, instructions: &str) -> Result<()> {
        self.instructions
            .lock()
            .unwrap()
            .push(instructions.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeChat {
    pub history: Mutex<Vec<ChatMessage>>,
    pub sent: Mutex<Vec<(String, String, String)>>,
    pub upserted: Mutex<Vec<ProviderUser>>,
}

impl FakeChat {
    pub fn push_history(&self, id: &str, user_id: &str, text: &str) {
        self.history.lock().unwrap().push(ChatMessage {
            id: id.to_string(),
            text: text.to_string(),
            user_id: Some(user_id.to_string()),
        });
    }

    pub fn sent_messages(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn upsert_user(&self, user: &ProviderUser) -> Result<()> {
        self.upserted.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn recent_messages(&self, _channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let history = self.history.lock().unwrap();
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }

    async fn send_message(&self, channel_id: &str, user_id: &str, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((
            channel_id.to_string(),
            user_id.to_string(),
            text.to_string(),
        ));
        Ok(())
    }
}

pub struct FakeLlm {
    pub reply: Mutex<String>,
    pub calls: Mutex<Vec<(String, Vec<ChatTurn>)>>,
    pub failures_left: AtomicUsize,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self {
            reply: Mutex::new("### Overview\nA short meeting.\n\n### Notes\n#### Intro\n- Greetings".to_string()),
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
        }
    }
}

impl FakeLlm {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_turns(&self) -> Vec<ChatTurn> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(_, turns)| turns.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(&self, model: &str, turns: &[ChatTurn]) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), turns.to_vec()));

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("model overloaded");
        }
        Ok(self.reply.lock().unwrap().clone())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.video.api_key = API_KEY.to_string();
    config.video.api_secret = API_SECRET.to_string();
    config.meeting.unrestricted_emails = vec![VIP_EMAIL.to_string()];
    config.jobs.backoff_base_ms = 0;
    config.jobs.step_attempts = 2;
    config
}

pub struct TestApp {
    pub config: Config,
    pub db: Database,
    pub state: AppState,
    pub runner: JobRunner,
    pub gateway: Arc<FakeGateway>,
    pub chat: Arc<FakeChat>,
    pub llm: Arc<FakeLlm>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let db = Database::open_in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let chat = Arc::new(FakeChat::default());
        let llm = Arc::new(FakeLlm::default());

        let services = Services {
            gateway: gateway.clone(),
            chat: chat.clone(),
            llm: llm.clone(),
        };
        let (state, runner) = assemble(&config, db.clone(), services).unwrap();

        Self {
            config,
            db,
            state,
            runner,
            gateway,
            chat,
            llm,
        }
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    pub async fn seed_user(&self, name: &str, email: Option<&str>) -> UserRecord {
        let (name, email) = (name.to_string(), email.map(String::from));
        self.db
            .call(move |conn| UserRepository::insert(conn, &name, email.as_deref(), None))
            .await
            .unwrap()
    }

    pub async fn seed_agent(&self, owner_id: &str, name: &str, instructions: &str) -> AgentRecord {
        let (owner_id, name, instructions) =
            (owner_id.to_string(), name.to_string(), instructions.to_string());
        self.db
            .call(move |conn| AgentRepository::insert(conn, &name, &instructions, &owner_id))
            .await
            .unwrap()
    }

    /// An unrestricted owner, their agent and an upcoming meeting.
    pub async fn seed_meeting(&self) -> (UserRecord, AgentRecord, MeetingRecord) {
        let owner = self.seed_user("Ada", Some(VIP_EMAIL)).await;
        let agent = self
            .seed_agent(&owner.id, "Tutor", "You are a patient math tutor.")
            .await;
        let meeting = self
            .state
            .lifecycle
            .create_meeting(NewMeeting {
                name: "Weekly sync".to_string(),
                user_id: owner.id.clone(),
                agent_id: agent.id.clone(),
            })
            .await
            .unwrap();
        (owner, agent, meeting)
    }

    pub async fn meeting(&self, id: &str) -> MeetingRecord {
        let id = id.to_string();
        self.db
            .call(move |conn| MeetingRepository::get(conn, &id))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn post_webhook(&self, event: Value) -> (StatusCode, Value) {
        self.send(signed_request(event.to_string().as_bytes())).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }
}

pub fn signed_request(body: &[u8]) -> Request<Body> {
    let signature = SignatureVerifier::new(API_KEY, API_SECRET).sign(body);
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("x-signature", signature)
        .header("x-api-key", API_KEY)
        .body(Body::from(body.to_vec()))
        .unwrap()
}

/// A call event for `meeting_id` in the provider's shape.
pub fn call_event(kind: &str, meeting_id: &str) -> Value {
    json!({
        "type": kind,
        "call_cid": format!("default:{}", meeting_id),
        "call": {
            "cid": format!("default:{}", meeting_id),
            "id": meeting_id,
            "custom": { "meeting_id": meeting_id }
        }
    })
}

pub fn transcription_ready(meeting_id: &str, url: &str) -> Value {
    json!({
        "type": "call.transcription_ready",
        "call_cid": format!("default:{}", meeting_id),
        "call_transcription": { "url": url }
    })
}

pub fn message_new(meeting_id: &str, message_id: &str, user_id: &str, text: &str) -> Value {
    json!({
        "type": "message.new",
        "cid": format!("messaging:{}", meeting_id),
        "channel_id": meeting_id,
        "message": { "id": message_id, "text": text, "user": { "id": user_id } },
        "user": { "id": user_id }
    })
}

/// Serve `body` from a throwaway local server and return its URL.
pub async fn serve_text(body: String) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/transcript.jsonl", get(move || async move { body }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/transcript.jsonl", addr)
}
