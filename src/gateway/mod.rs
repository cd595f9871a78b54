//! Boundaries to the external video and chat provider.
//!
//! Handlers and workflows only see the [`CallGateway`] and [`ChatProvider`]
//! traits; the Stream-backed HTTP clients live in [`video`] and [`chat`].

pub mod auth;
pub mod avatar;
pub mod chat;
pub mod video;

pub use auth::ServerAuth;
pub use avatar::{avatar_url, AvatarStyle};
pub use chat::{ChatMessage, ChatProvider, StreamChatGateway};
pub use video::StreamVideoGateway;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Parameters for creating the provider call that backs a meeting.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub created_by_id: String,
    pub meeting_id: String,
    pub meeting_name: String,
}

/// Snapshot of a live call.
#[derive(Debug, Clone, Default)]
pub struct CallState {
    pub id: String,
    pub participant_ids: Vec<String>,
}

impl CallState {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }
}

/// A user identity registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderUser {
    pub id: String,
    pub name: String,
    pub role: String,
    pub image: String,
}

impl ProviderUser {
    /// The provider-side identity of an agent, with a generated bot avatar.
    pub fn agent(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role: "user".to_string(),
            image: avatar_url(AvatarStyle::BotttsNeutral, name),
        }
    }
}

#[async_trait]
pub trait CallGateway: Send + Sync {
    async fn create_call(&self, call_id: &str, request: &CreateCall) -> Result<()>;

    /// `Ok(None)` when the provider has no such call.
    async fn get_call(&self, call_id: &str) -> Result<Option<CallState>>;

    async fn update_call_settings(&self, call_id: &str, max_duration_seconds: u64) -> Result<()>;

    async fn end_call(&self, call_id: &str) -> Result<()>;

    async fn upsert_users(&self, users: &[ProviderUser]) -> Result<()>;

    async fn connect_realtime_agent(
        &self,
        call_id: &str,
        agent_user_id: &str,
    ) -> Result<Box<dyn RealtimeSession>>;
}

/// Handle to a voice model attached to a live call.
#[async_trait]
pub trait RealtimeSession: Send + Sync {
    fn session_id(&self) -> &str;

    async fn update_instructions(&self, instructions: &str) -> Result<()>;
}
