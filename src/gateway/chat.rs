//! Stream chat REST client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, error, info};

use super::{ProviderUser, ServerAuth};
use crate::config::ChatConfig;

/// A message as seen in a channel's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub user_id: Option<String>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn upsert_user(&self, user: &ProviderUser) -> Result<()>;

    /// Most recent messages in the channel, oldest first.
    async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    async fn send_message(&self, channel_id: &str, user_id: &str, text: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ChannelStateResponse {
    #[serde(default)]
    messages: Vec<MessageBody>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    user: Option<MessageUser>,
}

#[derive(Debug, Deserialize)]
struct MessageUser {
    id: String,
}

impl From<MessageBody> for ChatMessage {
    fn from(body: MessageBody) -> Self {
        Self {
            id: body.id,
            text: body.text.unwrap_or_default(),
            user_id: body.user.map(|user| user.id),
        }
    }
}

pub struct StreamChatGateway {
    client: reqwest::Client,
    auth: ServerAuth,
    base_url: String,
    channel_type: String,
}

impl StreamChatGateway {
    pub fn new(config: &ChatConfig) -> Self {
        info!("Initialized chat gateway with base URL: {}", config.base_url);

        Self {
            client: reqwest::Client::new(),
            auth: ServerAuth::new(&config.api_key, &config.api_secret),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            channel_type: config.channel_type.clone(),
        }
    }

    fn channel_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/{}", self.base_url, self.channel_type, channel_id)
    }

    async fn post(&self, url: String, body: serde_json::Value, action: &str) -> Result<String> {
        let response = self
            .auth
            .authorize(self.client.post(url).json(&body))?
            .send()
            .await
            .with_context(|| format!("Failed to {}", action))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body to {}", action))?;

        if !status.is_success() {
            error!("Chat API failed to {} with status {}: {}", action, status, text);
            anyhow::bail!("Chat API failed to {} with status {}: {}", action, status, text);
        }

        Ok(text)
    }
}

#[async_trait]
impl ChatProvider for StreamChatGateway {
    async fn upsert_user(&self, user: &ProviderUser) -> Result<()> {
        let users: HashMap<&str, &ProviderUser> = HashMap::from([(user.id.as_str(), user)]);
        self.post(
            format!("{}/users", self.base_url),
            json!({ "users": users }),
            "upsert chat user",
        )
        .await?;
        Ok(())
    }

    async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let raw = self
            .post(
                format!("{}/query", self.channel_url(channel_id)),
                json!({ "state": true, "watch": false, "messages": { "limit": limit } }),
                "query channel",
            )
            .await?;

        let state: ChannelStateResponse =
            serde_json::from_str(&raw).context("Failed to parse channel state")?;
        debug!(
            "Loaded {} messages from channel {}",
            state.messages.len(),
            channel_id
        );
        Ok(state.messages.into_iter().map(ChatMessage::from).collect())
    }

    async fn send_message(&self, channel_id: &str, user_id: &str, text: &str) -> Result<()> {
        self.post(
            format!("{}/message", self.channel_url(channel_id)),
            json!({ "message": { "text": text, "user_id": user_id } }),
            "send chat message",
        )
        .await?;
        info!("Posted reply to channel {}", channel_id);
        Ok(())
    }
}
