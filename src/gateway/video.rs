//! Stream video REST client and the realtime voice bridge.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, error, info};

use super::{CallGateway, CallState, CreateCall, ProviderUser, RealtimeSession, ServerAuth};
use crate::config::{LlmConfig, VideoConfig};

#[derive(Debug, Deserialize)]
struct GetCallResponse {
    call: CallBody,
}

#[derive(Debug, Deserialize)]
struct CallBody {
    id: String,
    #[serde(default)]
    session: Option<SessionBody>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    participants: Vec<ParticipantBody>,
}

#[derive(Debug, Deserialize)]
struct ParticipantBody {
    user: ParticipantUser,
}

#[derive(Debug, Deserialize)]
struct ParticipantUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    session_id: String,
}

pub struct StreamVideoGateway {
    client: reqwest::Client,
    auth: ServerAuth,
    base_url: String,
    call_type: String,
    realtime_url: String,
    realtime_model: String,
    llm_api_key: String,
}

impl StreamVideoGateway {
    pub fn new(video: &VideoConfig, llm: &LlmConfig) -> Self {
        info!(
            "Initialized video gateway with base URL: {}",
            video.base_url
        );

        Self {
            client: reqwest::Client::new(),
            auth: ServerAuth::new(&video.api_key, &video.api_secret),
            base_url: video.base_url.trim_end_matches('/').to_string(),
            call_type: video.call_type.clone(),
            realtime_url: video.realtime_url.trim_end_matches('/').to_string(),
            realtime_model: llm.realtime_model.clone(),
            llm_api_key: llm.api_key.clone(),
        }
    }

    fn call_url(&self, call_id: &str) -> String {
        format!("{}/video/call/{}/{}", self.base_url, self.call_type, call_id)
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> Result<String> {
        let response = self
            .auth
            .authorize(request)?
            .send()
            .await
            .with_context(|| format!("Failed to {}", action))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body to {}", action))?;

        if !status.is_success() {
            error!("Video API failed to {} with status {}: {}", action, status, body);
            anyhow::bail!("Video API failed to {} with status {}: {}", action, status, body);
        }

        Ok(body)
    }
}

#[async_trait]
impl CallGateway for StreamVideoGateway {
    async fn create_call(&self, call_id: &str, request: &CreateCall) -> Result<()> {
        let body = json!({
            "data": {
                "created_by_id": request.created_by_id,
                "custom": {
                    "meeting_id": request.meeting_id,
                    "meeting_name": request.meeting_name,
                },
                "settings_override": {
                    "transcription": {
                        "language": "en",
                        "mode": "auto-on",
                        "closed_caption_mode": "auto-on",
                    },
                    "recording": {
                        "mode": "auto-on",
                        "quality": "1080p",
                    },
                },
            }
        });

        self.send(self.client.post(self.call_url(call_id)).json(&body), "create call")
            .await?;
        info!("Created provider call {}", call_id);
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallState>> {
        let request = self.auth.authorize(self.client.get(self.call_url(call_id)))?;
        let response = request.send().await.context("Failed to fetch call")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("Provider has no call {}", call_id);
            return Ok(None);
        }

        let status = response.status();
        let body = response.text().await.context("Failed to read call body")?;
        if !status.is_success() {
            error!("Video API failed to fetch call with status {}: {}", status, body);
            anyhow::bail!("Video API failed to fetch call with status {}: {}", status, body);
        }

        let parsed: GetCallResponse =
            serde_json::from_str(&body).context("Failed to parse call response")?;
        let participant_ids = parsed
            .call
            .session
            .map(|session| session.participants.into_iter().map(|p| p.user.id).collect())
            .unwrap_or_default();

        Ok(Some(CallState {
            id: parsed.call.id,
            participant_ids,
        }))
    }

    async fn update_call_settings(&self, call_id: &str, max_duration_seconds: u64) -> Result<()> {
        let body = json!({
            "settings_override": {
                "limits": { "max_duration_seconds": max_duration_seconds }
            }
        });
        self.send(self.client.patch(self.call_url(call_id)).json(&body), "update call settings")
            .await?;
        debug!(
            "Applied {}s duration limit to call {}",
            max_duration_seconds, call_id
        );
        Ok(())
    }

    async fn end_call(&self, call_id: &str) -> Result<()> {
        let url = format!("{}/mark_ended", self.call_url(call_id));
        self.send(self.client.post(url).json(&json!({})), "end call")
            .await?;
        info!("Ended provider call {}", call_id);
        Ok(())
    }

    async fn upsert_users(&self, users: &[ProviderUser]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }

        let users: HashMap<&str, &ProviderUser> =
            users.iter().map(|user| (user.id.as_str(), user)).collect();
        let url = format!("{}/api/v2/users", self.base_url);
        self.send(self.client.post(url).json(&json!({ "users": users })), "upsert users")
            .await?;
        Ok(())
    }

    async fn connect_realtime_agent(
        &self,
        call_id: &str,
        agent_user_id: &str,
    ) -> Result<Box<dyn RealtimeSession>> {
        let url = format!(
            "{}/calls/{}/{}/agents",
            self.realtime_url, self.call_type, call_id
        );
        let body = json!({
            "agent_user_id": agent_user_id,
            "model": self.realtime_model,
            "model_api_key": self.llm_api_key,
        });

        let raw = self
            .send(self.client.post(url).json(&body), "connect realtime agent")
            .await?;
        let connected: ConnectResponse =
            serde_json::from_str(&raw).context("Failed to parse realtime connect response")?;

        info!(
            "Realtime agent {} joined call {} (session {})",
            agent_user_id, call_id, connected.session_id
        );

        Ok(Box::new(BridgeSession {
            client: self.client.clone(),
            auth: self.auth.clone(),
            url: format!("{}/sessions/{}", self.realtime_url, connected.session_id),
            session_id: connected.session_id,
        }))
    }
}

/// Session handle returned by the realtime bridge.
struct BridgeSession {
    client: reqwest::Client,
    auth: ServerAuth,
    url: String,
    session_id: String,
}

#[async_trait]
impl RealtimeSession for BridgeSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn update_instructions(&self, instructions: &str) -> Result<()> {
        let body: Value = json!({ "instructions": instructions });
        let response = self
            .auth
            .authorize(self.client.patch(&self.url).json(&body))?
            .send()
            .await
            .context("Failed to update realtime session")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Realtime session update failed with status {}: {}",
                status,
                text
            );
        }

        debug!("Updated instructions for realtime session {}", self.session_id);
        Ok(())
    }
}
