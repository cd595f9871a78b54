//! Event handlers that drive a meeting through its lifecycle.
//!
//! Provider events arrive at least once and in any order. Every transition
//! is a guarded conditional update, so a duplicate or late event collapses
//! into a no-op instead of moving a meeting backwards. The connection guard
//! only saves a roster round trip; the database decides every race.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::MeetingStatus;
use crate::config::MeetingConfig;
use crate::db::{
    now_timestamp, AgentRecord, AgentRepository, Database, MeetingRecord, MeetingRepository,
    NewMeeting, UserRepository,
};
use crate::gateway::{CallGateway, CreateCall, ProviderUser};
use crate::guards::TtlGuard;
use crate::jobs::{summarize, time_limit, JobQueue};
use crate::webhook::{CallEvent, RecordingReadyEvent, TranscriptionReadyEvent};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Missing meeting id")]
    MissingMeetingId,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Meeting limit of {0} reached")]
    MeetingLimitReached(u32),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied(&'static str),
    Skipped(&'static str),
}

impl Outcome {
    pub fn message(&self) -> &'static str {
        match self {
            Outcome::Applied(message) | Outcome::Skipped(message) => message,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

#[derive(Clone)]
pub struct MeetingLifecycle {
    db: Database,
    gateway: Arc<dyn CallGateway>,
    jobs: JobQueue,
    connections: TtlGuard<String>,
    config: MeetingConfig,
}

impl MeetingLifecycle {
    pub fn new(
        db: Database,
        gateway: Arc<dyn CallGateway>,
        jobs: JobQueue,
        config: MeetingConfig,
        connection_ttl: Duration,
    ) -> Self {
        Self {
            db,
            gateway,
            jobs,
            connections: TtlGuard::new("agent connection", connection_ttl),
            config,
        }
    }

    pub fn connections(&self) -> &TtlGuard<String> {
        &self.connections
    }

    pub async fn create_meeting(&self, request: NewMeeting) -> Result<MeetingRecord, LifecycleError> {
        let user_id = request.user_id.clone();
        let owner = self
            .db
            .call(move |conn| UserRepository::get(conn, &user_id))
            .await?
            .ok_or_else(|| LifecycleError::UserNotFound(request.user_id.clone()))?;

        let agent = self
            .find_agent(&request.agent_id)
            .await?
            .filter(|agent| agent.user_id == owner.id)
            .ok_or_else(|| LifecycleError::AgentNotFound(request.agent_id.clone()))?;

        let restricted = !self.config.is_unrestricted(owner.email.as_deref());
        if restricted {
            let owner_id = owner.id.clone();
            let count = self
                .db
                .call(move |conn| MeetingRepository::count_for_user(conn, &owner_id))
                .await?;
            if count >= i64::from(self.config.max_meetings_per_user) {
                return Err(LifecycleError::MeetingLimitReached(
                    self.config.max_meetings_per_user,
                ));
            }
        }

        let meeting = self
            .db
            .call(move |conn| MeetingRepository::insert(conn, &request))
            .await?;
        info!("Created meeting {} ({})", meeting.id, meeting.name);

        self.gateway
            .create_call(
                &meeting.id,
                &CreateCall {
                    created_by_id: owner.id.clone(),
                    meeting_id: meeting.id.clone(),
                    meeting_name: meeting.name.clone(),
                },
            )
            .await?;
        self.gateway
            .upsert_users(&[ProviderUser::agent(&agent.id, &agent.name)])
            .await?;

        if restricted {
            self.jobs
                .enqueue(
                    time_limit::NAME,
                    json!({
                        "meeting_id": meeting.id,
                        "call_id": meeting.id,
                        "time_limit_seconds": self.config.max_duration_seconds,
                    }),
                )
                .await?;
        }

        Ok(meeting)
    }

    /// `call.session_started`: upcoming -> active, then bring the agent in.
    pub async fn session_started(&self, event: &CallEvent) -> Result<Outcome, LifecycleError> {
        let meeting_id = event.meeting_id().ok_or(LifecycleError::MissingMeetingId)?;
        let meeting = self.find_meeting(&meeting_id).await?;
        let now = now_timestamp();

        if !matches!(meeting.status, MeetingStatus::Upcoming | MeetingStatus::Active) {
            if meeting.started_at.is_none() {
                self.backfill_started_at(&meeting_id, &now).await?;
            }
            debug!(
                "Session start for meeting {} ignored, status is {}",
                meeting_id, meeting.status
            );
            return Ok(Outcome::Skipped("meeting already ended"));
        }

        let agent = self
            .find_agent(&meeting.agent_id)
            .await?
            .ok_or_else(|| LifecycleError::AgentNotFound(meeting.agent_id.clone()))?;

        let id = meeting_id.clone();
        let started_at = now.clone();
        let transitioned = self
            .db
            .call(move |conn| MeetingRepository::mark_active(conn, &id, &started_at))
            .await?;

        if transitioned {
            info!("Meeting {} is now active", meeting_id);
            self.apply_duration_limit(&meeting).await?;
        } else {
            debug!("Meeting {} was already active", meeting_id);
            if meeting.started_at.is_none() {
                self.backfill_started_at(&meeting_id, &now).await?;
            }
        }

        if !self.connections.try_acquire(meeting_id.clone()) {
            return Ok(Outcome::Skipped("agent connection already in progress"));
        }

        match self.gateway.get_call(&meeting_id).await {
            Ok(Some(call)) if call.has_participant(&agent.id) => {
                debug!("Agent {} already in call {}", agent.id, meeting_id);
                return Ok(Outcome::Skipped("agent already connected"));
            }
            Ok(_) => {}
            Err(e) => warn!(
                "Roster check for meeting {} failed, connecting anyway: {:#}",
                meeting_id, e
            ),
        }

        if let Err(e) = self.connect_agent(&meeting_id, &agent).await {
            // The call goes on without the agent; a redelivery may try again.
            warn!("Failed to connect agent to meeting {}: {:#}", meeting_id, e);
            self.connections.release(&meeting_id);
        }

        Ok(Outcome::Applied("meeting active"))
    }

    /// `call.session_participant_left`: close out the meeting and end the call.
    pub async fn participant_left(&self, event: &CallEvent) -> Result<Outcome, LifecycleError> {
        let meeting_id = event.meeting_id().ok_or(LifecycleError::MissingMeetingId)?;
        if !self.mark_ended(&meeting_id).await? {
            return Ok(Outcome::Skipped("meeting not active"));
        }

        if let Err(e) = self.gateway.end_call(&meeting_id).await {
            warn!("Failed to end call for meeting {}: {:#}", meeting_id, e);
        }
        Ok(Outcome::Applied("meeting ended"))
    }

    /// `call.session_ended` / `call.ended`: the call is already over.
    pub async fn call_ended(&self, event: &CallEvent) -> Result<Outcome, LifecycleError> {
        let meeting_id = event.meeting_id().ok_or(LifecycleError::MissingMeetingId)?;
        if !self.mark_ended(&meeting_id).await? {
            return Ok(Outcome::Skipped("meeting not active"));
        }
        Ok(Outcome::Applied("meeting ended"))
    }

    /// `call.transcription_ready`: store the URL and start summarization.
    pub async fn transcript_ready(
        &self,
        event: &TranscriptionReadyEvent,
    ) -> Result<Outcome, LifecycleError> {
        let meeting_id = event.meeting_id().ok_or(LifecycleError::MissingMeetingId)?;
        let url = event
            .url()
            .ok_or(LifecycleError::MissingField("call_transcription.url"))?;

        let (id, stored_url) = (meeting_id.clone(), url.clone());
        let updated = self
            .db
            .call(move |conn| MeetingRepository::set_transcript_url(conn, &id, &stored_url))
            .await?;
        if !updated {
            return Err(LifecycleError::MeetingNotFound(meeting_id));
        }

        self.jobs
            .enqueue(
                summarize::NAME,
                json!({ "meeting_id": meeting_id, "transcript_url": url }),
            )
            .await?;
        info!("Transcript ready for meeting {}", meeting_id);
        Ok(Outcome::Applied("transcript stored"))
    }

    /// `call.recording_ready`: store the URL.
    pub async fn recording_ready(
        &self,
        event: &RecordingReadyEvent,
    ) -> Result<Outcome, LifecycleError> {
        let meeting_id = event.meeting_id().ok_or(LifecycleError::MissingMeetingId)?;
        let url = event
            .url()
            .ok_or(LifecycleError::MissingField("call_recording.url"))?;

        let id = meeting_id.clone();
        let updated = self
            .db
            .call(move |conn| MeetingRepository::set_recording_url(conn, &id, &url))
            .await?;
        if !updated {
            return Err(LifecycleError::MeetingNotFound(meeting_id));
        }

        info!("Recording ready for meeting {}", meeting_id);
        Ok(Outcome::Applied("recording stored"))
    }

    async fn find_meeting(&self, meeting_id: &str) -> Result<MeetingRecord, LifecycleError> {
        let id = meeting_id.to_string();
        self.db
            .call(move |conn| MeetingRepository::get(conn, &id))
            .await?
            .ok_or_else(|| LifecycleError::MeetingNotFound(meeting_id.to_string()))
    }

    async fn find_agent(&self, agent_id: &str) -> anyhow::Result<Option<AgentRecord>> {
        let id = agent_id.to_string();
        self.db
            .call(move |conn| AgentRepository::get(conn, &id))
            .await
    }

    async fn mark_ended(&self, meeting_id: &str) -> anyhow::Result<bool> {
        let id = meeting_id.to_string();
        let updated = self
            .db
            .call(move |conn| MeetingRepository::mark_ended(conn, &id, &now_timestamp()))
            .await?;
        if updated {
            info!("Meeting {} ended", meeting_id);
        } else {
            debug!("Meeting {} was not active, nothing to end", meeting_id);
        }
        Ok(updated)
    }

    async fn backfill_started_at(&self, meeting_id: &str, now: &str) -> anyhow::Result<()> {
        let (id, now) = (meeting_id.to_string(), now.to_string());
        if self
            .db
            .call(move |conn| MeetingRepository::backfill_started_at(conn, &id, &now))
            .await?
        {
            debug!("Backfilled start time for meeting {}", meeting_id);
        }
        Ok(())
    }

    /// Ask the provider to cap the call for restricted owners. Best effort.
    async fn apply_duration_limit(&self, meeting: &MeetingRecord) -> anyhow::Result<()> {
        let user_id = meeting.user_id.clone();
        let owner = self
            .db
            .call(move |conn| UserRepository::get(conn, &user_id))
            .await?;
        let email = owner.as_ref().and_then(|owner| owner.email.as_deref());
        if self.config.is_unrestricted(email) {
            return Ok(());
        }

        if let Err(e) = self
            .gateway
            .update_call_settings(&meeting.id, self.config.max_duration_seconds)
            .await
        {
            warn!(
                "Failed to apply duration limit to meeting {}: {:#}",
                meeting.id, e
            );
        }
        Ok(())
    }

    async fn connect_agent(&self, meeting_id: &str, agent: &AgentRecord) -> anyhow::Result<()> {
        let session = self
            .gateway
            .connect_realtime_agent(meeting_id, &agent.id)
            .await?;
        session.update_instructions(&agent.instructions).await?;
        info!(
            "Agent {} connected to meeting {} (session {})",
            agent.id,
            meeting_id,
            session.session_id()
        );
        Ok(())
    }
}
