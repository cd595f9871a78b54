//! Hard duration cap for calls owned by restricted users.
//!
//! The provider's own limit is best effort. This workflow sleeps for the
//! configured duration, then ends the call and closes the meeting if nothing
//! else has done so already.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{StepContext, Workflow, WorkflowError};
use crate::db::{now_timestamp, Database, MeetingRepository};
use crate::gateway::CallGateway;
use crate::meeting::MeetingStatus;

pub const NAME: &str = "end-meeting-on-time-limit";

/// Whole-workflow retries when ending the call fails.
const RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeLimitPayload {
    pub meeting_id: String,
    pub call_id: String,
    pub time_limit_seconds: u64,
}

pub struct EndMeetingOnTimeLimit {
    db: Database,
    gateway: Arc<dyn CallGateway>,
}

impl EndMeetingOnTimeLimit {
    pub fn new(db: Database, gateway: Arc<dyn CallGateway>) -> Self {
        Self { db, gateway }
    }
}

#[async_trait]
impl Workflow for EndMeetingOnTimeLimit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn retries(&self) -> Option<u32> {
        Some(RETRIES)
    }

    async fn run(&self, ctx: &StepContext, payload: Value) -> Result<Value, WorkflowError> {
        let payload: TimeLimitPayload =
            serde_json::from_value(payload).context("Invalid time limit payload")?;
        let meeting_id = payload.meeting_id.as_str();
        let call_id = payload.call_id.as_str();

        ctx.sleep(
            "wait-for-time-limit",
            Duration::from_secs(payload.time_limit_seconds),
        )
        .await?;

        let status: Option<MeetingStatus> = ctx
            .run("check-meeting-status", move || async move {
                let id = meeting_id.to_string();
                self.db
                    .call(move |conn| MeetingRepository::status(conn, &id))
                    .await
            })
            .await?;

        if status != Some(MeetingStatus::Active) {
            debug!(
                "Time limit reached for meeting {} but it is {:?}, skipping",
                meeting_id, status
            );
            return Ok(json!({ "skipped": true, "reason": "Meeting not active" }));
        }

        ctx.run("end-call", move || async move {
            self.gateway.end_call(call_id).await?;
            Ok::<_, anyhow::Error>(true)
        })
        .await?;

        let updated: bool = ctx
            .run("update-meeting-status", move || async move {
                let id = meeting_id.to_string();
                self.db
                    .call(move |conn| MeetingRepository::mark_ended(conn, &id, &now_timestamp()))
                    .await
            })
            .await?;

        info!(
            "Time limit of {}s ended meeting {} (transitioned: {})",
            payload.time_limit_seconds, meeting_id, updated
        );
        Ok(json!({
            "success": true,
            "meeting_id": meeting_id,
            "transitioned": updated,
        }))
    }
}
