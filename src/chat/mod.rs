//! Post-call chat: answers questions about a completed meeting in its
//! channel, as the meeting's agent.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::db::{AgentRepository, Database, MeetingRepository};
use crate::gateway::{ChatMessage, ChatProvider, ProviderUser};
use crate::guards::TtlGuard;
use crate::llm::{chat_system_prompt, ChatTurn, LanguageModel};
use crate::meeting::{LifecycleError, MeetingStatus, Outcome};
use crate::webhook::MessageNewEvent;

/// Prior messages included as context.
const HISTORY_TURNS: usize = 5;
const HISTORY_FETCH: usize = 20;

#[derive(Clone)]
pub struct ChatResponder {
    db: Database,
    chat: Arc<dyn ChatProvider>,
    llm: Arc<dyn LanguageModel>,
    model: String,
    handled: TtlGuard<String>,
}

impl ChatResponder {
    pub fn new(
        db: Database,
        chat: Arc<dyn ChatProvider>,
        llm: Arc<dyn LanguageModel>,
        model: impl Into<String>,
        message_ttl: Duration,
    ) -> Self {
        Self {
            db,
            chat,
            llm,
            model: model.into(),
            handled: TtlGuard::new("chat message", message_ttl),
        }
    }

    pub fn handled(&self) -> &TtlGuard<String> {
        &self.handled
    }

    /// `message.new`: reply once per provider message id.
    ///
    /// A failed reply releases the message id so a redelivery can retry.
    pub async fn handle(&self, event: &MessageNewEvent) -> Result<Outcome, LifecycleError> {
        let message_id = event
            .message_id()
            .ok_or(LifecycleError::MissingField("message.id"))?;
        let channel_id = event.channel_id().ok_or(LifecycleError::MissingMeetingId)?;
        let author_id = event
            .author_id()
            .ok_or(LifecycleError::MissingField("message.user.id"))?;
        let Some(text) = event.text() else {
            return Ok(Outcome::Skipped("empty message"));
        };

        if !self.handled.try_acquire(message_id.clone()) {
            return Ok(Outcome::Skipped("message already handled"));
        }

        let result = self
            .respond(&channel_id, &message_id, &author_id, &text)
            .await;
        if result.is_err() {
            self.handled.release(&message_id);
        }
        result
    }

    async fn respond(
        &self,
        meeting_id: &str,
        message_id: &str,
        author_id: &str,
        text: &str,
    ) -> Result<Outcome, LifecycleError> {
        let id = meeting_id.to_string();
        let meeting = self
            .db
            .call(move |conn| MeetingRepository::get(conn, &id))
            .await?
            .ok_or_else(|| LifecycleError::MeetingNotFound(meeting_id.to_string()))?;

        if meeting.status != MeetingStatus::Completed {
            debug!(
                "Chat message in meeting {} ignored, status is {}",
                meeting_id, meeting.status
            );
            return Ok(Outcome::Skipped("meeting not completed"));
        }

        let agent_id = meeting.agent_id.clone();
        let agent = self
            .db
            .call(move |conn| AgentRepository::get(conn, &agent_id))
            .await?
            .ok_or_else(|| LifecycleError::AgentNotFound(meeting.agent_id.clone()))?;

        if author_id == agent.id {
            return Ok(Outcome::Skipped("message from agent"));
        }

        let history = self.chat.recent_messages(meeting_id, HISTORY_FETCH).await?;

        let mut turns = vec![ChatTurn::system(chat_system_prompt(
            meeting.summary.as_deref().unwrap_or_default(),
            &agent.instructions,
        ))];
        turns.extend(history_turns(&history, message_id, &agent.id));
        turns.push(ChatTurn::user(text));

        let reply = self.llm.complete(&self.model, &turns).await?;
        if reply.trim().is_empty() {
            return Err(anyhow::anyhow!("Language model returned an empty reply").into());
        }

        self.chat
            .upsert_user(&ProviderUser::agent(&agent.id, &agent.name))
            .await
            .context("Failed to register agent with chat")?;
        self.chat
            .send_message(meeting_id, &agent.id, reply.trim())
            .await?;

        info!("Agent {} replied in meeting {}", agent.id, meeting_id);
        Ok(Outcome::Applied("reply sent"))
    }
}

/// The last few non-empty messages before `current_id`, oldest first, with
/// the agent's own messages as assistant turns.
pub fn history_turns(messages: &[ChatMessage], current_id: &str, agent_id: &str) -> Vec<ChatTurn> {
    let prior: Vec<&ChatMessage> = messages
        .iter()
        .filter(|message| message.id != current_id && !message.text.trim().is_empty())
        .collect();

    prior[prior.len().saturating_sub(HISTORY_TURNS)..]
        .iter()
        .map(|message| {
            if message.user_id.as_deref() == Some(agent_id) {
                ChatTurn::assistant(message.text.trim())
            } else {
                ChatTurn::user(message.text.trim())
            }
        })
        .collect()
}
