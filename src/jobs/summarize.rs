//! Transcript summarization: runs after the provider reports a transcript.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{StepContext, Workflow, WorkflowError};
use crate::db::{Database, MeetingRepository};
use crate::llm::{ChatTurn, LanguageModel, SUMMARY_PROMPT};
use crate::meeting::transcript::{self, AnnotatedItem, TranscriptItem};

pub const NAME: &str = "summarize-transcript";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizePayload {
    pub meeting_id: String,
    pub transcript_url: String,
}

pub struct SummarizeTranscript {
    db: Database,
    http: reqwest::Client,
    llm: Arc<dyn LanguageModel>,
    model: String,
}

impl SummarizeTranscript {
    pub fn new(
        db: Database,
        http: reqwest::Client,
        llm: Arc<dyn LanguageModel>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            db,
            http,
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Workflow for SummarizeTranscript {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, ctx: &StepContext, payload: Value) -> Result<Value, WorkflowError> {
        let payload: SummarizePayload =
            serde_json::from_value(payload).context("Invalid summarize payload")?;
        let meeting_id = payload.meeting_id.as_str();
        let url = payload.transcript_url.as_str();

        let raw: String = ctx
            .run("fetch-transcript", move || transcript::fetch(&self.http, url))
            .await?;

        let raw = &raw;
        let items: Vec<TranscriptItem> = ctx
            .run("parse-transcript", move || async move { transcript::parse_jsonl(raw) })
            .await?;

        let items = &items;
        let annotated: Vec<AnnotatedItem> = ctx
            .run("add-speakers", move || async move {
                let speakers = transcript::lookup_speakers(&self.db, items).await?;
                Ok::<_, anyhow::Error>(transcript::annotate(items.clone(), &speakers, false))
            })
            .await?;

        let annotated = &annotated;
        let summary: String = ctx
            .run("summarize", move || async move {
                let rendered = serde_json::to_string(annotated)?;
                let turns = [
                    ChatTurn::system(SUMMARY_PROMPT),
                    ChatTurn::user(format!("Summarize the following transcript: {}", rendered)),
                ];
                self.llm.complete(&self.model, &turns).await
            })
            .await?;

        let summary_ref = &summary;
        ctx.run("save-summary", move || async move {
            let id = meeting_id.to_string();
            let text = summary_ref.clone();
            let saved = self
                .db
                .call(move |conn| MeetingRepository::store_summary(conn, &id, &text))
                .await?;
            if !saved {
                anyhow::bail!("Meeting {} no longer exists", meeting_id);
            }
            Ok::<_, anyhow::Error>(saved)
        })
        .await?;

        info!(
            "Stored a {} character summary for meeting {}",
            summary.len(),
            meeting_id
        );
        Ok(json!({
            "meeting_id": meeting_id,
            "utterances": annotated.len(),
            "summary_chars": summary.len(),
        }))
    }
}
