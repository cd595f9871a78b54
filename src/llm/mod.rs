//! Language model access for summaries and post-call chat.

pub mod openai;

pub use openai::OpenAiClient;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run a chat completion and return the trimmed reply text.
    ///
    /// An empty reply is an error.
    async fn complete(&self, model: &str, turns: &[ChatTurn]) -> Result<String>;
}

/// System prompt for meeting summaries.
pub const SUMMARY_PROMPT: &str = "You are an expert summarizer. You write readable, concise, simple content. \
You are given a transcript of a meeting and you need to summarize it.

Use the following markdown structure for every output:

### Overview
Provide a detailed, engaging summary of the session's content. Focus on major features, \
user workflows, and any key takeaways. Write in a narrative style, using full sentences. \
Highlight unique or powerful aspects of the product, platform, or discussion.

### Notes
Break down key content into thematic sections with timestamp ranges. Each section should \
summarize key points, actions, or demos in bullet format.

Example:
#### Section Name
- Main point or demo shown here
- Another key insight or interaction
- Follow-up tool or explanation provided

#### Next Section
- Feature X automatically does Y
- Mention of integration with Z";

pub fn chat_system_prompt(summary: &str, instructions: &str) -> String {
    format!(
        "You have to answer questions about a meeting that has already ended. \
Here is its summary:

{}

Answer according to your original instructions:

{}

Keep the conversation consistent: use the summary and the previous messages \
for context, and stay in the persona and style those instructions describe.",
        summary.trim(),
        instructions.trim()
    )
}
