use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{ChatTurn, LanguageModel};
use crate::config::LlmConfig;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Chat completions over the OpenAI-compatible HTTP API.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Self {
        info!("Initialized language model client with base URL: {}", config.base_url);

        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, model: &str, turns: &[ChatTurn]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("Requesting completion from {} with {} turns", model, turns.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model,
                messages: turns,
            })
            .send()
            .await
            .context("Failed to send completion request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read completion response body")?;

        if !status.is_success() {
            error!("Completion request failed with status {}: {}", status, body);
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&body) {
                anyhow::bail!("Language model error: {}", error_response.error.message);
            }
            anyhow::bail!("Completion request failed with status {}: {}", status, body);
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).context("Failed to parse completion response")?;
        extract_reply(parsed)
    }
}

fn extract_reply(response: CompletionResponse) -> Result<String> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        anyhow::bail!("Language model returned an empty reply");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_reply() {
        let response: CompletionResponse = serde_json::from_str(
            r#"{ "choices": [ { "message": { "role": "assistant", "content": "  Hello  " } } ] }"#,
        )
        .unwrap();
        assert_eq!(extract_reply(response).unwrap(), "Hello");
    }

    #[test]
    fn test_empty_reply_is_an_error() {
        let empty: CompletionResponse = serde_json::from_str(r#"{ "choices": [] }"#).unwrap();
        assert!(extract_reply(empty).is_err());

        let blank: CompletionResponse = serde_json::from_str(
            r#"{ "choices": [ { "message": { "content": "   " } } ] }"#,
        )
        .unwrap();
        assert!(extract_reply(blank).is_err());

        let null: CompletionResponse =
            serde_json::from_str(r#"{ "choices": [ { "message": { "content": null } } ] }"#).unwrap();
        assert!(extract_reply(null).is_err());
    }
}
