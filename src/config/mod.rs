use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variables that override secrets from the config file.
pub mod env_keys {
    pub const VIDEO_API_KEY: &str = "CALLPILOT_VIDEO_API_KEY";
    pub const VIDEO_API_SECRET: &str = "CALLPILOT_VIDEO_API_SECRET";
    pub const CHAT_API_KEY: &str = "CALLPILOT_CHAT_API_KEY";
    pub const CHAT_API_SECRET: &str = "CALLPILOT_CHAT_API_SECRET";
    pub const LLM_API_KEY: &str = "CALLPILOT_LLM_API_KEY";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub video: VideoConfig,
    pub chat: ChatConfig,
    pub llm: LlmConfig,
    pub meeting: MeetingConfig,
    pub guards: GuardConfig,
    pub rate_limit: RateLimitConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `<data_dir>/callpilot/callpilot.db`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub call_type: String,
    /// Bridge that attaches a realtime voice model to a live call.
    pub realtime_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub channel_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub summary_model: String,
    pub chat_model: String,
    pub realtime_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetingConfig {
    /// Hard cap applied to calls owned by restricted users.
    pub max_duration_seconds: u64,
    /// Owners exempt from the duration cap and the meeting count cap.
    pub unrestricted_emails: Vec<String>,
    pub max_meetings_per_user: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub connection_ttl_seconds: u64,
    pub message_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub poll_interval_ms: u64,
    pub concurrency: usize,
    pub step_attempts: u32,
    pub workflow_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3737,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://video.stream-io-api.com".to_string(),
            call_type: "default".to_string(),
            realtime_url: "http://127.0.0.1:3838".to_string(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://chat.stream-io-api.com".to_string(),
            channel_type: "messaging".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            summary_model: "gpt-4o".to_string(),
            chat_model: "gpt-4o".to_string(),
            realtime_model: "gpt-4o-realtime-preview".to_string(),
        }
    }
}

impl Default for MeetingConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: 600,
            unrestricted_emails: Vec::new(),
            max_meetings_per_user: 3,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            connection_ttl_seconds: 120,
            message_ttl_seconds: 300,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 100,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            concurrency: 4,
            step_attempts: 3,
            workflow_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl MeetingConfig {
    pub fn is_unrestricted(&self, email: Option<&str>) -> bool {
        match email {
            Some(email) => self
                .unrestricted_emails
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(email)),
            None => false,
        }
    }
}

impl GuardConfig {
    pub fn connection_ttl(&self) -> Duration {
        Duration::from_secs(self.connection_ttl_seconds)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_seconds)
    }
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Config {
    /// Load from the default location, creating it with defaults if absent.
    pub fn load() -> Result<Self> {
        let config_path = global::config_file()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config.with_env_overrides());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", path);
        Ok(config.with_env_overrides())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => global::db_file(),
        }
    }

    fn with_env_overrides(mut self) -> Self {
        override_from_env(&mut self.video.api_key, env_keys::VIDEO_API_KEY);
        override_from_env(&mut self.video.api_secret, env_keys::VIDEO_API_SECRET);
        override_from_env(&mut self.chat.api_key, env_keys::CHAT_API_KEY);
        override_from_env(&mut self.chat.api_secret, env_keys::CHAT_API_SECRET);
        override_from_env(&mut self.llm.api_key, env_keys::LLM_API_KEY);
        self
    }
}

fn override_from_env(field: &mut String, key: &str) {
    if let Ok(value) = std::env::var(key) {
        if !value.trim().is_empty() {
            *field = value;
        }
    }
}
