use serde::Deserialize;
use std::time::Duration;

use crate::services::completion::{CompletionConfig, ModelParams};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Bearer token for the AI provider
    pub ai_api_key: String,

    /// Chat-completions endpoint
    #[serde(default = "default_ai_base_url")]
    pub ai_base_url: String,

    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    pub ai_temperature: Option<f32>,

    pub ai_max_tokens: Option<u32>,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_ai_timeout_ms")]
    pub ai_timeout_ms: u64,

    #[serde(default = "default_ai_max_retries")]
    pub ai_max_retries: u32,

    #[serde(default = "default_ai_backoff_base_ms")]
    pub ai_backoff_base_ms: u64,

    /// Longest wait between attempts; a longer `retry-after` ends the call
    #[serde(default = "default_ai_max_backoff_ms")]
    pub ai_max_backoff_ms: u64,

    /// Sent as `HTTP-Referer` for provider attribution
    pub ai_referer: Option<String>,

    /// Sent as `X-Title` for provider attribution
    pub ai_title: Option<String>,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// Shared secret for the change-event hook; the hook is not mounted without it
    pub webhook_secret: Option<String>,

    /// Worker-only: serve Prometheus metrics on this address when set
    pub worker_metrics_addr: Option<String>,

    /// Age after which a `processing` job is considered stalled
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_ai_base_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_ai_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_ai_timeout_ms() -> u64 {
    60_000
}

fn default_ai_max_retries() -> u32 {
    2
}

fn default_ai_backoff_base_ms() -> u64 {
    500
}

fn default_ai_max_backoff_ms() -> u64 {
    30_000
}

fn default_stall_timeout_secs() -> u64 {
    900
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn completion_config(&self) -> CompletionConfig {
        let mut config = CompletionConfig::new(&self.ai_base_url, &self.ai_api_key, &self.ai_model);
        config.default_params = ModelParams {
            temperature: self.ai_temperature,
            max_tokens: self.ai_max_tokens,
            top_p: None,
        };
        config.timeout = Duration::from_millis(self.ai_timeout_ms);
        config.max_retries = self.ai_max_retries;
        config.backoff_base = Duration::from_millis(self.ai_backoff_base_ms);
        config.max_backoff = Duration::from_millis(self.ai_max_backoff_ms);
        config.referer = self.ai_referer.clone();
        config.title = self.ai_title.clone();
        config
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Webhook secret, treating a blank value as unset.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
    }
}
