//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Shared secret expected in the ingress `Authorization` header
    pub api_key: String,

    /// URL that receives one POST per chat per batch
    pub external_webhook_url: String,

    /// HMAC secret for signing webhook bodies (optional)
    pub webhook_signing_secret: Option<String>,

    /// Webhook request timeout in seconds (default: 30)
    pub webhook_timeout_secs: u64,

    /// Maximum ingress request body size in bytes (default: 64KB)
    pub max_body_size: usize,

    /// Queue batching and retry settings
    pub queue: QueueSettings,
}

/// Batching, retry, and key layout for the message queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Prefix for Redis keys (e.g., "buffer-memory")
    pub key_prefix: String,
    /// Flush a batch once this many messages are buffered
    pub max_batch_size: usize,
    /// Flush a batch once its oldest message has waited this long
    pub max_batch_timeout_secs: u64,
    /// Retries after the first attempt before a batch is dead-lettered
    pub max_retries: u32,
    /// Base retry delay in seconds, doubled on every attempt
    pub retry_delay_secs: u64,
    /// Names this worker's in-flight lists; must be stable across restarts
    pub worker_id: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            key_prefix: "buffer-memory".to_string(),
            max_batch_size: 50,
            max_batch_timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 5,
            worker_id: "worker-0".to_string(),
        }
    }
}

impl QueueSettings {
    /// Load queue settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            key_prefix: env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            max_batch_size: parse_var("QUEUE_MAX_BATCH_SIZE")
                .unwrap_or(defaults.max_batch_size)
                .max(1),
            max_batch_timeout_secs: parse_var("QUEUE_MAX_BATCH_TIMEOUT_SECS")
                .unwrap_or(defaults.max_batch_timeout_secs),
            max_retries: parse_var("QUEUE_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay_secs: parse_var("QUEUE_RETRY_DELAY_SECS")
                .unwrap_or(defaults.retry_delay_secs),
            worker_id: env::var("QUEUE_WORKER_ID")
                .ok()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or(defaults.worker_id),
        }
    }

    /// Maximum time a message may wait in the buffer before the batch is flushed.
    #[must_use]
    pub const fn max_batch_timeout(&self) -> Duration {
        Duration::from_secs(self.max_batch_timeout_secs)
    }

    /// Delay before retrying a batch that failed on the given attempt (0-based).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(10);
        Duration::from_secs(self.retry_delay_secs.saturating_mul(factor))
    }

    /// Redis list that receives freshly enqueued messages.
    pub fn pending_key(&self) -> String {
        format!("{}:pending", self.key_prefix)
    }

    /// Redis sorted set holding batches waiting for a retry (score = due Unix time).
    pub fn retry_key(&self) -> String {
        format!("{}:retry", self.key_prefix)
    }

    /// Redis list holding batches that exhausted their retries.
    pub fn dead_letter_key(&self) -> String {
        format!("{}:dead", self.key_prefix)
    }

    /// Redis list of messages this worker has popped but not yet settled.
    pub fn processing_key(&self) -> String {
        format!("{}:processing:{}", self.key_prefix, self.worker_id)
    }

    /// Redis list of retry batches this worker has taken but not yet settled.
    pub fn retry_processing_key(&self) -> String {
        format!("{}:retry-processing:{}", self.key_prefix, self.worker_id)
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            api_key: env::var("API_KEY").context("API_KEY must be set")?,
            external_webhook_url: env::var("EXTERNAL_WEBHOOK_URL")
                .context("EXTERNAL_WEBHOOK_URL must be set")?,
            webhook_signing_secret: env::var("WEBHOOK_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            webhook_timeout_secs: parse_var("WEBHOOK_TIMEOUT_SECS").unwrap_or(30),
            max_body_size: parse_var("MAX_BODY_SIZE").unwrap_or(64 * 1024), // 64KB
            queue: QueueSettings::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("API_KEY must not be empty");
        }

        let url = reqwest::Url::parse(&self.external_webhook_url)
            .context("EXTERNAL_WEBHOOK_URL is not a valid URL")?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("EXTERNAL_WEBHOOK_URL must use http or https");
        }

        Ok(())
    }

    /// Webhook request timeout.
    #[must_use]
    pub const fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Create a default configuration for testing.
    ///
    /// Uses a Docker test container for Redis:
    /// `docker run -d --name buffer-relay-test-redis -p 6380:6379 redis:7`
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            redis_url: "redis://localhost:6380".into(),
            api_key: "secret123".into(),
            external_webhook_url: "http://127.0.0.1:9/webhook".into(),
            webhook_signing_secret: None,
            webhook_timeout_secs: 5,
            max_body_size: 64 * 1024,
            queue: QueueSettings::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
