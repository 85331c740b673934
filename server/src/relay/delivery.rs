//! Webhook Delivery
//!
//! Posts chat payloads to the configured external webhook.

use tracing::{debug, warn};

use super::error::DeliveryError;
use super::signing;
use crate::config::Config;
use crate::types::ProcessedChatPayload;

/// Characters of the webhook response body kept in logs.
const RESPONSE_PREVIEW_CHARS: usize = 500;

/// HTTP client bound to the external webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
    signing_secret: Option<String>,
}

impl WebhookClient {
    /// Create a client from an existing HTTP client.
    pub fn new(http: reqwest::Client, url: impl Into<String>, signing_secret: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            signing_secret,
        }
    }

    /// Build a client with the configured request timeout.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.webhook_timeout())
            .build()?;

        Ok(Self::new(
            http,
            config.external_webhook_url.clone(),
            config.webhook_signing_secret.clone(),
        ))
    }

    /// Webhook URL this client posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one payload. Any 2xx response is success.
    pub async fn send(&self, payload: &ProcessedChatPayload) -> Result<(), DeliveryError> {
        debug!(
            chat_id = %payload.chat_id,
            total_messages = payload.total_messages,
            "Sending chat payload to webhook"
        );

        let body = serde_json::to_vec(payload)?;

        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(secret) = &self.signing_secret {
            let signed_at = chrono::Utc::now().timestamp();
            for (name, value) in signing::signature_headers(secret, &body, signed_at) {
                request = request.header(name, value);
            }
        }

        let start = std::time::Instant::now();
        let response = request.body(body).send().await?;
        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if !status.is_success() {
            warn!(
                chat_id = %payload.chat_id,
                status = status.as_u16(),
                latency_ms,
                "Webhook rejected chat payload"
            );
            return Err(DeliveryError::Status(status));
        }

        let text = response.text().await.unwrap_or_default();
        let preview: String = text.chars().take(RESPONSE_PREVIEW_CHARS).collect();
        debug!(
            chat_id = %payload.chat_id,
            status = status.as_u16(),
            latency_ms,
            response = %preview,
            "Webhook accepted chat payload"
        );

        Ok(())
    }
}
