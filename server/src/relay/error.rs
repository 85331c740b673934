//! Batch Relay Error Types

use thiserror::Error;

/// A chat payload that cannot be built from its messages.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Message {message_id} has timestamp {timestamp} outside the representable range")]
    InvalidTimestamp { message_id: String, timestamp: i64 },
}

/// Failure posting one payload to the external webhook.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Webhook responded with HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("Webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of a whole batch invocation.
///
/// Processing stops at the first chat the webhook does not accept.
/// `delivered` lists the chats whose payloads were already accepted in this
/// invocation; they will be sent again if the batch is retried.
#[derive(Debug, Error)]
#[error("Delivery for chat {chat_id} failed: {source}")]
pub struct RelayError {
    pub chat_id: String,
    pub delivered: Vec<String>,
    #[source]
    pub source: DeliveryError,
}

impl RelayError {
    /// Whether the whole batch should be retried.
    ///
    /// Webhook status and transport failures are transient. A payload that
    /// cannot be encoded fails identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.source, DeliveryError::Encode(_))
    }

    /// Chat whose group caused the failure.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Chats delivered before the failure.
    pub fn delivered(&self) -> &[String] {
        &self.delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_status_failures_are_retryable() {
        let err = RelayError {
            chat_id: "c1".into(),
            delivered: vec![],
            source: DeliveryError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
        };
        assert!(err.is_retryable());
        assert_eq!(err.chat_id(), "c1");
        assert_eq!(
            err.to_string(),
            "Delivery for chat c1 failed: Webhook responded with HTTP 500 Internal Server Error"
        );
    }

    #[test]
    fn encode_failures_are_not_retryable() {
        let encode_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = RelayError {
            chat_id: "c2".into(),
            delivered: vec!["c1".into()],
            source: DeliveryError::Encode(encode_error),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.delivered(), ["c1".to_string()]);
    }

    #[test]
    fn invalid_timestamp_names_the_message() {
        let err = PayloadError::InvalidTimestamp {
            message_id: "m1".into(),
            timestamp: i64::MAX,
        };
        assert!(err.to_string().starts_with("Message m1 has timestamp"));
    }
}
