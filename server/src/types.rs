//! Message Types
//!
//! Data shapes shared by the ingress, the queue, and the batch relay.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Default `messageType` applied when the client omits one.
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

/// A single chat message as held in the queue.
///
/// Built once by the ingress and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferMessage {
    /// Grouping key.
    pub chat_id: String,
    pub message_id: String,
    /// Non-empty, trimmed.
    pub content: String,
    pub message_type: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "account_id", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(
        rename = "conversation_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,
}

/// A message inside an outbound payload: `chatId` dropped, ISO timestamp added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    pub message_id: String,
    pub content: String,
    pub message_type: String,
    pub timestamp: i64,
    #[serde(rename = "timestampISO")]
    pub timestamp_iso: String,
    #[serde(rename = "account_id", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(
        rename = "conversation_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,
}

/// Body posted to the external webhook, one per chat per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedChatPayload {
    pub chat_id: String,
    #[serde(rename = "account_id", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(
        rename = "conversation_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,
    pub total_messages: usize,
    /// Every message's content joined by `\n`, oldest first.
    pub conversation: String,
    pub messages: Vec<ProcessedMessage>,
    pub processed_at: String,
}

/// Render a timestamp the way JavaScript's `Date.toISOString` does
/// (`2024-01-01T00:00:00.000Z`).
pub fn to_iso_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render epoch milliseconds as ISO-8601, or `None` when out of range.
pub fn millis_to_iso_string(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis).map(to_iso_string)
}
