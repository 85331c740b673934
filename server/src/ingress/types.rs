//! Ingress Request and Response Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::IngressError;
use crate::types::{BufferMessage, DEFAULT_MESSAGE_TYPE};

/// Response body for every ingress request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferApiResponse {
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Machine-readable error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BufferApiResponse {
    /// Successful enqueue of a message for `chat_id`.
    pub fn queued(chat_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "Message added to the queue".to_string(),
            chat_id: Some(chat_id.into()),
            error: None,
        }
    }

    /// Failure with a stable error code.
    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            chat_id: None,
            error: Some(code.to_string()),
        }
    }
}

/// Validate a parsed request body and turn it into a queue message.
///
/// `chatId` and `content` must be non-empty strings after trimming. Missing
/// optional fields get defaults: a fresh UUID for `messageId`, `"text"` for
/// `messageType`, and `now` for `timestamp` (also when it is `0`).
pub fn normalize_message(body: &Value, now: DateTime<Utc>) -> Result<BufferMessage, IngressError> {
    let object = body
        .as_object()
        .ok_or_else(|| IngressError::Validation("Body must be a JSON object".into()))?;

    let chat_id = required_text(object, "chatId")?;
    let content = required_text(object, "content")?;

    let message_id = match optional_string(object, "messageId")? {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    let message_type = optional_string(object, "messageType")?
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_MESSAGE_TYPE)
        .to_string();

    let timestamp = match optional_timestamp(object)? {
        Some(ts) if ts != 0 => ts,
        _ => now.timestamp_millis(),
    };

    Ok(BufferMessage {
        chat_id,
        message_id,
        content,
        message_type,
        timestamp,
        account_id: optional_string(object, "account_id")?.map(str::to_string),
        conversation_id: optional_string(object, "conversation_id")?.map(str::to_string),
    })
}

fn required_text(object: &Map<String, Value>, field: &str) -> Result<String, IngressError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| IngressError::Validation("Required fields: chatId and content".into()))
}

/// A string field that may be absent or `null`; any other type is rejected.
fn optional_string<'a>(
    object: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, IngressError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(IngressError::Validation(format!(
            "Field {field} must be a string"
        ))),
    }
}

/// A millisecond timestamp that may be absent or `null`.
///
/// Values that cannot be rendered as a calendar date are rejected here, so a
/// single message can never poison the batch it lands in.
fn optional_timestamp(object: &Map<String, Value>) -> Result<Option<i64>, IngressError> {
    let millis = match object.get("timestamp") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .ok_or_else(|| {
                IngressError::Validation("Field timestamp must be an integer".into())
            })?,
        Some(_) => {
            return Err(IngressError::Validation(
                "Field timestamp must be a number of milliseconds".into(),
            ))
        }
    };

    if DateTime::from_timestamp_millis(millis).is_none() {
        return Err(IngressError::Validation(format!(
            "Field timestamp {millis} is out of range"
        )));
    }

    Ok(Some(millis))
}
