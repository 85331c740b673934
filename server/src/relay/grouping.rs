//! Chat Grouping and Payload Construction

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::error::PayloadError;
use crate::types::{
    millis_to_iso_string, to_iso_string, BufferMessage, ProcessedChatPayload, ProcessedMessage,
};

/// Messages of one chat taken from a single batch, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatGroup {
    pub chat_id: String,
    pub messages: Vec<BufferMessage>,
}

/// Partition a batch by `chat_id`.
///
/// Groups come out in the order their chat was first seen; each group keeps
/// its messages in batch order.
pub fn group_by_chat(messages: &[BufferMessage]) -> Vec<ChatGroup> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<ChatGroup> = Vec::new();

    for message in messages {
        let slot = *index.entry(message.chat_id.as_str()).or_insert_with(|| {
            groups.push(ChatGroup {
                chat_id: message.chat_id.clone(),
                messages: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].messages.push(message.clone());
    }

    groups
}

/// Build the webhook payload for one chat group.
///
/// Messages are sorted by timestamp (stable, so ties keep arrival order) and
/// the extension ids are taken from the oldest message.
pub fn build_payload(
    group: &ChatGroup,
    processed_at: DateTime<Utc>,
) -> Result<ProcessedChatPayload, PayloadError> {
    let mut sorted: Vec<&BufferMessage> = group.messages.iter().collect();
    sorted.sort_by_key(|m| m.timestamp);

    let conversation = sorted
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let messages = sorted
        .iter()
        .map(|m| {
            let timestamp_iso =
                millis_to_iso_string(m.timestamp).ok_or_else(|| PayloadError::InvalidTimestamp {
                    message_id: m.message_id.clone(),
                    timestamp: m.timestamp,
                })?;
            Ok(ProcessedMessage {
                message_id: m.message_id.clone(),
                content: m.content.clone(),
                message_type: m.message_type.clone(),
                timestamp: m.timestamp,
                timestamp_iso,
                account_id: m.account_id.clone(),
                conversation_id: m.conversation_id.clone(),
            })
        })
        .collect::<Result<Vec<_>, PayloadError>>()?;

    let first = sorted.first();

    Ok(ProcessedChatPayload {
        chat_id: group.chat_id.clone(),
        account_id: first.and_then(|m| m.account_id.clone()),
        conversation_id: first.and_then(|m| m.conversation_id.clone()),
        total_messages: group.messages.len(),
        conversation,
        messages,
        processed_at: to_iso_string(processed_at),
    })
}
