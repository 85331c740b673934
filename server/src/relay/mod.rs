//! Batch Relay
//!
//! Consumer side of the buffer: takes a batch of queued messages, groups them
//! by chat, and posts one payload per chat to the external webhook.
//!
//! Groups are delivered one after another. The first delivery failure aborts
//! the rest of the batch and is returned to the queue runtime, which retries
//! or dead-letters the whole batch. Groups whose payload cannot be built are
//! handed back in the report so the runtime can dead-letter just those.

pub mod delivery;
pub mod error;
pub mod grouping;
pub mod signing;

use chrono::Utc;
use tracing::{error, info, instrument};

pub use delivery::WebhookClient;
pub use error::{DeliveryError, PayloadError, RelayError};
pub use grouping::{build_payload, group_by_chat, ChatGroup};

use crate::types::BufferMessage;

/// A chat whose payload could not be built. It is left out of delivery so the
/// other chats of the batch still go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedChat {
    pub chat_id: String,
    pub messages: Vec<BufferMessage>,
    pub reason: String,
}

/// Summary of a delivered batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of webhook calls made (one per chat).
    pub chats: usize,
    /// Number of messages relayed.
    pub messages: usize,
    /// Chats skipped because their payload could not be built.
    pub rejected: Vec<RejectedChat>,
}

/// Groups batches by chat and relays them to the webhook.
#[derive(Debug, Clone)]
pub struct BatchRelay {
    webhook: WebhookClient,
}

impl BatchRelay {
    #[must_use]
    pub const fn new(webhook: WebhookClient) -> Self {
        Self { webhook }
    }

    /// Relay one batch. Returns only after every buildable chat group was
    /// accepted by the webhook, or with the first delivery failure.
    ///
    /// Payloads are built before anything is sent. A group that cannot be
    /// built is reported in [`BatchReport::rejected`] instead of failing the
    /// batch.
    #[instrument(skip_all, fields(batch_size = messages.len()))]
    pub async fn handle_batch(&self, messages: &[BufferMessage]) -> Result<BatchReport, RelayError> {
        let groups = group_by_chat(messages);
        info!(chats = groups.len(), "Processing batch");

        let processed_at = Utc::now();
        let mut payloads = Vec::with_capacity(groups.len());
        let mut rejected = Vec::new();

        for group in groups {
            match build_payload(&group, processed_at) {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    error!(
                        chat_id = %group.chat_id,
                        messages = group.messages.len(),
                        error = %e,
                        "Failed to build chat payload, setting chat aside"
                    );
                    rejected.push(RejectedChat {
                        chat_id: group.chat_id,
                        messages: group.messages,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut delivered: Vec<String> = Vec::with_capacity(payloads.len());
        let mut relayed = 0;

        for payload in &payloads {
            if let Err(source) = self.webhook.send(payload).await {
                error!(
                    chat_id = %payload.chat_id,
                    url = %self.webhook.url(),
                    error = %source,
                    "Webhook delivery failed, aborting batch"
                );
                return Err(RelayError {
                    chat_id: payload.chat_id.clone(),
                    delivered,
                    source,
                });
            }

            info!(
                chat_id = %payload.chat_id,
                messages = payload.total_messages,
                conversation_chars = payload.conversation.chars().count(),
                "Chat payload delivered"
            );
            relayed += payload.total_messages;
            delivered.push(payload.chat_id.clone());
        }

        info!(
            chats = delivered.len(),
            rejected = rejected.len(),
            "Batch delivered"
        );

        Ok(BatchReport {
            chats: delivered.len(),
            messages: relayed,
            rejected,
        })
    }
}
