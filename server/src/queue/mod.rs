//! Message Queue
//!
//! Buffers accepted messages until the batch worker hands them to the relay.
//!
//! Architecture:
//! - Producers call [`MessageQueue::send`]; the Redis backend pushes a
//!   [`QueuedMessage`] onto `<prefix>:pending` (list, LPUSH).
//! - The batch worker moves pending entries into its own
//!   `<prefix>:processing:<worker>` list (BRPOPLPUSH), buffers them in a
//!   [`MessageBatcher`], and flushes when the batch is full or its oldest
//!   message was enqueued long enough ago.
//! - Failed batches are scheduled into `<prefix>:retry` (sorted set, score =
//!   Unix timestamp when due) and end up in `<prefix>:dead` once their
//!   retries are exhausted. Due retries are moved into
//!   `<prefix>:retry-processing:<worker>` while they run.
//! - Entries leave a processing list only after their batch was delivered,
//!   rescheduled, or dead-lettered. On startup the worker puts anything left
//!   in its processing lists back, so a crash never loses an accepted message.

pub mod batcher;
pub mod memory;
pub mod redis;
pub mod worker;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use batcher::MessageBatcher;
pub use memory::InMemoryQueue;
pub use redis::{create_redis_client, RecoveredWork, RedisQueue};
pub use worker::spawn_batch_worker;

use crate::types::BufferMessage;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),
    #[error("JSON serialize error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Queue unavailable")]
    Unavailable,
}

/// Destination for accepted messages.
pub trait MessageQueue: Send + Sync {
    /// Enqueue one message. Success means the queue has taken ownership of it.
    fn send<'a>(&'a self, message: &'a BufferMessage) -> BoxFuture<'a, Result<(), QueueError>>;
}

/// Wire format of a pending queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    #[serde(flatten)]
    pub message: BufferMessage,
    /// Unix milliseconds when the message entered the queue. Absent on
    /// entries written without it.
    #[serde(rename = "enqueuedAt", default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<i64>,
}

impl QueuedMessage {
    pub fn new(message: BufferMessage, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            message,
            enqueued_at: Some(enqueued_at.timestamp_millis()),
        }
    }
}

/// A flushed batch travelling through the relay, retry, and dead-letter stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedBatch {
    pub batch_id: Uuid,
    /// Number of failed attempts so far.
    pub attempt: u32,
    pub messages: Vec<BufferMessage>,
    pub created_at: DateTime<Utc>,
}

impl QueuedBatch {
    /// Wrap freshly flushed messages as a first-attempt batch.
    pub fn new(messages: Vec<BufferMessage>) -> Self {
        Self {
            batch_id: Uuid::now_v7(),
            attempt: 0,
            messages,
            created_at: Utc::now(),
        }
    }
}

/// A batch that will not be retried again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterBatch {
    pub batch: QueuedBatch,
    /// Error of the last attempt.
    pub error: String,
    pub failed_at: DateTime<Utc>,
}
