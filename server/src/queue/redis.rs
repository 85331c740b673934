//! Redis Queue Backend
//!
//! Pending messages live in a list, delayed retries in a sorted set, and
//! exhausted batches in a dead-letter list. Work a worker has taken but not
//! settled sits in that worker's processing lists.

use chrono::Utc;
use fred::clients::Client;
use fred::interfaces::{ListInterface, LuaInterface, SortedSetsInterface};
use futures::future::BoxFuture;
use tracing::info;

use super::{DeadLetterBatch, MessageQueue, QueueError, QueuedBatch, QueuedMessage};
use crate::config::QueueSettings;
use crate::types::BufferMessage;

/// Maximum number of due retries promoted per worker iteration.
const RETRY_PROMOTE_LIMIT: usize = 50;

/// Atomically moves due items from the retry sorted set (KEYS[1]) into the
/// worker's retry processing list (KEYS[2]) and returns them.
const TAKE_DUE_RETRIES_LUA: &str = r"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
if #items > 0 then
    redis.call('ZREM', KEYS[1], unpack(items))
    redis.call('LPUSH', KEYS[2], unpack(items))
end
return items
";

/// Removes one occurrence of each ARGV entry from the list at KEYS[1].
const RELEASE_LUA: &str = r"
local removed = 0
for i = 1, #ARGV do
    removed = removed + redis.call('LREM', KEYS[1], 1, ARGV[i])
end
return removed
";

/// Puts unsettled work back: processing entries (KEYS[1]) return to the
/// consuming end of the pending list (KEYS[2]) oldest-first, and retry
/// processing entries (KEYS[3]) return to the retry set (KEYS[4]) due now.
const RECOVER_LUA: &str = r"
local pending = redis.call('LRANGE', KEYS[1], 0, -1)
for i = 1, #pending do
    redis.call('RPUSH', KEYS[2], pending[i])
end
redis.call('DEL', KEYS[1])
local retries = redis.call('LRANGE', KEYS[3], 0, -1)
for i = 1, #retries do
    redis.call('ZADD', KEYS[4], ARGV[1], retries[i])
end
redis.call('DEL', KEYS[3])
return {#pending, #retries}
";

/// Create Redis client.
pub async fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    use fred::prelude::*;

    let config = Config::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await?;

    info!("Connected to Redis");
    Ok(client)
}

/// Producer handle that pushes messages onto the pending list.
#[derive(Clone)]
pub struct RedisQueue {
    client: Client,
    pending_key: String,
}

impl RedisQueue {
    pub fn new(client: Client, settings: &QueueSettings) -> Self {
        Self {
            client,
            pending_key: settings.pending_key(),
        }
    }
}

impl MessageQueue for RedisQueue {
    fn send<'a>(&'a self, message: &'a BufferMessage) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            let payload = serde_json::to_string(&QueuedMessage::new(message.clone(), Utc::now()))?;
            self.client
                .lpush::<(), _, _>(self.pending_key.as_str(), payload)
                .await?;
            Ok(())
        })
    }
}

/// Entries put back by [`recover_in_flight`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveredWork {
    pub messages: i64,
    pub retries: i64,
}

/// Return work left in this worker's processing lists by a previous run.
pub async fn recover_in_flight(
    redis: &Client,
    settings: &QueueSettings,
    now: f64,
) -> Result<RecoveredWork, QueueError> {
    let counts: Vec<i64> = redis
        .eval(
            RECOVER_LUA,
            vec![
                settings.processing_key(),
                settings.pending_key(),
                settings.retry_processing_key(),
                settings.retry_key(),
            ],
            vec![now.to_string()],
        )
        .await?;

    Ok(RecoveredWork {
        messages: counts.first().copied().unwrap_or(0),
        retries: counts.get(1).copied().unwrap_or(0),
    })
}

/// Block up to `timeout_secs` for a pending entry, moving it into this
/// worker's processing list. Returns the raw entry.
pub async fn pop_pending(
    redis: &Client,
    settings: &QueueSettings,
    timeout_secs: f64,
) -> Result<Option<String>, QueueError> {
    let entry: Option<String> = redis
        .brpoplpush(settings.pending_key(), settings.processing_key(), timeout_secs)
        .await?;
    Ok(entry)
}

/// Drop settled entries from this worker's processing list.
pub async fn release_pending(
    redis: &Client,
    settings: &QueueSettings,
    entries: &[String],
) -> Result<(), QueueError> {
    release(redis, settings.processing_key(), entries).await
}

/// Drop a settled retry batch from this worker's retry processing list.
pub async fn release_retry(
    redis: &Client,
    settings: &QueueSettings,
    entry: &str,
) -> Result<(), QueueError> {
    release(redis, settings.retry_processing_key(), &[entry.to_string()]).await
}

async fn release(redis: &Client, key: String, entries: &[String]) -> Result<(), QueueError> {
    if entries.is_empty() {
        return Ok(());
    }
    redis
        .eval::<i64, _, _, _>(RELEASE_LUA, vec![key], entries.to_vec())
        .await?;
    Ok(())
}

/// Schedule a batch for retry at a future Unix timestamp.
pub async fn schedule_retry(
    redis: &Client,
    settings: &QueueSettings,
    batch: &QueuedBatch,
    deliver_at: f64,
) -> Result<(), QueueError> {
    let payload = serde_json::to_string(batch)?;

    redis
        .zadd::<(), _, _>(
            settings.retry_key(),
            None,
            None,
            false,
            false,
            (deliver_at, payload),
        )
        .await?;
    Ok(())
}

/// Move every retry due at or before `now` into this worker's retry
/// processing list and return the raw entries.
pub async fn take_due_retries(
    redis: &Client,
    settings: &QueueSettings,
    now: f64,
) -> Result<Vec<String>, QueueError> {
    let items: Vec<String> = redis
        .eval(
            TAKE_DUE_RETRIES_LUA,
            vec![settings.retry_key(), settings.retry_processing_key()],
            vec![now.to_string(), RETRY_PROMOTE_LIMIT.to_string()],
        )
        .await?;
    Ok(items)
}

/// Append a batch to the dead-letter list.
pub async fn dead_letter(
    redis: &Client,
    settings: &QueueSettings,
    entry: &DeadLetterBatch,
) -> Result<(), QueueError> {
    let payload = serde_json::to_string(entry)?;
    redis
        .lpush::<(), _, _>(settings.dead_letter_key(), payload)
        .await?;
    Ok(())
}
