//! Batch Worker
//!
//! Background worker that drains the pending list into batches, hands each
//! batch to the [`BatchRelay`], and retries or dead-letters failed batches.
//!
//! A batch is flushed once it holds `max_batch_size` messages or its oldest
//! message was enqueued `max_batch_timeout_secs` ago. A failed batch is
//! retried as a whole, with the delay doubling per attempt, until
//! `max_retries` is reached. Chats the relay could not build a payload for
//! are dead-lettered on their own.
//!
//! Every popped entry stays in the worker's processing list until the outcome
//! of its batch is recorded in Redis. Anything still there when the worker
//! starts is put back first.

use std::time::{Duration, Instant};

use chrono::Utc;
use fred::clients::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::redis::{
    dead_letter, pop_pending, recover_in_flight, release_pending, release_retry, schedule_retry,
    take_due_retries,
};
use super::{DeadLetterBatch, MessageBatcher, QueuedBatch, QueuedMessage};
use crate::config::QueueSettings;
use crate::relay::{BatchRelay, RelayError};
use crate::types::BufferMessage;

/// Longest BRPOPLPUSH wait, so due retries and shutdown are noticed quickly.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Shortest BRPOPLPUSH wait (a zero timeout would block forever).
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Characters of an undecodable queue entry kept in logs.
const PAYLOAD_PREVIEW_CHARS: usize = 500;

/// What to do with a batch whose relay attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Retry { delay: Duration },
    DeadLetter,
}

/// Decide between retry and dead-letter for a batch that failed on `attempt`.
pub fn failure_action(settings: &QueueSettings, attempt: u32, retryable: bool) -> FailureAction {
    if retryable && attempt < settings.max_retries {
        FailureAction::Retry {
            delay: settings.retry_delay(attempt),
        }
    } else {
        FailureAction::DeadLetter
    }
}

/// A buffered message together with its raw processing-list entry.
#[derive(Debug)]
struct InFlight {
    entry: String,
    message: BufferMessage,
}

/// Spawn the background batch worker.
///
/// `redis` should be a dedicated client: BRPOPLPUSH blocks its connection.
pub fn spawn_batch_worker(
    redis: Client,
    settings: QueueSettings,
    relay: BatchRelay,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_batch_worker(redis, settings, relay, shutdown))
}

/// Worker loop. Returns after `shutdown` is cancelled and the buffer is flushed.
pub async fn run_batch_worker(
    redis: Client,
    settings: QueueSettings,
    relay: BatchRelay,
    shutdown: CancellationToken,
) {
    info!(
        worker_id = %settings.worker_id,
        max_batch_size = settings.max_batch_size,
        max_batch_timeout_secs = settings.max_batch_timeout_secs,
        "Batch worker started"
    );

    match recover_in_flight(&redis, &settings, unix_now()).await {
        Ok(recovered) if recovered.messages > 0 || recovered.retries > 0 => {
            warn!(
                messages = recovered.messages,
                retries = recovered.retries,
                "Requeued work left unsettled by a previous run"
            );
        }
        Ok(_) => {}
        Err(e) => error!("Failed to recover in-flight work: {}", e),
    }

    let mut batcher: MessageBatcher<InFlight> = MessageBatcher::from_settings(&settings);
    let mut consecutive_errors: u32 = 0;

    while !shutdown.is_cancelled() {
        process_due_retries(&redis, &settings, &relay).await;

        let wait = batcher
            .time_until_due(Instant::now())
            .map_or(MAX_POLL_INTERVAL, |left| left.min(MAX_POLL_INTERVAL))
            .max(MIN_POLL_INTERVAL);

        match pop_pending(&redis, &settings, wait.as_secs_f64()).await {
            Ok(Some(entry)) => {
                consecutive_errors = 0;
                accept_entry(&redis, &settings, &mut batcher, entry).await;
            }
            Ok(None) => {
                consecutive_errors = 0;
            }
            Err(e) => {
                consecutive_errors += 1;
                let backoff_secs = 1u64 << consecutive_errors.min(6); // 2, 4, 8, ... 64
                if backoff_secs > 30 {
                    error!(
                        consecutive_errors,
                        backoff_secs,
                        "Persistent Redis failure in batch worker, backing off: {}",
                        e
                    );
                } else {
                    error!("Failed to pop from pending queue: {}", e);
                }
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }
            }
        }

        if batcher.should_flush(Instant::now()) {
            flush(&redis, &settings, &relay, &mut batcher).await;
        }
    }

    if !batcher.is_empty() {
        info!(
            buffered = batcher.len(),
            "Flushing buffered messages before shutdown"
        );
        flush(&redis, &settings, &relay, &mut batcher).await;
    }

    info!("Batch worker stopped");
}

fn unix_now() -> f64 {
    Utc::now().timestamp() as f64
}

/// Map a wall-clock enqueue time onto the monotonic clock.
///
/// Entries without an enqueue time, or stamped in the future by a skewed
/// clock, count as arriving now.
fn arrival_instant(enqueued_at_ms: Option<i64>, now_ms: i64, now: Instant) -> Instant {
    enqueued_at_ms
        .and_then(|at| u64::try_from(now_ms.saturating_sub(at)).ok())
        .and_then(|waited| now.checked_sub(Duration::from_millis(waited)))
        .unwrap_or(now)
}

async fn accept_entry(
    redis: &Client,
    settings: &QueueSettings,
    batcher: &mut MessageBatcher<InFlight>,
    entry: String,
) {
    let Some(queued) = decode_message(&entry) else {
        if let Err(e) = release_pending(redis, settings, &[entry]).await {
            error!("Failed to drop undecodable entry from processing list: {}", e);
        }
        return;
    };

    let arrived_at = arrival_instant(
        queued.enqueued_at,
        Utc::now().timestamp_millis(),
        Instant::now(),
    );
    batcher.push(
        InFlight {
            entry,
            message: queued.message,
        },
        arrived_at,
    );
}

fn decode_message(payload: &str) -> Option<QueuedMessage> {
    match serde_json::from_str(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            let truncated: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
            error!(
                error = %e,
                payload_preview = %truncated,
                "Failed to deserialize queued message, dropping it"
            );
            None
        }
    }
}

/// Relay the buffered batch and release its entries once its outcome is stored.
async fn flush(
    redis: &Client,
    settings: &QueueSettings,
    relay: &BatchRelay,
    batcher: &mut MessageBatcher<InFlight>,
) {
    let (entries, messages): (Vec<String>, Vec<BufferMessage>) = batcher
        .drain()
        .into_iter()
        .map(|in_flight| (in_flight.entry, in_flight.message))
        .unzip();
    let batch = QueuedBatch::new(messages);
    let batch_id = batch.batch_id;

    if !process_batch(redis, settings, relay, batch).await {
        warn!(
            batch_id = %batch_id,
            entries = entries.len(),
            "Batch outcome not recorded, entries stay in the processing list"
        );
        return;
    }

    if let Err(e) = release_pending(redis, settings, &entries).await {
        error!(
            batch_id = %batch_id,
            "Failed to release settled entries, they will be redelivered on restart: {}", e
        );
    }
}

/// Relay retries whose due time has passed.
async fn process_due_retries(redis: &Client, settings: &QueueSettings, relay: &BatchRelay) {
    let items = match take_due_retries(redis, settings, unix_now()).await {
        Ok(items) => items,
        Err(e) => {
            error!("Failed to take due retries: {}", e);
            return;
        }
    };

    for payload in items {
        let settled = match serde_json::from_str::<QueuedBatch>(&payload) {
            Ok(batch) => {
                debug!(
                    batch_id = %batch.batch_id,
                    attempt = batch.attempt,
                    "Retrying batch"
                );
                process_batch(redis, settings, relay, batch).await
            }
            Err(e) => {
                let truncated: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
                error!(
                    error = %e,
                    payload_preview = %truncated,
                    "Failed to deserialize retry batch, dropping it"
                );
                true
            }
        };

        if settled {
            if let Err(e) = release_retry(redis, settings, &payload).await {
                error!("Failed to release settled retry batch: {}", e);
            }
        }
    }
}

/// Relay one batch and route failures to retry or dead-letter.
///
/// Returns whether the outcome is recorded: delivered, rescheduled, or
/// dead-lettered.
async fn process_batch(
    redis: &Client,
    settings: &QueueSettings,
    relay: &BatchRelay,
    batch: QueuedBatch,
) -> bool {
    match relay.handle_batch(&batch.messages).await {
        Ok(report) => {
            info!(
                batch_id = %batch.batch_id,
                attempt = batch.attempt,
                chats = report.chats,
                messages = report.messages,
                rejected_chats = report.rejected.len(),
                "Batch acknowledged"
            );

            let mut settled = true;
            for rejected in report.rejected {
                let reason = format!("Chat {}: {}", rejected.chat_id, rejected.reason);
                let rejected_batch = QueuedBatch {
                    messages: rejected.messages,
                    ..batch.clone()
                };
                settled &= send_to_dead_letter(redis, settings, rejected_batch, reason).await;
            }
            settled
        }
        Err(e) => handle_failure(redis, settings, batch, &e).await,
    }
}

async fn handle_failure(
    redis: &Client,
    settings: &QueueSettings,
    mut batch: QueuedBatch,
    err: &RelayError,
) -> bool {
    let reason = err.to_string();

    match failure_action(settings, batch.attempt, err.is_retryable()) {
        FailureAction::Retry { delay } => {
            batch.attempt += 1;
            let deliver_at = unix_now() + delay.as_secs_f64();

            warn!(
                batch_id = %batch.batch_id,
                attempt = batch.attempt,
                delay_secs = delay.as_secs(),
                delivered_chats = err.delivered().len(),
                error = %reason,
                "Batch failed, scheduling retry"
            );

            match schedule_retry(redis, settings, &batch, deliver_at).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        batch_id = %batch.batch_id,
                        attempt = batch.attempt,
                        "Failed to schedule retry, falling back to dead-letter: {}", e
                    );
                    send_to_dead_letter(
                        redis,
                        settings,
                        batch,
                        format!("{reason} (retry scheduling failed: {e})"),
                    )
                    .await
                }
            }
        }
        FailureAction::DeadLetter => {
            warn!(
                batch_id = %batch.batch_id,
                attempt = batch.attempt,
                retryable = err.is_retryable(),
                error = %reason,
                "Batch will not be retried, dead-lettering"
            );
            send_to_dead_letter(redis, settings, batch, reason).await
        }
    }
}

async fn send_to_dead_letter(
    redis: &Client,
    settings: &QueueSettings,
    batch: QueuedBatch,
    reason: String,
) -> bool {
    let batch_id = batch.batch_id;
    let message_count = batch.messages.len();
    let entry = DeadLetterBatch {
        batch,
        error: reason,
        failed_at: Utc::now(),
    };

    match dead_letter(redis, settings, &entry).await {
        Ok(()) => true,
        Err(e) => {
            error!(
                batch_id = %batch_id,
                message_count,
                "Failed to insert dead letter: {}", e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_failures_are_retried_until_limit() {
        let settings = QueueSettings::default();
        assert_eq!(
            failure_action(&settings, 0, true),
            FailureAction::Retry {
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(
            failure_action(&settings, 2, true),
            FailureAction::Retry {
                delay: Duration::from_secs(20)
            }
        );
        assert_eq!(failure_action(&settings, 3, true), FailureAction::DeadLetter);
    }

    #[test]
    fn non_retryable_failures_are_dead_lettered_immediately() {
        let settings = QueueSettings::default();
        assert_eq!(failure_action(&settings, 0, false), FailureAction::DeadLetter);
    }

    #[test]
    fn zero_retries_dead_letters_first_failure() {
        let settings = QueueSettings {
            max_retries: 0,
            ..QueueSettings::default()
        };
        assert_eq!(failure_action(&settings, 0, true), FailureAction::DeadLetter);
    }

    #[test]
    fn undecodable_entries_are_dropped() {
        assert!(decode_message("not json").is_none());
        assert!(decode_message(r#"{"chatId":"c1"}"#).is_none());

        let valid = r#"{"chatId":"c1","messageId":"m1","content":"hi","messageType":"text","timestamp":1}"#;
        let decoded = decode_message(valid).unwrap();
        assert_eq!(decoded.message.message_id, "m1");
        assert_eq!(decoded.enqueued_at, None);

        let stamped = r#"{"chatId":"c1","messageId":"m1","content":"hi","messageType":"text","timestamp":1,"enqueuedAt":42}"#;
        assert_eq!(decode_message(stamped).unwrap().enqueued_at, Some(42));
    }

    #[test]
    fn arrival_reflects_time_spent_in_the_queue() {
        let now = Instant::now() + Duration::from_secs(3600);
        let now_ms = 1_700_000_060_000;

        assert_eq!(
            arrival_instant(Some(1_700_000_000_000), now_ms, now),
            now - Duration::from_secs(60)
        );
        assert_eq!(arrival_instant(None, now_ms, now), now);
        // Enqueued "in the future" by a skewed clock
        assert_eq!(arrival_instant(Some(now_ms + 5_000), now_ms, now), now);
    }
}
