//! Message Batcher
//!
//! Accumulates pending messages until a batch is full or its oldest message
//! has lingered for the configured timeout.

use std::time::{Duration, Instant};

use crate::config::QueueSettings;
use crate::types::BufferMessage;

/// In-memory batch buffer for the worker loop.
#[derive(Debug)]
pub struct MessageBatcher<T = BufferMessage> {
    /// Maximum messages per batch.
    max_batch_size: usize,
    /// Maximum time the oldest message waits before a partial batch is flushed.
    max_linger: Duration,
    buffer: Vec<T>,
    /// Earliest arrival among the buffered messages.
    oldest: Option<Instant>,
}

impl<T> MessageBatcher<T> {
    pub fn new(max_batch_size: usize, max_linger: Duration) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            max_linger,
            buffer: Vec::with_capacity(max_batch_size),
            oldest: None,
        }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::new(settings.max_batch_size, settings.max_batch_timeout())
    }

    /// Add a message that arrived at `arrived_at`.
    ///
    /// The arrival may lie in the past (a message that sat in the queue
    /// before it was popped); the linger clock follows the earliest one.
    pub fn push(&mut self, item: T, arrived_at: Instant) {
        self.oldest = Some(self.oldest.map_or(arrived_at, |oldest| oldest.min(arrived_at)));
        self.buffer.push(item);
    }

    /// Check if the batch is full.
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.max_batch_size
    }

    /// Check if the oldest message has waited long enough.
    pub fn is_due(&self, now: Instant) -> bool {
        self.oldest
            .is_some_and(|oldest| now.saturating_duration_since(oldest) >= self.max_linger)
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        self.is_full() || self.is_due(now)
    }

    /// Time left until the batch is due, or `None` when the buffer is empty.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.oldest.map(|oldest| {
            self.max_linger
                .saturating_sub(now.saturating_duration_since(oldest))
        })
    }

    /// Drain the current batch.
    pub fn drain(&mut self) -> Vec<T> {
        self.oldest = None;
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_batch_size))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> BufferMessage {
        BufferMessage {
            chat_id: "c1".into(),
            message_id: id.into(),
            content: "hi".into(),
            message_type: "text".into(),
            timestamp: 1,
            account_id: None,
            conversation_id: None,
        }
    }

    #[test]
    fn empty_batcher_is_never_due() {
        let batcher: MessageBatcher = MessageBatcher::new(50, Duration::from_secs(30));
        let now = Instant::now();
        assert!(!batcher.should_flush(now + Duration::from_secs(3600)));
        assert_eq!(batcher.time_until_due(now), None);
        assert!(batcher.is_empty());
    }

    #[test]
    fn flushes_when_full() {
        let mut batcher = MessageBatcher::new(3, Duration::from_secs(30));
        let now = Instant::now();
        batcher.push(msg("1"), now);
        batcher.push(msg("2"), now);
        assert!(!batcher.should_flush(now));
        batcher.push(msg("3"), now);
        assert!(batcher.is_full());
        assert!(batcher.should_flush(now));

        let drained = batcher.drain();
        assert_eq!(drained.len(), 3);
        assert!(batcher.is_empty());
        assert!(!batcher.should_flush(now));
    }

    #[test]
    fn linger_is_measured_from_oldest_message() {
        let mut batcher = MessageBatcher::new(50, Duration::from_secs(30));
        let start = Instant::now();
        batcher.push(msg("1"), start);
        batcher.push(msg("2"), start + Duration::from_secs(20));

        let later = start + Duration::from_secs(25);
        assert!(!batcher.is_due(later));
        assert_eq!(batcher.time_until_due(later), Some(Duration::from_secs(5)));

        let due = start + Duration::from_secs(30);
        assert!(batcher.is_due(due));
        assert_eq!(batcher.time_until_due(due), Some(Duration::ZERO));
    }

    #[test]
    fn message_that_waited_in_the_queue_is_due_sooner() {
        let mut batcher = MessageBatcher::new(50, Duration::from_secs(30));
        let popped_at = Instant::now() + Duration::from_secs(60);
        batcher.push(msg("fresh"), popped_at);
        assert!(!batcher.is_due(popped_at));

        // Enqueued 25s before the worker got to it
        batcher.push(msg("stale"), popped_at - Duration::from_secs(25));
        assert_eq!(batcher.time_until_due(popped_at), Some(Duration::from_secs(5)));
        assert!(batcher.is_due(popped_at + Duration::from_secs(5)));
    }

    #[test]
    fn drain_resets_linger_clock() {
        let mut batcher = MessageBatcher::new(50, Duration::from_secs(30));
        let start = Instant::now();
        batcher.push(msg("1"), start);
        batcher.drain();

        let later = start + Duration::from_secs(40);
        batcher.push(msg("2"), later);
        assert!(!batcher.is_due(later + Duration::from_secs(10)));
        assert_eq!(batcher.len(), 1);
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        let mut batcher = MessageBatcher::new(0, Duration::from_secs(30));
        batcher.push(msg("1"), Instant::now());
        assert!(batcher.is_full());
    }
}
