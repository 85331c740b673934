//! In-Memory Queue
//!
//! Records sent messages in process memory. Used by tests and local tooling
//! that should not depend on Redis.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use super::{MessageQueue, QueueError};
use crate::types::BufferMessage;

/// Queue backed by a `Vec`, with a switch to simulate an outage.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<BufferMessage>>,
    unavailable: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` fail with [`QueueError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Messages sent so far, oldest first.
    pub fn messages(&self) -> Vec<BufferMessage> {
        self.messages
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Remove and return everything sent so far.
    pub fn drain(&self) -> Vec<BufferMessage> {
        self.messages
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageQueue for InMemoryQueue {
    fn send<'a>(&'a self, message: &'a BufferMessage) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(QueueError::Unavailable);
            }
            self.messages
                .lock()
                .map_err(|_| QueueError::Unavailable)?
                .push(message.clone());
            Ok(())
        })
    }
}
