//! Client for the shared hierarchical key-value store.
//!
//! Every component talks to the store through the [`Store`] trait so the
//! NATS-backed client and the in-memory store are interchangeable. Values are
//! handed out by copy; nothing holds references into the store.
//!
//! A [`Watch`] first replays every key currently matching its pattern, then
//! yields a single [`WatchEvent::ReplayComplete`] marker, then streams live
//! changes until stopped or dropped.

pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;
mod pattern;

pub use memory::MemoryStore;
#[cfg(feature = "nats")]
pub use nats::NatsStore;
pub use pattern::{DELIMITER, matches, validate_key, validate_pattern};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Result;

/// Buffered events between a watch producer and its consumer.
pub const WATCH_BUFFER: usize = 256;

/// Kind of change carried by an [`Update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Put,
    Delete,
}

/// One key change, replayed or live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub key: String,
    pub value: Vec<u8>,
    pub operation: Operation,
}

impl Update {
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            operation: Operation::Put,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            operation: Operation::Delete,
        }
    }
}

/// Item yielded by a [`Watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Update(Update),
    /// Every pre-existing matching key has been replayed.
    ReplayComplete,
}

/// Hierarchical key-value store operations.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a value; `SdError::NotFound` when absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Unconditional upsert.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Atomic create-if-absent; `SdError::AlreadyExists` when the key exists.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted. Empty is a valid answer.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Subscribe to keys matching `pattern` (replay, marker, live).
    async fn watch(&self, pattern: &str) -> Result<Watch>;
}

/// Live subscription handle.
///
/// Dropping the handle stops the subscription.
#[derive(Debug)]
pub struct Watch {
    pattern: String,
    events: mpsc::Receiver<WatchEvent>,
    stop: watch::Sender<bool>,
}

impl Watch {
    /// Create a handle and the producer side that feeds it.
    pub fn channel(pattern: impl Into<String>) -> (Self, WatchFeed) {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            Self {
                pattern: pattern.into(),
                events: rx,
                stop: stop_tx,
            },
            WatchFeed {
                events: tx,
                stop: stop_rx,
            },
        )
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Stop the subscription and release its server-side resources.
    pub fn stop(&mut self) {
        self.stop.send_replace(true);
        self.events.close();
    }
}

/// Producer side of a [`Watch`], owned by the backend's forwarding task.
#[derive(Debug)]
pub struct WatchFeed {
    events: mpsc::Sender<WatchEvent>,
    stop: watch::Receiver<bool>,
}

impl WatchFeed {
    /// Deliver an event; `false` once the consumer is gone or stopped.
    pub async fn send(&mut self, event: WatchEvent) -> bool {
        tokio::select! {
            _ = self.stop.wait_for(|stopped| *stopped) => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    /// Resolves when the consumer stops or drops the watch.
    pub async fn cancelled(&mut self) {
        // Err means the handle was dropped, which is also a stop
        let _ = self.stop.wait_for(|stopped| *stopped).await;
    }
}
