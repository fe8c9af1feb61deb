//! Bus that records publications in memory.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::Bus;
use crate::error::{Result, SdError};

const MESSAGE_CAPACITY: usize = 256;

/// Messages kept for inspection; older ones are dropped first.
pub const DEFAULT_HISTORY: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Payload decoded as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

pub struct MemoryBus {
    messages: Mutex<VecDeque<Message>>,
    history: usize,
    live: broadcast::Sender<Message>,
    fail_publishes: Mutex<bool>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Bus that keeps at most the last `history` messages.
    pub fn with_history(history: usize) -> Self {
        let (live, _) = broadcast::channel(MESSAGE_CAPACITY);
        Self {
            messages: Mutex::new(VecDeque::new()),
            history,
            live,
            fail_publishes: Mutex::new(false),
        }
    }

    /// Retained messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).iter().cloned().collect()
    }

    pub fn messages_on(&self, topic: &str) -> Vec<Message> {
        lock(&self.messages)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.messages).is_empty()
    }

    /// Receive messages published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.live.subscribe()
    }

    /// Make publishes fail until reset.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.fail_publishes) = failing;
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if *lock(&self.fail_publishes) {
            return Err(SdError::Bus(format!("injected publish failure on {topic}")));
        }

        let message = Message {
            topic: topic.to_string(),
            payload,
        };
        {
            let mut messages = lock(&self.messages);
            if self.history > 0 {
                if messages.len() == self.history {
                    messages.pop_front();
                }
                messages.push_back(message.clone());
            }
        }
        // Nobody listening live is fine
        let _ = self.live.send(message);
        trace!(topic, "published");
        Ok(())
    }
}
