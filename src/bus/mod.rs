//! Outbound message bus.
//!
//! The core only publishes: action dispatches keyed by action reference,
//! plus dial and touch events of the Stream Deck +. Subscribers live
//! outside this crate.

mod memory;
#[cfg(feature = "nats")]
mod nats;

pub use memory::{MemoryBus, Message};
#[cfg(feature = "nats")]
pub use nats::NatsBus;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish `payload` on `topic`. Delivery is fire-and-forget.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}
