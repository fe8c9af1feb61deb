//! Bus backed by plain NATS subjects.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use super::Bus;
use crate::error::{Result, SdError};

pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| SdError::Bus(e.to_string()))?;
        trace!(topic, "published");
        Ok(())
    }
}
