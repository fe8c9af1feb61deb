//! Action event publisher.
//!
//! A pressed button is dispatched by publishing its action instance on the
//! bus, using the button's action reference as the topic. Executing the
//! action is the subscriber's job.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::error::{Result, SdError};
use crate::model::{ButtonRecord, ButtonState};

/// Payload published for a dispatched button.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInstance {
    pub uuid: String,
    pub settings: Value,
    pub state: String,
    pub states: Vec<ButtonState>,
    pub title: String,
}

impl From<&ButtonRecord> for ActionInstance {
    fn from(button: &ButtonRecord) -> Self {
        Self {
            uuid: button.uuid.trim().to_string(),
            settings: button.settings.clone(),
            state: button.state.clone(),
            states: button.states.clone(),
            title: button.title.clone(),
        }
    }
}

/// What happened to a press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Published on this topic.
    Published(String),
    /// The button has no action.
    Unassigned,
}

#[derive(Clone)]
pub struct ActionPublisher {
    bus: Arc<dyn Bus>,
}

impl ActionPublisher {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Publish the action of `button`, or skip it when unassigned.
    pub async fn dispatch(&self, button: &ButtonRecord) -> Result<Dispatch> {
        if !button.is_assigned() {
            debug!(slot = %button.id, "Button has no action, skipping");
            return Ok(Dispatch::Unassigned);
        }

        let instance = ActionInstance::from(button);
        let payload = serde_json::to_vec(&instance)
            .map_err(|e| SdError::Bus(format!("Failed to encode action instance: {e}")))?;
        self.bus.publish(&instance.uuid, payload).await?;

        info!(slot = %button.id, action = %instance.uuid, "Action dispatched");
        Ok(Dispatch::Published(instance.uuid))
    }

    /// Publish a JSON event on an arbitrary topic.
    pub async fn publish_event<T: Serialize + Sync>(&self, topic: &str, event: &T) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| SdError::Bus(format!("Failed to encode event for {topic}: {e}")))?;
        self.bus.publish(topic, payload).await
    }
}
