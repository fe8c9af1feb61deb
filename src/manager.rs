//! Per-instance device manager.
//!
//! Implements [`DeviceEvents`] for the lifecycle watcher: a connect opens the
//! panel, records it in the store and starts its [`SyncEngine`]; a disconnect
//! stops the engine and flips the stored status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::actions::ActionPublisher;
use crate::device::{ConnectionOptions, DeviceBus, DiscoveredDevice, ReportChannel, open_with_retry};
use crate::engine::{DeviceContext, EngineConfig, EngineHandle, SyncEngine};
use crate::error::{Result, SdError};
use crate::lifecycle::DeviceEvents;
use crate::model::{DeviceKey, Hierarchy};

pub struct DeviceManager {
    bus: Arc<dyn DeviceBus>,
    hierarchy: Hierarchy,
    publisher: ActionPublisher,
    config: EngineConfig,
    connection: ConnectionOptions,
    engines: Mutex<HashMap<String, EngineHandle>>,
}

impl DeviceManager {
    pub fn new(
        bus: Arc<dyn DeviceBus>,
        hierarchy: Hierarchy,
        publisher: ActionPublisher,
        config: EngineConfig,
    ) -> Self {
        Self {
            bus,
            hierarchy,
            publisher,
            config,
            connection: ConnectionOptions::default(),
            engines: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_connection_options(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    /// Serials with a running engine, sorted.
    pub async fn running(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.engines.lock().await.keys().cloned().collect();
        serials.sort();
        serials
    }

    async fn open(&self, serial: &str) -> Result<Arc<dyn ReportChannel>> {
        let bus = Arc::clone(&self.bus);
        let serial = serial.to_string();
        let opts = self.connection.clone();
        tokio::task::spawn_blocking(move || open_with_retry(bus.as_ref(), &serial, &opts))
            .await
            .map_err(|e| SdError::DeviceCommunication(format!("open task failed: {e}")))?
    }

    /// Stop every running engine, marking each device disconnected.
    pub async fn stop_all(&self) {
        let engines: Vec<EngineHandle> = self.engines.lock().await.drain().map(|(_, e)| e).collect();
        for engine in engines {
            let dk = engine.scope().device.clone();
            engine.stop().await;
            if let Err(e) = self.hierarchy.mark_disconnected(&dk).await {
                warn!(serial = %dk.device_id, error = %e, "Failed to mark device disconnected");
            }
        }
    }
}

#[async_trait]
impl DeviceEvents for DeviceManager {
    async fn on_connect(&self, instance_id: &str, device: &DiscoveredDevice) -> Result<()> {
        let model = device.model();
        if !model.is_supported() {
            return Err(SdError::UnknownModel {
                vendor_id: device.vendor_id,
                product_id: device.product_id,
            });
        }

        let channel = self.open(&device.serial).await.map_err(|e| match e {
            SdError::DeviceOpenFailed { .. } => e,
            other => SdError::DeviceOpenFailed {
                serial: device.serial.clone(),
                reason: other.to_string(),
            },
        })?;

        let dk = DeviceKey::new(instance_id, device.serial.as_str());
        self.hierarchy.mark_connected(&dk, model).await?;

        let ctx = DeviceContext::new(
            dk,
            model,
            channel,
            self.hierarchy.clone(),
            self.publisher.clone(),
            self.config.clone(),
        );
        let engine = match SyncEngine::start(ctx).await {
            Ok(engine) => engine,
            Err(e) => {
                let dk = DeviceKey::new(instance_id, device.serial.as_str());
                if let Err(mark) = self.hierarchy.mark_disconnected(&dk).await {
                    warn!(serial = %device.serial, error = %mark, "Failed to mark device disconnected");
                }
                return Err(e);
            }
        };

        info!(
            instance_id,
            serial = %device.serial,
            model = model.display_name(),
            "Device ready"
        );
        if let Some(previous) = self.engines.lock().await.insert(device.serial.clone(), engine) {
            previous.stop().await;
        }
        Ok(())
    }

    async fn on_disconnect(&self, instance_id: &str, serial: &str) -> Result<()> {
        let engine = self.engines.lock().await.remove(serial);
        if let Some(engine) = engine {
            engine.stop().await;
        }

        let dk = DeviceKey::new(instance_id, serial);
        match self.hierarchy.mark_disconnected(&dk).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(serial, "Disconnected device was never recorded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
