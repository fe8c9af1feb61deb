//! Shared helpers for the integration tests.
//!
//! - `Rig`: one in-memory store, bus and device bus wired the way the daemon
//!   wires the real ones
//! - `wait_until`: poll an async condition with a deadline
//! - fixtures for images and config directories
#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tracing_subscriber::EnvFilter;

use sds::actions::ActionPublisher;
use sds::bus::MemoryBus;
use sds::device::mock::{MockChannel, MockDeviceBus};
use sds::device::{DeviceModel, DiscoveredDevice, ELGATO_VENDOR_ID};
use sds::engine::{DeviceContext, EngineConfig};
use sds::manager::DeviceManager;
use sds::model::{DeviceKey, Hierarchy};
use sds::store::MemoryStore;

pub const INSTANCE: &str = "inst1";

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` every 10ms until it holds; panics after `timeout`.
pub async fn wait_until<F, Fut>(timeout: Duration, what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(timeout, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// Engine settings for tests: no blanking, no rendering.
pub fn quiet_config() -> EngineConfig {
    EngineConfig {
        blank_on_connect: false,
        render_buffers: false,
        read_timeout_ms: 10,
        ..EngineConfig::default()
    }
}

pub fn write_png(dir: &Path, name: &str, color: [u8; 3]) {
    RgbImage::from_pixel(32, 32, Rgb(color))
        .save(dir.join(name))
        .unwrap_or_else(|e| panic!("failed to write {name}: {e}"));
}

/// In-memory stand-ins for everything outside the process.
pub struct Rig {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<MemoryBus>,
    pub devices: Arc<MockDeviceBus>,
    pub hierarchy: Hierarchy,
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}

impl Rig {
    pub fn new() -> Self {
        init_test_logging();
        let store = Arc::new(MemoryStore::new());
        Self {
            hierarchy: Hierarchy::new(store.clone()),
            store,
            bus: Arc::new(MemoryBus::new()),
            devices: Arc::new(MockDeviceBus::new()),
        }
    }

    pub fn publisher(&self) -> ActionPublisher {
        ActionPublisher::new(self.bus.clone())
    }

    /// Context for a device driven directly, without the lifecycle layer.
    pub fn context(&self, serial: &str, model: DeviceModel, config: EngineConfig) -> (DeviceContext, Arc<MockChannel>) {
        let channel = Arc::new(MockChannel::new(serial));
        let ctx = DeviceContext::new(
            DeviceKey::new(INSTANCE, serial),
            model,
            channel.clone(),
            self.hierarchy.clone(),
            self.publisher(),
            config,
        );
        (ctx, channel)
    }

    pub fn manager(&self, config: EngineConfig) -> Arc<DeviceManager> {
        Arc::new(DeviceManager::new(
            self.devices.clone(),
            self.hierarchy.clone(),
            self.publisher(),
            config,
        ))
    }

    pub fn plug(&self, serial: &str, product_id: u16) -> Arc<MockChannel> {
        self.devices
            .plug(DiscoveredDevice::new(serial, ELGATO_VENDOR_ID, product_id))
    }
}
