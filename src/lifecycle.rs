//! Device lifecycle watcher.
//!
//! Polls the host device bus at a fixed interval, diffs the set of present
//! serials against the previous tick and reports connects and disconnects
//! to a [`DeviceEvents`] handler.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::device::{DeviceBus, DiscoveredDevice};
use crate::error::{Result, SdError};

/// Receives the connect and disconnect decisions of the watcher.
#[async_trait]
pub trait DeviceEvents: Send + Sync {
    /// A device appeared. Unclassifiable devices must be rejected with an
    /// error.
    async fn on_connect(&self, instance_id: &str, device: &DiscoveredDevice) -> Result<()>;

    /// A previously seen device is gone.
    async fn on_disconnect(&self, instance_id: &str, serial: &str) -> Result<()>;
}

/// What one tick changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub connected: Vec<String>,
    pub disconnected: Vec<String>,
    /// Connects refused by the handler.
    pub rejected: Vec<String>,
    /// Connects that failed and are tried again next tick.
    pub pending: Vec<String>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
            && self.disconnected.is_empty()
            && self.rejected.is_empty()
            && self.pending.is_empty()
    }
}

pub struct LifecycleWatcher {
    instance_id: String,
    bus: Arc<dyn DeviceBus>,
    handler: Arc<dyn DeviceEvents>,
    interval: Duration,
    connected: BTreeSet<String>,
}

impl LifecycleWatcher {
    pub fn new(
        instance_id: impl Into<String>,
        bus: Arc<dyn DeviceBus>,
        handler: Arc<dyn DeviceEvents>,
        interval: Duration,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            bus,
            handler,
            interval,
            connected: BTreeSet::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Serials currently considered present.
    pub fn connected(&self) -> impl Iterator<Item = &str> {
        self.connected.iter().map(String::as_str)
    }

    async fn enumerate(&self) -> Result<BTreeMap<String, DiscoveredDevice>> {
        let bus = Arc::clone(&self.bus);
        let devices = tokio::task::spawn_blocking(move || bus.enumerate())
            .await
            .map_err(|e| SdError::DeviceCommunication(format!("enumeration task failed: {e}")))??;

        Ok(devices
            .into_iter()
            .map(|device| (device.serial.clone(), device))
            .collect())
    }

    /// Enumerate once and report the difference to the handler.
    ///
    /// A failed enumeration leaves the connected set untouched. A connect
    /// that fails with a transient error, or because its hierarchy is not
    /// configured yet, is retried on the next tick; rejected devices are not
    /// retried until they are replugged.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let present = self.enumerate().await?;
        let mut report = TickReport::default();
        let mut next = BTreeSet::new();

        for (serial, device) in &present {
            if self.connected.contains(serial) {
                next.insert(serial.clone());
                continue;
            }

            match self.handler.on_connect(&self.instance_id, device).await {
                Ok(()) => {
                    info!(instance_id = %self.instance_id, %serial, model = %device.model(), "Device connected");
                    report.connected.push(serial.clone());
                    next.insert(serial.clone());
                }
                Err(e) if e.is_retryable() => {
                    warn!(%serial, error = %e, "Connect failed, will retry");
                    report.pending.push(serial.clone());
                }
                Err(e) => {
                    warn!(
                        %serial,
                        product_id = format_args!("{:#06x}", device.product_id),
                        error = %e,
                        "Device rejected"
                    );
                    report.rejected.push(serial.clone());
                    next.insert(serial.clone());
                }
            }
        }

        for serial in self.connected.difference(&next) {
            if let Err(e) = self.handler.on_disconnect(&self.instance_id, serial).await {
                warn!(%serial, error = %e, "Disconnect handling failed");
            }
            info!(instance_id = %self.instance_id, %serial, "Device disconnected");
            report.disconnected.push(serial.clone());
        }

        self.connected = next;
        Ok(report)
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(instance_id = %self.instance_id, interval_ms = self.interval.as_millis(), "Watching for devices");

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(report) if !report.is_empty() => debug!(?report, "Device set changed"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Device enumeration failed"),
            }
        }
        debug!("Lifecycle watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDeviceBus;
    use crate::device::{DeviceModel, ELGATO_VENDOR_ID, PRODUCT_ID_XL};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        transient_failures: Mutex<usize>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceEvents for Recorder {
        async fn on_connect(&self, instance_id: &str, device: &DiscoveredDevice) -> Result<()> {
            {
                let mut failures = self.transient_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(SdError::StoreUnavailable("down".to_string()));
                }
            }
            if !device.model().is_supported() {
                return Err(SdError::UnknownModel {
                    vendor_id: device.vendor_id,
                    product_id: device.product_id,
                });
            }
            self.events.lock().unwrap().push(format!(
                "connect {instance_id} {} {:#06x}",
                device.serial, device.product_id
            ));
            Ok(())
        }

        async fn on_disconnect(&self, instance_id: &str, serial: &str) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("disconnect {instance_id} {serial}"));
            Ok(())
        }
    }

    fn watcher(bus: &Arc<MockDeviceBus>, recorder: &Arc<Recorder>) -> LifecycleWatcher {
        LifecycleWatcher::new(
            "inst1",
            bus.clone(),
            recorder.clone(),
            Duration::from_millis(10),
        )
    }

    fn xl(serial: &str) -> DiscoveredDevice {
        DiscoveredDevice::new(serial, ELGATO_VENDOR_ID, PRODUCT_ID_XL)
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let bus = Arc::new(MockDeviceBus::default());
        let recorder = Arc::new(Recorder::default());
        let mut watcher = watcher(&bus, &recorder);

        bus.plug(xl("ABC123"));
        let report = watcher.tick().await.unwrap();
        assert_eq!(report.connected, vec!["ABC123"]);
        assert_eq!(recorder.events(), vec!["connect inst1 ABC123 0x006c"]);

        // Steady state: nothing new
        assert!(watcher.tick().await.unwrap().is_empty());

        bus.unplug("ABC123");
        let report = watcher.tick().await.unwrap();
        assert_eq!(report.disconnected, vec!["ABC123"]);
        assert_eq!(recorder.events().last().unwrap(), "disconnect inst1 ABC123");
        assert_eq!(watcher.connected().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_model_rejected_once() {
        let bus = Arc::new(MockDeviceBus::default());
        let recorder = Arc::new(Recorder::default());
        let mut watcher = watcher(&bus, &recorder);

        bus.plug(DiscoveredDevice::new("MINI1", ELGATO_VENDOR_ID, 0x0063));
        assert_eq!(DeviceModel::classify(ELGATO_VENDOR_ID, 0x0063), DeviceModel::Unknown);

        let report = watcher.tick().await.unwrap();
        assert_eq!(report.rejected, vec!["MINI1"]);
        assert!(recorder.events().is_empty());
        assert!(watcher.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_connect_failure_retries() {
        let bus = Arc::new(MockDeviceBus::default());
        let recorder = Arc::new(Recorder::default());
        *recorder.transient_failures.lock().unwrap() = 1;
        let mut watcher = watcher(&bus, &recorder);

        bus.plug(xl("ABC123"));
        let report = watcher.tick().await.unwrap();
        assert!(report.connected.is_empty());
        assert_eq!(report.pending, vec!["ABC123"]);
        assert_eq!(watcher.tick().await.unwrap().connected, vec!["ABC123"]);
    }

    #[tokio::test]
    async fn test_enumeration_failure_keeps_set() {
        let bus = Arc::new(MockDeviceBus::default());
        let recorder = Arc::new(Recorder::default());
        let mut watcher = watcher(&bus, &recorder);

        bus.plug(xl("ABC123"));
        watcher.tick().await.unwrap();

        bus.inject_enumerate_error(SdError::DeviceCommunication("hid unavailable".to_string()));
        assert!(watcher.tick().await.is_err());
        assert_eq!(watcher.connected().collect::<Vec<_>>(), vec!["ABC123"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let bus = Arc::new(MockDeviceBus::default());
        let recorder = Arc::new(Recorder::default());
        bus.plug(xl("ABC123"));

        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(watcher(&bus, &recorder).run(shutdown));

        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.events().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
