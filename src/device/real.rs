//! Real Stream Deck hardware over `hidapi`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hidapi::{HidApi, HidDevice};
use tracing::{debug, trace};

use super::info::{DiscoveredDevice, ELGATO_VENDOR_ID};
use super::{DeviceBus, ReportChannel};
use crate::error::{Result, SdError};

/// Longest single read while the handle lock is held. Writers wait at most
/// this long for the reader to let go.
const READ_SLICE_MS: i32 = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait up to `timeout_ms` for a report using reads of at most
/// [`READ_SLICE_MS`] each, stopping at the first non-empty one.
fn read_in_slices<F>(timeout_ms: i32, mut read_once: F) -> Result<usize>
where
    F: FnMut(i32) -> Result<usize>,
{
    let mut remaining = timeout_ms.max(0);
    loop {
        let slice = remaining.min(READ_SLICE_MS);
        let len = read_once(slice)?;
        remaining -= slice;
        if len > 0 || remaining <= 0 {
            return Ok(len);
        }
        std::thread::yield_now();
    }
}

/// Device bus backed by the host's HID stack.
///
/// One `HidApi` context is shared by enumeration and opens.
pub struct HidDeviceBus {
    api: Mutex<HidApi>,
}

impl HidDeviceBus {
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| SdError::DeviceCommunication(e.to_string()))?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }

    fn refreshed(&self) -> Result<MutexGuard<'_, HidApi>> {
        let mut api = lock(&self.api);
        api.refresh_devices()
            .map_err(|e| SdError::DeviceCommunication(e.to_string()))?;
        Ok(api)
    }
}

impl DeviceBus for HidDeviceBus {
    fn enumerate(&self) -> Result<Vec<DiscoveredDevice>> {
        let api = self.refreshed()?;

        let mut devices: Vec<DiscoveredDevice> = api
            .device_list()
            .filter(|info| info.vendor_id() == ELGATO_VENDOR_ID)
            .filter_map(|info| {
                let serial = info.serial_number().filter(|s| !s.is_empty())?;
                Some(DiscoveredDevice::new(
                    serial,
                    info.vendor_id(),
                    info.product_id(),
                ))
            })
            .collect();

        // A device exposes one entry per HID interface.
        devices.sort_by(|a, b| a.serial.cmp(&b.serial));
        devices.dedup_by(|a, b| a.serial == b.serial);

        trace!(count = devices.len(), "Enumerated Elgato devices");
        Ok(devices)
    }

    fn open(&self, serial: &str) -> Result<Arc<dyn ReportChannel>> {
        let api = self.refreshed()?;

        let info = api
            .device_list()
            .find(|info| info.vendor_id() == ELGATO_VENDOR_ID && info.serial_number() == Some(serial))
            .ok_or_else(|| SdError::DeviceOpenFailed {
                serial: serial.to_string(),
                reason: "device not present".to_string(),
            })?;

        let device = api
            .open_serial(info.vendor_id(), info.product_id(), serial)
            .map_err(|e| SdError::DeviceOpenFailed {
                serial: serial.to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            serial,
            product_id = format!("{:#06x}", info.product_id()),
            "Opened HID device"
        );

        Ok(Arc::new(HidChannel {
            serial: serial.to_string(),
            device: Mutex::new(device),
        }))
    }
}

/// Report channel over an open `HidDevice`.
pub struct HidChannel {
    serial: String,
    device: Mutex<HidDevice>,
}

impl ReportChannel for HidChannel {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        read_in_slices(timeout_ms, |slice| {
            lock(&self.device)
                .read_timeout(buf, slice)
                .map_err(|e| SdError::DeviceCommunication(format!("{}: {e}", self.serial)))
        })
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        let written = lock(&self.device)
            .write(frame)
            .map_err(|e| SdError::DeviceCommunication(format!("{}: {e}", self.serial)))?;
        if written < frame.len() {
            return Err(SdError::DeviceCommunication(format!(
                "{}: short write ({written} of {} bytes)",
                self.serial,
                frame.len()
            )));
        }
        Ok(())
    }
}
