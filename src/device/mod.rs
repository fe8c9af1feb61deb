//! Device abstraction layer for Stream Deck devices.
//!
//! This module provides a trait-based abstraction over the raw HID report
//! channel so the sync engine can run against real hardware or a mock.

mod info;
pub mod mock;
mod real;

pub use info::{
    Capabilities, ConnectionOptions, DeviceModel, DiscoveredDevice, ELGATO_VENDOR_ID,
    PRODUCT_ID_PEDAL, PRODUCT_ID_PLUS, PRODUCT_ID_XL,
};
pub use real::HidDeviceBus;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::error::Result;

/// Fixed-size report channel to one opened device.
///
/// Reads and writes may be issued from different threads; implementations
/// serialize access to the underlying handle.
pub trait ReportChannel: Send + Sync {
    /// Serial number of the device behind this channel.
    fn serial(&self) -> &str;

    /// Blocking read of one input report.
    ///
    /// Returns `Ok(0)` when `timeout_ms` elapses without data.
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;

    /// Write one complete output report.
    fn write(&self, frame: &[u8]) -> Result<()>;
}

/// Host-level discovery and open primitive.
pub trait DeviceBus: Send + Sync {
    /// Devices currently present.
    fn enumerate(&self) -> Result<Vec<DiscoveredDevice>>;

    /// Open the device with the given serial.
    fn open(&self, serial: &str) -> Result<Arc<dyn ReportChannel>>;
}

/// Write frames in order, stopping at the first failure.
pub fn write_frames(channel: &dyn ReportChannel, frames: &[Vec<u8>]) -> Result<()> {
    for frame in frames {
        channel.write(frame)?;
    }
    trace!(serial = channel.serial(), frames = frames.len(), "Wrote frames");
    Ok(())
}

/// Open a device, retrying transient failures with backoff.
///
/// Blocking; call from a blocking context.
pub fn open_with_retry(
    bus: &dyn DeviceBus,
    serial: &str,
    opts: &ConnectionOptions,
) -> Result<Arc<dyn ReportChannel>> {
    let max_retries = opts.max_retries.max(1);
    let mut delay = opts.retry_delay;
    let mut attempt = 1;

    loop {
        debug!(serial, attempt, max_retries, "Opening Stream Deck device");
        match bus.open(serial) {
            Ok(channel) => {
                info!(serial, attempt, "Device opened");
                return Ok(channel);
            }
            Err(err) if attempt < max_retries => {
                warn!(
                    serial,
                    attempt,
                    max_retries,
                    error = %err,
                    delay_ms = delay.as_millis(),
                    "Open failed, retrying"
                );
                std::thread::sleep(delay);
                let next_delay_secs =
                    (delay.as_secs_f32() * opts.backoff_factor).min(opts.max_delay.as_secs_f32());
                delay = Duration::from_secs_f32(next_delay_secs);
                attempt += 1;
            }
            Err(err) => {
                error!(serial, attempt, max_retries, error = %err, "Open failed");
                return Err(err);
            }
        }
    }
}
