//! Mock report channel and device bus for testing without hardware.
//!
//! `MockChannel` replays queued input reports and records every frame written
//! to it; `MockDeviceBus` simulates devices being plugged and unplugged.
//!
//! # Example
//!
//! ```rust,ignore
//! use sds::device::mock::{MockChannel, Operation};
//! use sds::device::ReportChannel;
//!
//! let mock = MockChannel::builder("ABC123").with_press(5).build();
//!
//! let mut buf = [0u8; 512];
//! let n = mock.read_timeout(&mut buf, 100).unwrap();
//! assert!(n > 0);
//!
//! mock.write(&[0x02, 0x07, 4, 1]).unwrap();
//! mock.assert_contains(&Operation::Write(vec![0x02, 0x07, 4, 1]));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use super::info::DiscoveredDevice;
use super::{DeviceBus, ReportChannel};
use crate::codec::{ImageFrameHeader, INPUT_HEADER_LEN};
use crate::error::{Result, SdError};

/// Longest a mock read blocks when no report is queued.
const IDLE_READ: Duration = Duration::from_millis(5);

/// Key state bytes in a synthesized key report.
const KEY_REPORT_BODY: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recorded operation for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A read that returned a queued report of this length.
    Read(usize),
    /// A frame written to the device.
    Write(Vec<u8>),
}

/// Build a key report with the given 1-based slots pressed.
pub fn key_report(pressed: &[usize]) -> Vec<u8> {
    let mut report = vec![0x01, 0x00, 0x20, 0x00];
    report.resize(INPUT_HEADER_LEN + KEY_REPORT_BODY, 0);
    for slot in pressed {
        if let Some(byte) = slot
            .checked_sub(1)
            .and_then(|i| report.get_mut(INPUT_HEADER_LEN + i))
        {
            *byte |= 0x01;
        }
    }
    report
}

/// Mock report channel.
pub struct MockChannel {
    serial: String,
    reports: Mutex<VecDeque<Vec<u8>>>,
    operation_log: Mutex<Vec<Operation>>,
    error_injection: Mutex<Option<SdError>>,
    fail_writes_after: Option<usize>,
    writes: AtomicUsize,
    connected: AtomicBool,
}

impl MockChannel {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            reports: Mutex::new(VecDeque::new()),
            operation_log: Mutex::new(Vec::new()),
            error_injection: Mutex::new(None),
            fail_writes_after: None,
            writes: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
        }
    }

    pub fn builder(serial: impl Into<String>) -> MockChannelBuilder {
        MockChannelBuilder::new(serial)
    }

    // === Input Simulation ===

    /// Queue a raw input report.
    pub fn queue_report(&self, report: Vec<u8>) {
        lock(&self.reports).push_back(report);
    }

    /// Queue a key report with one slot pressed.
    pub fn queue_press(&self, slot: usize) {
        self.queue_report(key_report(&[slot]));
    }

    /// Queue an all-released key report.
    pub fn queue_release(&self) {
        self.queue_report(key_report(&[]));
    }

    /// Queue a press followed by a release.
    pub fn queue_tap(&self, slot: usize) {
        let mut reports = lock(&self.reports);
        reports.push_back(key_report(&[slot]));
        reports.push_back(key_report(&[]));
    }

    pub fn pending_reports(&self) -> usize {
        lock(&self.reports).len()
    }

    // === Error Simulation ===

    /// Inject an error for the next read or write.
    pub fn inject_error(&self, error: SdError) {
        *lock(&self.error_injection) = Some(error);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // === Assertions ===

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.operation_log).clone()
    }

    /// Frames written, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        lock(&self.operation_log)
            .iter()
            .filter_map(|op| match op {
                Operation::Write(frame) => Some(frame.clone()),
                Operation::Read(_) => None,
            })
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Key-image frames written for a 1-based slot, in order.
    pub fn frames_for_slot(&self, slot: usize) -> Vec<Vec<u8>> {
        self.frames()
            .into_iter()
            .filter(|frame| ImageFrameHeader::parse(frame).is_some_and(|h| h.slot() == slot))
            .collect()
    }

    /// Clear the operation log for fresh assertions.
    pub fn clear_operations(&self) {
        lock(&self.operation_log).clear();
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Assert a specific operation was performed at least once.
    ///
    /// # Panics
    ///
    /// Panics if the operation was not found.
    pub fn assert_contains(&self, expected: &Operation) {
        let ops = self.operations();
        assert!(
            ops.contains(expected),
            "Expected operation {expected:?} not found in: {ops:#?}",
        );
    }

    /// Assert nothing was written.
    ///
    /// # Panics
    ///
    /// Panics if any frame was written.
    pub fn assert_no_writes(&self) {
        let frames = self.frames();
        assert!(
            frames.is_empty(),
            "Expected no writes, but found {} frame(s)",
            frames.len()
        );
    }

    // === Internal Helpers ===

    fn record_op(&self, op: Operation) {
        trace!(serial = %self.serial, ?op, "Recording operation");
        lock(&self.operation_log).push(op);
    }

    fn check_error(&self) -> Result<()> {
        if let Some(error) = lock(&self.error_injection).take() {
            return Err(error);
        }
        if !self.is_connected() {
            return Err(SdError::DeviceCommunication(format!(
                "Mock device {} disconnected",
                self.serial
            )));
        }
        Ok(())
    }
}

impl ReportChannel for MockChannel {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        self.check_error()?;

        let next = lock(&self.reports).pop_front();
        match next {
            Some(report) => {
                let len = report.len().min(buf.len());
                buf[..len].copy_from_slice(&report[..len]);
                self.record_op(Operation::Read(len));
                Ok(len)
            }
            None => {
                let wait = u64::try_from(timeout_ms).map_or(IDLE_READ, Duration::from_millis);
                std::thread::sleep(wait.min(IDLE_READ));
                Ok(0)
            }
        }
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        self.check_error()?;

        if let Some(limit) = self.fail_writes_after {
            if self.writes.load(Ordering::SeqCst) >= limit {
                return Err(SdError::DeviceCommunication(
                    "Mock failure after write limit".to_string(),
                ));
            }
        }

        self.record_op(Operation::Write(frame.to_vec()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builder for creating `MockChannel` with common configurations.
pub struct MockChannelBuilder {
    serial: String,
    reports: Vec<Vec<u8>>,
    fail_writes_after: Option<usize>,
    connected: bool,
}

impl MockChannelBuilder {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            reports: Vec::new(),
            fail_writes_after: None,
            connected: true,
        }
    }

    /// Queue a raw report to be read.
    #[must_use]
    pub fn with_report(mut self, report: Vec<u8>) -> Self {
        self.reports.push(report);
        self
    }

    /// Queue a key press for a 1-based slot.
    #[must_use]
    pub fn with_press(self, slot: usize) -> Self {
        self.with_report(key_report(&[slot]))
    }

    /// Fail every write after the first `writes` succeed.
    #[must_use]
    pub fn fail_writes_after(mut self, writes: usize) -> Self {
        self.fail_writes_after = Some(writes);
        self
    }

    #[must_use]
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn build(self) -> MockChannel {
        let mut channel = MockChannel::new(self.serial);
        channel.fail_writes_after = self.fail_writes_after;
        channel.connected = AtomicBool::new(self.connected);
        *lock(&channel.reports) = self.reports.into();
        channel
    }
}

/// Mock host device bus.
#[derive(Default)]
pub struct MockDeviceBus {
    present: Mutex<Vec<DiscoveredDevice>>,
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    open_failures: Mutex<HashMap<String, u32>>,
    enumerate_error: Mutex<Option<SdError>>,
    opens: Mutex<Vec<String>>,
}

impl MockDeviceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a device present; returns the channel `open` will hand out.
    pub fn plug(&self, device: DiscoveredDevice) -> Arc<MockChannel> {
        debug!(serial = %device.serial, "Mock device plugged");
        let channel = Arc::clone(
            lock(&self.channels)
                .entry(device.serial.clone())
                .or_insert_with(|| Arc::new(MockChannel::new(device.serial.clone()))),
        );
        channel.reconnect();

        let mut present = lock(&self.present);
        present.retain(|d| d.serial != device.serial);
        present.push(device);
        channel
    }

    /// Remove a device; its channel starts failing reads and writes.
    pub fn unplug(&self, serial: &str) {
        debug!(serial, "Mock device unplugged");
        lock(&self.present).retain(|d| d.serial != serial);
        if let Some(channel) = lock(&self.channels).get(serial) {
            channel.disconnect();
        }
    }

    pub fn channel(&self, serial: &str) -> Option<Arc<MockChannel>> {
        lock(&self.channels).get(serial).cloned()
    }

    /// Make the next `times` opens of `serial` fail.
    pub fn fail_opens(&self, serial: &str, times: u32) {
        lock(&self.open_failures).insert(serial.to_string(), times);
    }

    /// Inject an error for the next enumeration.
    pub fn inject_enumerate_error(&self, error: SdError) {
        *lock(&self.enumerate_error) = Some(error);
    }

    /// Number of successful opens of `serial`.
    pub fn open_count(&self, serial: &str) -> usize {
        lock(&self.opens).iter().filter(|s| *s == serial).count()
    }
}

impl DeviceBus for MockDeviceBus {
    fn enumerate(&self) -> Result<Vec<DiscoveredDevice>> {
        if let Some(error) = lock(&self.enumerate_error).take() {
            return Err(error);
        }
        Ok(lock(&self.present).clone())
    }

    fn open(&self, serial: &str) -> Result<Arc<dyn ReportChannel>> {
        if let Some(remaining) = lock(&self.open_failures).get_mut(serial) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SdError::DeviceOpenFailed {
                    serial: serial.to_string(),
                    reason: "injected open failure".to_string(),
                });
            }
        }

        let present = lock(&self.present).iter().any(|d| d.serial == serial);
        let channel = lock(&self.channels).get(serial).cloned();
        match channel {
            Some(channel) if present => {
                lock(&self.opens).push(serial.to_string());
                Ok(channel)
            }
            _ => Err(SdError::DeviceOpenFailed {
                serial: serial.to_string(),
                reason: "device not present".to_string(),
            }),
        }
    }
}
