//! Hardware → bus: report reader and press dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::DeviceContext;
use super::bootstrap::current_scope;
use crate::actions::Dispatch;
use crate::codec::plus::{DialTracker, PlusReport, decode_touch};
use crate::codec::{INPUT_REPORT_LEN, NO_PRESS, decode_presses};
use crate::device::ReportChannel;
use crate::error::Result;

/// Pause after a failed read so a dead handle does not spin.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Read reports on a blocking thread until `stop` is set or the dispatch
/// side goes away.
///
/// Read errors are logged and the loop keeps going; only cancellation ends
/// it.
pub(super) fn spawn_reader(
    channel: Arc<dyn ReportChannel>,
    timeout_ms: i32,
    stop: Arc<AtomicBool>,
    reports: mpsc::Sender<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let serial = channel.serial().to_string();
        let mut buf = vec![0u8; INPUT_REPORT_LEN];
        let mut failing = false;
        debug!(%serial, "Reader started");

        while !stop.load(Ordering::SeqCst) {
            match channel.read_timeout(&mut buf, timeout_ms) {
                Ok(0) => {}
                Ok(len) => {
                    failing = false;
                    trace!(%serial, len, header = %hex::encode(&buf[..len.min(8)]), "Report read");
                    if reports.blocking_send(buf[..len].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if failing {
                        trace!(%serial, error = %e, "Read still failing");
                    } else {
                        warn!(%serial, error = %e, "Read failed, continuing");
                        failing = true;
                    }
                    std::thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
        debug!(%serial, "Reader stopped");
    })
}

/// Turn reports into button dispatches and dial/touch events.
pub(super) async fn run_dispatch(
    ctx: Arc<DeviceContext>,
    mut reports: mpsc::Receiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut dials = DialTracker::new();

    loop {
        let report = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            report = reports.recv() => match report {
                Some(report) => report,
                None => break,
            },
        };
        handle_report(&ctx, &mut dials, &report).await;
    }
    debug!(serial = %ctx.serial(), "Dispatch stopped");
}

async fn handle_report(ctx: &DeviceContext, dials: &mut DialTracker, report: &[u8]) {
    if ctx.caps.dials > 0 {
        match PlusReport::classify(report) {
            PlusReport::Dials => {
                for event in dials.decode(report) {
                    let topic = ctx.key.dial_topic(event.dial);
                    if let Err(e) = ctx.publisher.publish_event(&topic, &event).await {
                        warn!(serial = %ctx.serial(), dial = event.dial, error = %e, "Dial event not published");
                    }
                }
                return;
            }
            PlusReport::Touch => {
                if let Some(event) = decode_touch(report) {
                    let topic = ctx.key.touch_topic();
                    if let Err(e) = ctx.publisher.publish_event(&topic, &event).await {
                        warn!(serial = %ctx.serial(), error = %e, "Touch event not published");
                    }
                }
                return;
            }
            PlusReport::Keys => {}
        }
    }

    for slot in decode_presses(report) {
        if slot == NO_PRESS {
            continue;
        }
        if slot > ctx.caps.slot_count {
            trace!(serial = %ctx.serial(), slot, "Ignoring bit outside the key range");
            continue;
        }
        match press(ctx, slot).await {
            Ok(Dispatch::Published(action)) => debug!(serial = %ctx.serial(), slot, %action, "Press handled"),
            Ok(Dispatch::Unassigned) => {}
            Err(e) => warn!(serial = %ctx.serial(), slot, error = %e, "Press not dispatched"),
        }
    }
}

/// Resolve `slot` on the current page and dispatch its action.
///
/// The pointers are read on every press, so a page switch takes effect on
/// the next press without restarting anything.
pub async fn press(ctx: &DeviceContext, slot: usize) -> Result<Dispatch> {
    let scope = current_scope(ctx).await?;
    let button = ctx.hierarchy.get_button(&scope, slot).await?;
    debug!(
        serial = %ctx.serial(),
        slot,
        profile_id = %scope.profile_id,
        page_id = %scope.page_id,
        "Button pressed"
    );
    ctx.publisher.dispatch(&button).await
}
