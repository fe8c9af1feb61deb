//! Reactive sync engine: one instance per connected device.
//!
//! Starting an engine bootstraps the device's current profile and page,
//! blanks the keys, then runs these tasks until stopped:
//!
//! - **reader**: blocking report reads on a dedicated thread
//! - **dispatch**: decodes reports, resolves pressed buttons, publishes
//! - **display**: watches rendered buffers of the current page and uploads them
//! - **renderer**: regenerates `.buffer` keys when button records change
//! - **strip**: redraws the Stream Deck + touch strip when its profile changes
//!
//! Models without a display only run the reader and dispatch tasks.

mod bootstrap;
mod display;
mod input;
mod renderer;

pub use bootstrap::{bootstrap, current_scope, ensure_current_page, ensure_current_profile};
pub use display::{FrameWriter, blank_all, push_touch_strip};
pub use input::press;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actions::ActionPublisher;
use crate::config::Settings;
use crate::device::{Capabilities, DeviceModel, ReportChannel};
use crate::error::Result;
use crate::model::{DeviceKey, Hierarchy, PageScope, PageTemplate};
use crate::render::ResizeStrategy;

/// Reports buffered between the reader thread and the dispatch task.
const REPORT_BUFFER: usize = 64;

/// Engine knobs, taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_profile_name: String,
    pub default_image: String,
    pub asset_dir: PathBuf,
    pub read_timeout_ms: i32,
    pub track_pointer_changes: bool,
    pub render_buffers: bool,
    pub blank_on_connect: bool,
    pub resize: ResizeStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_profile_name: settings.default_profile_name.clone(),
            default_image: settings.default_button_image(),
            asset_dir: settings.asset_dir(),
            read_timeout_ms: settings.read_timeout_ms,
            track_pointer_changes: settings.track_pointer_changes,
            render_buffers: settings.render_buffers,
            blank_on_connect: settings.blank_on_connect,
            resize: settings.resize,
        }
    }
}

/// Everything the tasks of one device share.
pub struct DeviceContext {
    pub key: DeviceKey,
    pub model: DeviceModel,
    pub caps: Capabilities,
    pub channel: Arc<dyn ReportChannel>,
    pub hierarchy: Hierarchy,
    pub publisher: ActionPublisher,
    pub config: EngineConfig,
}

impl DeviceContext {
    pub fn new(
        key: DeviceKey,
        model: DeviceModel,
        channel: Arc<dyn ReportChannel>,
        hierarchy: Hierarchy,
        publisher: ActionPublisher,
        config: EngineConfig,
    ) -> Self {
        Self {
            key,
            model,
            caps: model.capabilities(),
            channel,
            hierarchy,
            publisher,
            config,
        }
    }

    pub fn page_template(&self) -> PageTemplate {
        PageTemplate::new(&self.caps, self.config.default_image.as_str())
    }

    pub fn serial(&self) -> &str {
        &self.key.device_id
    }
}

/// Running engine of one device. Dropping it signals shutdown; [`stop`]
/// also waits for the tasks to finish.
///
/// [`stop`]: EngineHandle::stop
pub struct EngineHandle {
    serial: String,
    scope: PageScope,
    shutdown: watch::Sender<bool>,
    reader_stop: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Page the engine started on.
    pub fn scope(&self) -> &PageScope {
        &self.scope
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    fn signal(&self) {
        self.shutdown.send_replace(true);
        self.reader_stop.store(true, Ordering::SeqCst);
    }

    /// Cancel every task and wait for them. Watches are stopped and the
    /// hardware handle is released once the last task exits.
    pub async fn stop(mut self) {
        self.signal();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(serial = %self.serial, error = %e, "Engine task ended abnormally");
            }
        }
        info!(serial = %self.serial, "Engine stopped");
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

pub struct SyncEngine;

impl SyncEngine {
    /// Bootstrap the device and spawn its tasks.
    pub async fn start(ctx: DeviceContext) -> Result<EngineHandle> {
        let ctx = Arc::new(ctx);
        let scope = bootstrap(&ctx).await?;
        let writer = FrameWriter::new(Arc::clone(&ctx.channel));

        if ctx.caps.has_display() && ctx.config.blank_on_connect {
            if let Err(e) = blank_all(&ctx, &writer).await {
                warn!(serial = %ctx.serial(), error = %e, "Failed to blank keys");
            }
        }
        if ctx.caps.touch_strip.is_some() {
            if let Err(e) = push_touch_strip(&ctx, &writer, &scope.profile_id).await {
                warn!(serial = %ctx.serial(), error = %e, "Failed to draw touch strip");
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let reader_stop = Arc::new(AtomicBool::new(false));
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_BUFFER);

        let mut tasks = vec![
            input::spawn_reader(
                Arc::clone(&ctx.channel),
                ctx.config.read_timeout_ms,
                Arc::clone(&reader_stop),
                reports_tx,
            ),
            tokio::spawn(input::run_dispatch(
                Arc::clone(&ctx),
                reports_rx,
                shutdown_rx.clone(),
            )),
        ];

        if ctx.caps.has_display() {
            tasks.push(tokio::spawn(display::run_display(
                Arc::clone(&ctx),
                writer.clone(),
                scope.clone(),
                shutdown_rx.clone(),
            )));
            if ctx.config.render_buffers {
                tasks.push(tokio::spawn(renderer::run_renderer(
                    Arc::clone(&ctx),
                    shutdown_rx.clone(),
                )));
            }
        }
        if ctx.caps.touch_strip.is_some() {
            tasks.push(tokio::spawn(display::run_strip_watch(
                Arc::clone(&ctx),
                writer,
                shutdown_rx,
            )));
        }

        info!(
            instance_id = %ctx.key.instance_id,
            serial = %ctx.serial(),
            model = %ctx.model,
            profile_id = %scope.profile_id,
            page_id = %scope.page_id,
            tasks = tasks.len(),
            "Engine started"
        );
        debug!(pattern = %scope.buffer_pattern(), "Buffer watch scope");

        Ok(EngineHandle {
            serial: ctx.serial().to_string(),
            scope,
            shutdown,
            reader_stop,
            tasks,
        })
    }
}
