//! Store → hardware: key images and the touch strip.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::DeviceContext;
use super::bootstrap::current_scope;
use crate::codec::encode_image;
use crate::codec::plus::{LcdRegion, encode_lcd_image};
use crate::config::resolve_asset;
use crate::device::{ReportChannel, write_frames};
use crate::error::{Result, SdError};
use crate::model::keys::slot_from_buffer_key;
use crate::model::{PageScope, TouchMode};
use crate::render;
use crate::store::{Operation, Watch, WatchEvent};

/// Pause between touch strip regions.
const LCD_PACING: Duration = Duration::from_millis(20);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes image uploads to one device.
///
/// All frames of one image are written under a single lock, off the async
/// runtime, so uploads from different tasks never interleave.
#[derive(Clone)]
pub struct FrameWriter {
    channel: Arc<dyn ReportChannel>,
    lock: Arc<Mutex<()>>,
}

impl FrameWriter {
    pub fn new(channel: Arc<dyn ReportChannel>) -> Self {
        Self {
            channel,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn write(&self, frames: Vec<Vec<u8>>) -> Result<()> {
        let channel = Arc::clone(&self.channel);
        let lock_handle = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock(&lock_handle);
            write_frames(channel.as_ref(), &frames)
        })
        .await
        .map_err(|e| SdError::DeviceCommunication(format!("write task failed: {e}")))?
    }

    /// Upload a rendered key image to a 1-based slot.
    pub async fn write_key(&self, slot: usize, buffer: &[u8]) -> Result<usize> {
        let frames = encode_image(buffer, slot)?;
        let count = frames.len();
        self.write(frames).await?;
        Ok(count)
    }
}

/// Draw every key black.
pub async fn blank_all(ctx: &DeviceContext, writer: &FrameWriter) -> Result<()> {
    let caps = ctx.caps;
    let black = tokio::task::spawn_blocking(move || render::blank_key(&caps))
        .await
        .map_err(|e| SdError::ImageProcessing(format!("render task failed: {e}")))??;

    for slot in caps.slots() {
        writer.write_key(slot, &black).await?;
    }
    debug!(serial = %ctx.serial(), slots = caps.slot_count, "Keys blanked");
    Ok(())
}

/// Draw the touch strip layout of `profile_id`.
pub async fn push_touch_strip(ctx: &DeviceContext, writer: &FrameWriter, profile_id: &str) -> Result<()> {
    let profile = ctx.hierarchy.get_profile(&ctx.key, profile_id).await?;
    let layout = profile.touch_screen;
    let asset_dir = ctx.config.asset_dir.clone();
    let strategy = ctx.config.resize;

    let regions: Vec<(LcdRegion, String)> = match layout.mode() {
        TouchMode::Full => vec![(LcdRegion::FULL, layout.full_image)],
        TouchMode::Segments => layout
            .segments
            .into_iter()
            .enumerate()
            .filter_map(|(i, image)| Some((LcdRegion::segment(i + 1)?, image)))
            .collect(),
        TouchMode::Blank => vec![(LcdRegion::FULL, String::new())],
    };

    for (index, (region, image)) in regions.into_iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(LCD_PACING).await;
        }
        let asset_dir = asset_dir.clone();
        let buffer = tokio::task::spawn_blocking(move || render_region(&image, &asset_dir, region, strategy))
            .await
            .map_err(|e| SdError::ImageProcessing(format!("render task failed: {e}")))??;
        writer.write(encode_lcd_image(&buffer, region)).await?;
    }

    debug!(serial = %ctx.serial(), profile_id, mode = %layout.mode, "Touch strip drawn");
    Ok(())
}

/// Empty or unreadable images draw black.
fn render_region(
    image: &str,
    asset_dir: &std::path::Path,
    region: LcdRegion,
    strategy: render::ResizeStrategy,
) -> Result<Vec<u8>> {
    let (width, height) = (u32::from(region.width), u32::from(region.height));
    if image.is_empty() {
        return render::solid(width, height);
    }
    match resolve_asset(image, asset_dir).and_then(|path| render::render_strip(&path, width, height, strategy)) {
        Ok(buffer) => Ok(buffer),
        Err(e) => {
            warn!(image, error = %e, "Touch strip image unavailable, drawing black");
            render::solid(width, height)
        }
    }
}

/// Upload every rendered buffer of `scope` as it changes.
///
/// Returns when shutdown is signalled or the watch ends.
async fn watch_buffers(
    ctx: &DeviceContext,
    writer: &FrameWriter,
    scope: &PageScope,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut watch = ctx.hierarchy.store().watch(&scope.buffer_pattern()).await?;
    debug!(serial = %ctx.serial(), pattern = %watch.pattern(), "Buffer watch opened");

    loop {
        let event = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            event = watch.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WatchEvent::ReplayComplete => {
                info!(serial = %ctx.serial(), page_id = %scope.page_id, "Initial key sync complete");
            }
            WatchEvent::Update(update) if update.operation == Operation::Delete => {
                trace!(key = %update.key, "Buffer removed, key left as is");
            }
            WatchEvent::Update(update) => {
                let Some(slot) = slot_from_buffer_key(&update.key) else {
                    continue;
                };
                if slot == 0 || slot > ctx.caps.slot_count {
                    debug!(key = %update.key, "Buffer for a slot this device does not have");
                    continue;
                }
                match writer.write_key(slot, &update.value).await {
                    Ok(frames) => trace!(serial = %ctx.serial(), slot, frames, "Key image uploaded"),
                    Err(e) => warn!(serial = %ctx.serial(), slot, error = %e, "Key image upload failed"),
                }
            }
        }
    }

    watch.stop();
    debug!(serial = %ctx.serial(), page_id = %scope.page_id, "Buffer watch closed");
    Ok(())
}

/// Keep the keys in sync with the buffers of the current page.
///
/// Without pointer tracking the page chosen at startup is kept for the life
/// of the engine. With it, a change of either current pointer blanks the
/// keys and restarts the buffer watch on the new page.
pub(super) async fn run_display(
    ctx: Arc<DeviceContext>,
    writer: FrameWriter,
    scope: PageScope,
    mut shutdown: watch::Receiver<bool>,
) {
    if !ctx.config.track_pointer_changes {
        if let Err(e) = watch_buffers(&ctx, &writer, &scope, &mut shutdown).await {
            warn!(serial = %ctx.serial(), error = %e, "Buffer watch failed");
        }
        return;
    }

    let store = ctx.hierarchy.store();
    let mut profile_pointer = match store.watch(&ctx.key.current_profile()).await {
        Ok(watch) => watch,
        Err(e) => {
            warn!(serial = %ctx.serial(), error = %e, "Pointer watch failed");
            return;
        }
    };
    let page_pattern = format!("{}*.pages.current", ctx.key.profiles_prefix());
    let mut page_pointer = match store.watch(&page_pattern).await {
        Ok(watch) => watch,
        Err(e) => {
            warn!(serial = %ctx.serial(), error = %e, "Pointer watch failed");
            return;
        }
    };

    let mut scope = scope;
    loop {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = {
            let (ctx, writer, scope) = (Arc::clone(&ctx), writer.clone(), scope.clone());
            tokio::spawn(async move {
                if let Err(e) = watch_buffers(&ctx, &writer, &scope, &mut stop_rx).await {
                    warn!(serial = %ctx.serial(), error = %e, "Buffer watch failed");
                }
            })
        };

        let next = next_scope(&ctx, &scope, &mut profile_pointer, &mut page_pointer, &mut shutdown).await;
        stop_tx.send_replace(true);
        if let Err(e) = task.await {
            warn!(serial = %ctx.serial(), error = %e, "Buffer watch task ended abnormally");
        }

        let Some(next) = next else { break };
        info!(
            serial = %ctx.serial(),
            profile_id = %next.profile_id,
            page_id = %next.page_id,
            "Current page changed, resyncing keys"
        );
        if let Err(e) = blank_all(&ctx, &writer).await {
            warn!(serial = %ctx.serial(), error = %e, "Failed to blank keys");
        }
        scope = next;
    }

    profile_pointer.stop();
    page_pointer.stop();
}

/// Wait until the pointers name a page other than `current`; `None` on
/// shutdown.
async fn next_scope(
    ctx: &DeviceContext,
    current: &PageScope,
    profile_pointer: &mut Watch,
    page_pointer: &mut Watch,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<PageScope> {
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return None,
            Some(_) = profile_pointer.recv() => {}
            Some(_) = page_pointer.recv() => {}
        }

        match current_scope(ctx).await {
            Ok(scope) if scope != *current => return Some(scope),
            Ok(_) => {}
            Err(e) => debug!(serial = %ctx.serial(), error = %e, "Pointers not settled yet"),
        }
    }
}

/// Redraw the touch strip when the current profile or its record changes.
pub(super) async fn run_strip_watch(
    ctx: Arc<DeviceContext>,
    writer: FrameWriter,
    mut shutdown: watch::Receiver<bool>,
) {
    let pattern = format!("{}*", ctx.key.profiles_prefix());
    let mut watch = match ctx.hierarchy.store().watch(&pattern).await {
        Ok(watch) => watch,
        Err(e) => {
            warn!(serial = %ctx.serial(), error = %e, "Profile watch failed");
            return;
        }
    };
    let mut replayed = false;

    loop {
        let event = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            event = watch.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let update = match event {
            WatchEvent::ReplayComplete => {
                replayed = true;
                continue;
            }
            // Startup already drew the strip
            WatchEvent::Update(_) if !replayed => continue,
            WatchEvent::Update(update) if update.operation == Operation::Delete => continue,
            WatchEvent::Update(update) => update,
        };

        let Ok(Some(profile_id)) = ctx.hierarchy.current_profile_id(&ctx.key).await else {
            continue;
        };
        if update.key != ctx.key.current_profile() && update.key != ctx.key.profile(&profile_id) {
            continue;
        }
        if let Err(e) = push_touch_strip(&ctx, &writer, &profile_id).await {
            warn!(serial = %ctx.serial(), error = %e, "Failed to redraw touch strip");
        }
    }

    watch.stop();
    debug!(serial = %ctx.serial(), "Profile watch closed");
}
