//! Button record → rendered `.buffer` key.
//!
//! Watches every button record of the device and writes the key image of
//! its active state next to it. The display task picks the buffer up from
//! there, so any instance (or an external editor) can drive the keys just by
//! writing records.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::DeviceContext;
use crate::config::{resolve_asset, validate_image_path};
use crate::error::{Result, SdError};
use crate::model::keys::buffer_key;
use crate::model::{ButtonRecord, decode};
use crate::render;
use crate::store::{Operation, Update, WatchEvent};

/// Render the key image of the button stored at `update.key`.
///
/// `Ok(None)` when the button has no image to show.
pub(super) async fn render_button(ctx: &DeviceContext, update: &Update) -> Result<Option<usize>> {
    let button: ButtonRecord = decode(&update.key, &update.value)?;
    let Some(image) = button.active_image() else {
        trace!(key = %update.key, "Button has no image");
        return Ok(None);
    };

    let path = resolve_asset(image, &ctx.config.asset_dir)?;
    validate_image_path(&path)?;

    let caps = ctx.caps;
    let strategy = ctx.config.resize;
    let buffer = tokio::task::spawn_blocking(move || render::render_key(&path, &caps, strategy))
        .await
        .map_err(|e| SdError::ImageProcessing(format!("render task failed: {e}")))??;

    let len = buffer.len();
    ctx.hierarchy.put_buffer(&update.key, buffer).await?;
    Ok(Some(len))
}

/// During replay only buttons without a buffer are rendered.
async fn needs_render(ctx: &DeviceContext, slot_key: &str) -> bool {
    match ctx.hierarchy.store().get(&buffer_key(slot_key)).await {
        Ok(_) => false,
        Err(e) if e.is_not_found() => true,
        Err(e) => {
            debug!(key = %slot_key, error = %e, "Buffer lookup failed, rendering anyway");
            true
        }
    }
}

pub(super) async fn run_renderer(ctx: Arc<DeviceContext>, mut shutdown: watch::Receiver<bool>) {
    let pattern = ctx.key.slot_pattern(ctx.caps.segment);
    let mut watch = match ctx.hierarchy.store().watch(&pattern).await {
        Ok(watch) => watch,
        Err(e) => {
            warn!(serial = %ctx.serial(), error = %e, "Button watch failed");
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
                debug!(serial = %ctx.serial(), "Button records replayed");
                continue;
            }
            WatchEvent::Update(update) if update.operation == Operation::Delete => {
                trace!(key = %update.key, "Button removed");
                continue;
            }
            WatchEvent::Update(update) => update,
        };

        if !replayed && !needs_render(&ctx, &update.key).await {
            continue;
        }

        match render_button(&ctx, &update).await {
            Ok(Some(bytes)) => trace!(key = %update.key, bytes, "Buffer rendered"),
            Ok(None) => {}
            Err(e) => warn!(key = %update.key, error = %e, "Button not rendered"),
        }
    }

    watch.stop();
    debug!(serial = %ctx.serial(), "Button watch closed");
}
