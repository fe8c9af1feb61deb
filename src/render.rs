//! Image rendering: image files → encoded key and touch strip buffers.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::Capabilities;
use crate::error::{Result, SdError};

/// JPEG quality used for every buffer sent to the device.
pub const JPEG_QUALITY: u8 = 95;

/// Strategy for resizing images to match key dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeStrategy {
    /// Fit within key, maintain aspect ratio (black bars).
    Fit,
    /// Fill key, maintain aspect ratio (center crop).
    #[default]
    Fill,
    /// Stretch to fill (may distort).
    Stretch,
}

/// Load an image and resize it according to the specified strategy.
pub fn load_and_resize(
    path: &Path,
    width: u32,
    height: u32,
    strategy: ResizeStrategy,
) -> Result<DynamicImage> {
    if !path.is_file() {
        return Err(SdError::ImageNotFound {
            path: path.display().to_string(),
        });
    }

    let img = image::open(path).map_err(|e| SdError::ImageProcessing(e.to_string()))?;
    Ok(resize(&img, width, height, strategy))
}

/// Resize an in-memory image.
pub fn resize(img: &DynamicImage, width: u32, height: u32, strategy: ResizeStrategy) -> DynamicImage {
    let filter = image::imageops::FilterType::Lanczos3;

    match strategy {
        ResizeStrategy::Fit => {
            // Center on a black canvas so the output is always exactly width x height
            let resized = img.resize(width, height, filter).to_rgb8();
            let mut canvas = RgbImage::new(width, height);
            let (rw, rh) = resized.dimensions();
            let x = (width - rw) / 2;
            let y = (height - rh) / 2;
            image::imageops::overlay(&mut canvas, &resized, x.into(), y.into());
            DynamicImage::ImageRgb8(canvas)
        }
        ResizeStrategy::Fill => img.resize_to_fill(width, height, filter),
        ResizeStrategy::Stretch => img.resize_exact(width, height, filter),
    }
}

/// Encode as baseline RGB JPEG.
pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| SdError::ImageProcessing(e.to_string()))?;
    Ok(out.into_inner())
}

/// Render a key image for a device model.
pub fn render_key(path: &Path, caps: &Capabilities, strategy: ResizeStrategy) -> Result<Vec<u8>> {
    if !caps.has_display() {
        return Err(SdError::ImageProcessing(
            "device has no key display".to_string(),
        ));
    }

    let mut img = load_and_resize(path, caps.key_size, caps.key_size, strategy)?;
    if caps.rotate_180 {
        img = img.rotate180();
    }

    let buffer = encode_jpeg(&img)?;
    trace!(path = %path.display(), bytes = buffer.len(), "Rendered key image");
    Ok(buffer)
}

/// Solid black key at the model's key size.
pub fn blank_key(caps: &Capabilities) -> Result<Vec<u8>> {
    solid(caps.key_size, caps.key_size)
}

/// Render an image for the touch strip (full strip or one segment).
pub fn render_strip(path: &Path, width: u32, height: u32, strategy: ResizeStrategy) -> Result<Vec<u8>> {
    let img = load_and_resize(path, width, height, strategy)?;
    encode_jpeg(&img)
}

/// Solid black image of the given size.
pub fn solid(width: u32, height: u32) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(SdError::ImageProcessing(
            "cannot render an empty image".to_string(),
        ));
    }
    encode_jpeg(&DynamicImage::ImageRgb8(RgbImage::new(width, height)))
}
