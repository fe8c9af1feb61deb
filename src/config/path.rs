//! Path helpers for the config directory and image assets.
//!
//! Supports absolute paths, paths relative to a base directory, and "~" home
//! directory expansion.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{Result, SdError};

/// Name of the per-user config directory under `~/.config`.
pub const CONFIG_DIR_NAME: &str = "sd";

/// Resolve a path against a base directory.
///
/// Resolution rules:
/// 1. Paths starting with `~`: expanded to home directory
/// 2. Absolute paths: used as-is
/// 3. Relative paths: joined onto `base`
pub fn resolve_path(path: &Path, base: &Path) -> Result<PathBuf> {
    trace!(path = %path.display(), base = %base.display(), "Resolving path");

    let path_str = path.to_string_lossy();

    if path_str == "~" || path_str.starts_with("~/") {
        let home = home_dir()?;
        let rest = path_str.strip_prefix("~/").unwrap_or("");
        let resolved = if rest.is_empty() { home } else { home.join(rest) };
        debug!(
            original = %path.display(),
            resolved = %resolved.display(),
            "Expanded home directory path"
        );
        return Ok(resolved);
    }

    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    Ok(base.join(path))
}

/// Resolve the user's home directory (cross-platform).
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .ok_or_else(|| SdError::ConfigInvalid("Could not determine home directory".to_string()))
}

/// Default config directory: `~/.config/sd`.
///
/// Always under `~/.config`, regardless of platform conventions.
pub fn default_config_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(".config").join(CONFIG_DIR_NAME))
}

/// Resolve an image reference stored in a button record.
///
/// A reference that names an existing file as written (absolute, `~`, or
/// relative to the working directory) is used directly. Other relative
/// references are looked up under the asset directory.
pub fn resolve_asset(reference: &str, asset_dir: &Path) -> Result<PathBuf> {
    if reference.is_empty() {
        return Err(SdError::ImageNotFound {
            path: String::new(),
        });
    }

    let path = Path::new(reference);
    let direct = resolve_path(path, Path::new(""))?;
    if direct.is_absolute() || direct.is_file() {
        return Ok(direct);
    }
    Ok(asset_dir.join(path))
}

/// Validate that a path exists and is a supported image file.
pub fn validate_image_path(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(SdError::ImageNotFound {
            path: path.display().to_string(),
        });
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match ext.as_deref() {
        Some("png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp") => Ok(()),
        Some(other) => Err(SdError::ImageProcessing(format!(
            "Unsupported image format: .{other}"
        ))),
        None => Err(SdError::ImageProcessing(
            "Image file has no extension".to_string(),
        )),
    }
}
