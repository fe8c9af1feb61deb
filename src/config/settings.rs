//! Daemon settings: defaults, `config.toml`, environment, CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SdError};
use crate::render::ResizeStrategy;

/// File name looked up inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_NATS_URL: &str = "NATS_URL";
pub const ENV_BUCKET: &str = "NATS_KV_BUCKET";
pub const ENV_ASSET_PATH: &str = "ASSET_PATH";

/// Runtime settings for the sync daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub nats_url: String,
    pub bucket: String,
    /// Prefix for image references; joined with relative paths.
    pub asset_path: String,
    pub poll_interval_ms: u64,
    pub read_timeout_ms: i32,
    /// Restart the buffer watch when the current profile or page changes.
    pub track_pointer_changes: bool,
    pub render_buffers: bool,
    pub blank_on_connect: bool,
    pub default_profile_name: String,
    /// How key and strip images are fitted to the display.
    pub resize: ResizeStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nats_url: "nats://127.0.0.1:4222".to_string(),
            bucket: "sd".to_string(),
            asset_path: String::new(),
            poll_interval_ms: 1000,
            read_timeout_ms: 100,
            track_pointer_changes: false,
            render_buffers: true,
            blank_on_connect: true,
            default_profile_name: "Default".to_string(),
            resize: ResizeStrategy::Fill,
        }
    }
}

/// Values given on the command line; `None` leaves the setting alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub nats_url: Option<String>,
    pub bucket: Option<String>,
    pub asset_path: Option<String>,
    pub track_pointer_changes: Option<bool>,
}

impl Settings {
    /// Load settings in precedence order: defaults, file, environment.
    ///
    /// When `explicit` is given the file must exist; otherwise
    /// `<config_dir>/config.toml` is read only if present.
    pub fn load(explicit: Option<&Path>, config_dir: &Path) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(SdError::ConfigNotFound {
                        path: path.display().to_string(),
                    });
                }
                Self::from_file(path)?
            }
            None => {
                let default_path = config_dir.join(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    debug!(path = %default_path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };

        settings.apply_env(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML settings file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)
            .map_err(|e| SdError::ConfigParse(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SdError::ConfigParse(e.to_string()))
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(url) = non_empty(ENV_NATS_URL) {
            self.nats_url = url;
        }
        if let Some(bucket) = non_empty(ENV_BUCKET) {
            self.bucket = bucket;
        }
        if let Some(assets) = non_empty(ENV_ASSET_PATH) {
            self.asset_path = assets;
        }
    }

    /// Apply command line overrides, which win over everything else.
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(url) = &overrides.nats_url {
            self.nats_url.clone_from(url);
        }
        if let Some(bucket) = &overrides.bucket {
            self.bucket.clone_from(bucket);
        }
        if let Some(assets) = &overrides.asset_path {
            self.asset_path.clone_from(assets);
        }
        if let Some(track) = overrides.track_pointer_changes {
            self.track_pointer_changes = track;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(SdError::ConfigInvalid("bucket must not be empty".to_string()));
        }
        if self.bucket.contains(['.', ' ', '*', '>']) {
            return Err(SdError::ConfigInvalid(format!(
                "bucket '{}' contains reserved characters",
                self.bucket
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(SdError::ConfigInvalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.read_timeout_ms <= 0 {
            return Err(SdError::ConfigInvalid(
                "read_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Asset directory as a path.
    pub fn asset_dir(&self) -> PathBuf {
        PathBuf::from(&self.asset_path)
    }

    /// Image reference written into freshly created buttons.
    ///
    /// Plain concatenation, so an `asset_path` without a trailing slash is
    /// used as a file-name prefix.
    pub fn default_button_image(&self) -> String {
        format!("{}images/correct.png", self.asset_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.nats_url, "nats://127.0.0.1:4222");
        assert_eq!(settings.bucket, "sd");
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert!(!settings.track_pointer_changes);
        assert!(settings.render_buffers);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            "bucket = \"decks\"\ntrack_pointer_changes = true\nresize = \"fit\"\n",
        )
        .unwrap();
        assert_eq!(settings.bucket, "decks");
        assert!(settings.track_pointer_changes);
        assert_eq!(settings.resize, ResizeStrategy::Fit);
        assert_eq!(settings.read_timeout_ms, 100);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Settings::from_toml("buckett = \"x\""),
            Err(SdError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut settings = Settings::from_toml("nats_url = \"nats://file:4222\"").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_NATS_URL, "nats://env:4222"),
            (ENV_BUCKET, ""),
            (ENV_ASSET_PATH, "/srv/assets/"),
        ]
        .into_iter()
        .collect();

        settings.apply_env(|name| env.get(name).map(|v| (*v).to_string()));

        assert_eq!(settings.nats_url, "nats://env:4222");
        assert_eq!(settings.bucket, "sd");
        assert_eq!(settings.default_button_image(), "/srv/assets/images/correct.png");
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut settings = Settings::default();
        settings.apply_env(|_| Some("nats://env:4222".to_string()));
        settings
            .apply_overrides(&Overrides {
                nats_url: Some("nats://cli:4222".to_string()),
                track_pointer_changes: Some(true),
                ..Overrides::default()
            })
            .unwrap();
        assert_eq!(settings.nats_url, "nats://cli:4222");
        assert!(settings.track_pointer_changes);
    }

    #[test]
    fn test_invalid_bucket() {
        let settings = Settings {
            bucket: "a.b".to_string(),
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(SdError::ConfigInvalid(_))));
    }

    #[test]
    fn test_explicit_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        assert!(matches!(
            Settings::load(Some(&missing), temp.path()),
            Err(SdError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_load_from_config_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "poll_interval_ms = 250\n",
        )
        .unwrap();
        let settings = Settings::load(None, temp.path()).unwrap();
        assert_eq!(settings.poll_interval_ms, 250);
    }
}
