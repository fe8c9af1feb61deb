//! Persisted instance identifier.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, ResultExt};

/// File holding the instance id inside the config directory.
pub const INSTANCE_ID_FILE: &str = "instance-id";

pub fn instance_id_path(config_dir: &Path) -> PathBuf {
    config_dir.join(INSTANCE_ID_FILE)
}

/// Read the instance id, creating it on first use.
///
/// A missing, empty or non-UUID file is replaced with a fresh v4 UUID.
pub fn load_or_create(config_dir: &Path) -> Result<String> {
    let path = instance_id_path(config_dir);

    match fs::read_to_string(&path) {
        Ok(content) => {
            let trimmed = content.trim();
            if Uuid::parse_str(trimmed).is_ok() {
                return Ok(trimmed.to_string());
            }
            warn!(path = %path.display(), "Instance id file is invalid, regenerating");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    let id = Uuid::new_v4().to_string();
    fs::write(&path, &id).with_context(|| format!("writing {}", path.display()))?;
    info!(instance_id = %id, path = %path.display(), "Created instance id");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_created_once_then_stable() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("sd");

        let first = load_or_create(&dir).unwrap();
        let second = load_or_create(&dir).unwrap();

        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4().to_string();
        fs::write(instance_id_path(temp.path()), format!("  {id}\n")).unwrap();
        assert_eq!(load_or_create(temp.path()).unwrap(), id);
    }

    #[test]
    fn test_invalid_file_regenerated() {
        let temp = TempDir::new().unwrap();
        fs::write(instance_id_path(temp.path()), "").unwrap();
        let id = load_or_create(temp.path()).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(fs::read_to_string(instance_id_path(temp.path())).unwrap(), id);
    }
}
