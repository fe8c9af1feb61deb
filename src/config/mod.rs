//! Configuration: daemon settings, persisted instance id, path helpers.

pub mod instance;
pub mod path;
pub mod settings;

pub use instance::load_or_create as load_or_create_instance_id;
pub use path::{default_config_dir, home_dir, resolve_asset, resolve_path, validate_image_path};
pub use settings::{Overrides, Settings};
