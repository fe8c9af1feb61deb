//! Error types for device synchronization.

use thiserror::Error;

/// Primary error type for Stream Deck sync operations.
#[derive(Error, Debug)]
pub enum SdError {
    // Store errors
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Key already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed record at '{key}': {reason}")]
    Malformed { key: String, reason: String },

    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    // Device errors
    #[error("Unknown device model for vendor {vendor_id:#06x} product {product_id:#06x}")]
    UnknownModel { vendor_id: u16, product_id: u16 },

    #[error("Invalid slot {slot}: slots are 1-based and at most 256")]
    InvalidSlot { slot: usize },

    #[error("Failed to open device '{serial}': {reason}")]
    DeviceOpenFailed { serial: String, reason: String },

    #[error("Device communication error: {0}")]
    DeviceCommunication(String),

    // Bus errors
    #[error("Message bus error: {0}")]
    Bus(String),

    // Image errors
    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Image file not found: {path}")]
    ImageNotFound { path: String },

    // Configuration errors
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SdError {
    /// Returns true when a record or pointer is simply absent.
    ///
    /// Absence means "needs bootstrap", never corruption.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true when a create-if-absent lost the race to another writer.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true for errors a long-lived loop should log and ride out.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::DeviceCommunication(_) | Self::Bus(_) | Self::Io(_)
        )
    }

    /// Returns true when a failed device connect should be tried again on
    /// the next poll: transient failures, and records that are not written
    /// yet.
    pub const fn is_retryable(&self) -> bool {
        self.is_transient() || self.is_not_found()
    }

    /// Returns true for errors that abort a single device's setup.
    pub const fn is_fatal_for_device(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel { .. } | Self::DeviceOpenFailed { .. }
        )
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::StoreUnavailable(_) => Some("Check that the NATS server is running (NATS_URL)"),
            Self::DeviceOpenFailed { .. } => {
                Some("Check udev rules / permissions for the hidraw device")
            }
            Self::UnknownModel { .. } => Some("Only Stream Deck XL, + and Pedal are supported"),
            Self::ConfigNotFound { .. } => Some("Create the file or drop --config"),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using SdError.
pub type Result<T> = std::result::Result<T, SdError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| SdError::Other(format!("{}: {e}", f().into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let missing = SdError::NotFound {
            key: "instances.a".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_transient());
        assert!(missing.is_retryable());

        let conflict = SdError::AlreadyExists {
            key: "instances.a".to_string(),
        };
        assert!(conflict.is_conflict());

        assert!(SdError::StoreUnavailable("down".to_string()).is_transient());
        assert!(
            !SdError::DeviceOpenFailed {
                serial: "A".to_string(),
                reason: "busy".to_string()
            }
            .is_retryable()
        );
        assert!(
            SdError::UnknownModel {
                vendor_id: 0x0fd9,
                product_id: 0x0001
            }
            .is_fatal_for_device()
        );
    }

    #[test]
    fn test_unknown_model_message_is_hex() {
        let err = SdError::UnknownModel {
            vendor_id: 0x0fd9,
            product_id: 0x006c,
        };
        assert_eq!(
            err.to_string(),
            "Unknown device model for vendor 0x0fd9 product 0x006c"
        );
    }

    #[test]
    fn test_with_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("boom"));
        let err = result.with_context(|| "reading instance id").unwrap_err();
        assert_eq!(err.to_string(), "reading instance id: boom");
    }
}
