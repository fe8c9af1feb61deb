//! Device model classification and per-model capabilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SdError;

/// Elgato's USB vendor id.
pub const ELGATO_VENDOR_ID: u16 = 0x0fd9;

pub const PRODUCT_ID_XL: u16 = 0x006c;
pub const PRODUCT_ID_PLUS: u16 = 0x0084;
pub const PRODUCT_ID_PEDAL: u16 = 0x0086;

/// Supported Stream Deck device models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    /// Stream Deck XL (32 keys, 8x4)
    Xl,
    /// Stream Deck + (8 keys + LCD strip + dials)
    Plus,
    /// Stream Deck Pedal (3 switches, no display)
    Pedal,
    #[default]
    Unknown,
}

impl DeviceModel {
    /// Classify a `(vendor, product)` pair.
    pub const fn classify(vendor_id: u16, product_id: u16) -> Self {
        if vendor_id != ELGATO_VENDOR_ID {
            return Self::Unknown;
        }
        match product_id {
            PRODUCT_ID_XL => Self::Xl,
            PRODUCT_ID_PLUS => Self::Plus,
            PRODUCT_ID_PEDAL => Self::Pedal,
            _ => Self::Unknown,
        }
    }

    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Stored `type` string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xl => "xl",
            Self::Plus => "plus",
            Self::Pedal => "pedal",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Xl => "Stream Deck XL",
            Self::Plus => "Stream Deck +",
            Self::Pedal => "Stream Deck Pedal",
            Self::Unknown => "Unknown device",
        }
    }

    /// Returns the capability descriptor that parameterizes the sync engine.
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Xl => Capabilities {
                slot_count: 32,
                key_size: 96,
                rotate_180: true,
                dials: 0,
                touch_strip: None,
                segment: "buttons",
            },
            Self::Plus => Capabilities {
                slot_count: 8,
                key_size: 120,
                rotate_180: false,
                dials: 4,
                touch_strip: Some((800, 100)),
                segment: "buttons",
            },
            Self::Pedal => Capabilities {
                slot_count: 3,
                key_size: 0,
                rotate_180: false,
                dials: 0,
                touch_strip: None,
                segment: "switches",
            },
            Self::Unknown => Capabilities {
                slot_count: 0,
                key_size: 0,
                rotate_180: false,
                dials: 0,
                touch_strip: None,
                segment: "buttons",
            },
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceModel {
    type Err = SdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xl" => Ok(Self::Xl),
            "plus" => Ok(Self::Plus),
            "pedal" => Ok(Self::Pedal),
            "unknown" => Ok(Self::Unknown),
            other => Err(SdError::Other(format!("Unknown device type '{other}'"))),
        }
    }
}

/// What a device model can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Number of 1-based input slots (keys or switches).
    pub slot_count: usize,
    /// Square key image edge in pixels; 0 means no display.
    pub key_size: u32,
    /// Key images must be rotated 180° before upload.
    pub rotate_180: bool,
    pub dials: usize,
    /// Touch strip `(width, height)` in pixels.
    pub touch_strip: Option<(u32, u32)>,
    /// Key path segment under a page: `buttons` or `switches`.
    pub segment: &'static str,
}

impl Capabilities {
    pub const fn has_display(&self) -> bool {
        self.key_size > 0
    }

    /// 1-based slot ids.
    pub fn slots(&self) -> impl Iterator<Item = usize> {
        1..=self.slot_count
    }
}

/// A device seen during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DiscoveredDevice {
    pub serial: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DiscoveredDevice {
    pub fn new(serial: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            serial: serial.into(),
            vendor_id,
            product_id,
        }
    }

    pub const fn model(&self) -> DeviceModel {
        DeviceModel::classify(self.vendor_id, self.product_id)
    }
}

/// Connection retry options for opening devices.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Maximum number of open attempts (default: 3).
    pub max_retries: u32,
    /// Initial delay between retries (default: 250ms).
    pub retry_delay: std::time::Duration,
    /// Exponential backoff factor (default: 2.0).
    pub backoff_factor: f32,
    /// Maximum delay cap (default: 2000ms).
    pub max_delay: std::time::Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        use std::time::Duration;
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(2000),
        }
    }
}
