//! Serialized records stored under the hierarchy keys.
//!
//! Field names are camelCase JSON; unknown fields are ignored and missing
//! fields take their defaults so records written by other tools still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::device::DeviceModel;

/// Connection status of a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    #[default]
    Disconnected,
    #[serde(other)]
    Unknown,
}

/// `instances.<i>.devices.<d>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceRecord {
    pub id: String,
    pub instance: String,
    #[serde(rename = "type", alias = "model")]
    pub model: DeviceModel,
    pub status: DeviceStatus,
    pub current_profile: String,
    #[serde(alias = "created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "updated_at", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Reference to a page inside a profile's ordered page list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PageRef {
    pub id: String,
}

/// How the touch strip of a profile is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchMode {
    /// One image across the whole strip.
    Full,
    /// One image per dial segment.
    Segments,
    /// Anything else draws black.
    Blank,
}

/// Touch strip layout descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TouchScreenLayout {
    pub mode: String,
    pub full_image: String,
    pub segments: [String; 4],
}

impl TouchScreenLayout {
    pub fn mode(&self) -> TouchMode {
        match self.mode.as_str() {
            "full" => TouchMode::Full,
            "segments" => TouchMode::Segments,
            _ => TouchMode::Blank,
        }
    }
}

/// `...profiles.<p>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileRecord {
    pub id: String,
    pub name: String,
    pub pages: Vec<PageRef>,
    pub current_page: String,
    pub touch_screen: TouchScreenLayout,
}

impl ProfileRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn has_page(&self, page_id: &str) -> bool {
        self.pages.iter().any(|p| p.id == page_id)
    }
}

/// `...pages.<g>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PageRecord {
    pub id: String,
}

/// `...profiles.current` and `...pages.current`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CurrentPointer {
    pub id: String,
}

impl CurrentPointer {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// One visual state of a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonState {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub image_path: String,
}

/// Action reference marking a slot as explicitly unassigned.
pub const UNASSIGNED_ACTION: &str = "none";

/// `...pages.<g>.<segment>.<slot>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonRecord {
    pub id: String,
    /// Action reference; empty means unassigned.
    pub uuid: String,
    pub settings: Value,
    pub states: Vec<ButtonState>,
    #[serde(deserialize_with = "string_or_number")]
    pub state: String,
    pub title: String,
}

impl Default for ButtonRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            uuid: String::new(),
            settings: Value::Object(serde_json::Map::new()),
            states: Vec::new(),
            state: String::new(),
            title: String::new(),
        }
    }
}

impl ButtonRecord {
    /// An unassigned button with one state showing `image_path`.
    pub fn unassigned(slot: usize, image_path: impl Into<String>) -> Self {
        Self {
            id: slot.to_string(),
            states: vec![ButtonState {
                id: "0".to_string(),
                image_path: image_path.into(),
            }],
            state: "0".to_string(),
            ..Self::default()
        }
    }

    /// True when pressing the button should dispatch an action.
    pub fn is_assigned(&self) -> bool {
        let uuid = self.uuid.trim();
        !uuid.is_empty() && uuid != UNASSIGNED_ACTION
    }

    /// Image of the selected state, falling back to the first state.
    pub fn active_image(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|s| s.id == self.state)
            .or_else(|| self.states.first())
            .map(|s| s.image_path.as_str())
            .filter(|path| !path.is_empty())
    }
}

/// Accept `"1"` or `1` for ids written by loosely typed clients.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
