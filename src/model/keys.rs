//! Key paths of the shared namespace.
//!
//! ```text
//! instances.<i>.devices.<d>                                  device record
//! instances.<i>.devices.<d>.profiles.<p>                     profile record
//! instances.<i>.devices.<d>.profiles.current                 {id}
//! ....profiles.<p>.pages.<g>                                 page record
//! ....profiles.<p>.pages.current                             {id}
//! ....pages.<g>.<segment>.<slot>                             button record
//! ....pages.<g>.<segment>.<slot>.buffer                      rendered bytes
//! ```
//!
//! `<segment>` is `buttons` for keyed panels and `switches` for the pedal.

use crate::store::DELIMITER;

pub const INSTANCES: &str = "instances";
pub const CURRENT: &str = "current";
pub const BUFFER: &str = "buffer";

/// `instances.`
pub fn instances_prefix() -> String {
    format!("{INSTANCES}{DELIMITER}")
}

/// `instances.<i>.devices.`
pub fn devices_prefix(instance_id: &str) -> String {
    format!("{INSTANCES}.{instance_id}.devices.")
}

/// Rendered buffer key for a button key.
pub fn buffer_key(slot_key: &str) -> String {
    format!("{slot_key}.{BUFFER}")
}

/// Slot id of a `...<segment>.<slot>.buffer` key.
pub fn slot_from_buffer_key(key: &str) -> Option<usize> {
    let mut tokens = key.rsplit(DELIMITER);
    if tokens.next()? != BUFFER {
        return None;
    }
    tokens.next()?.parse().ok()
}

/// Slot id of a `...<segment>.<slot>` key.
pub fn slot_from_slot_key(key: &str) -> Option<usize> {
    key.rsplit(DELIMITER).next()?.parse().ok()
}

/// Direct child id of `prefix` (which ends in the delimiter).
///
/// `None` for nested keys and for the `current` pointer.
pub fn child_id<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || rest.contains(DELIMITER) || rest == CURRENT {
        return None;
    }
    Some(rest)
}

/// Key builder scoped to one device of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub instance_id: String,
    pub device_id: String,
}

impl DeviceKey {
    pub fn new(instance_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            device_id: device_id.into(),
        }
    }

    /// The device record.
    pub fn record(&self) -> String {
        format!("{INSTANCES}.{}.devices.{}", self.instance_id, self.device_id)
    }

    pub fn profiles_prefix(&self) -> String {
        format!("{}.profiles.", self.record())
    }

    pub fn profile(&self, profile_id: &str) -> String {
        format!("{}{profile_id}", self.profiles_prefix())
    }

    pub fn current_profile(&self) -> String {
        self.profile(CURRENT)
    }

    pub fn pages_prefix(&self, profile_id: &str) -> String {
        format!("{}.pages.", self.profile(profile_id))
    }

    pub fn page(&self, profile_id: &str, page_id: &str) -> String {
        format!("{}{page_id}", self.pages_prefix(profile_id))
    }

    pub fn current_page(&self, profile_id: &str) -> String {
        self.page(profile_id, CURRENT)
    }

    pub fn slots_prefix(&self, profile_id: &str, page_id: &str, segment: &str) -> String {
        format!("{}.{segment}.", self.page(profile_id, page_id))
    }

    pub fn slot(&self, profile_id: &str, page_id: &str, segment: &str, slot: usize) -> String {
        format!("{}{slot}", self.slots_prefix(profile_id, page_id, segment))
    }

    /// Rendered buffers of one page.
    pub fn buffer_pattern(&self, profile_id: &str, page_id: &str, segment: &str) -> String {
        format!("{}*.{BUFFER}", self.slots_prefix(profile_id, page_id, segment))
    }

    /// Button records of every profile and page of this device.
    pub fn slot_pattern(&self, segment: &str) -> String {
        format!("{}*.pages.*.{segment}.*", self.profiles_prefix())
    }

    /// Bus topic for a dial event (1-based dial).
    pub fn dial_topic(&self, dial: usize) -> String {
        format!("{}.dials.{dial}", self.record())
    }

    /// Bus topic for touch strip events.
    pub fn touch_topic(&self) -> String {
        format!("{}.touch", self.record())
    }
}

/// Key builder scoped to one page of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageScope {
    pub device: DeviceKey,
    pub profile_id: String,
    pub page_id: String,
    pub segment: &'static str,
}

impl PageScope {
    pub fn new(
        device: DeviceKey,
        profile_id: impl Into<String>,
        page_id: impl Into<String>,
        segment: &'static str,
    ) -> Self {
        Self {
            device,
            profile_id: profile_id.into(),
            page_id: page_id.into(),
            segment,
        }
    }

    /// The page record.
    pub fn page(&self) -> String {
        self.device.page(&self.profile_id, &self.page_id)
    }

    pub fn slots_prefix(&self) -> String {
        self.device
            .slots_prefix(&self.profile_id, &self.page_id, self.segment)
    }

    pub fn slot(&self, slot: usize) -> String {
        self.device
            .slot(&self.profile_id, &self.page_id, self.segment, slot)
    }

    pub fn buffer(&self, slot: usize) -> String {
        buffer_key(&self.slot(slot))
    }

    pub fn buffer_pattern(&self) -> String {
        self.device
            .buffer_pattern(&self.profile_id, &self.page_id, self.segment)
    }
}
