//! Hierarchy model: instances → devices → profiles → pages → buttons.

mod hierarchy;
pub mod keys;
mod records;

pub(crate) use hierarchy::decode;
pub use hierarchy::{CascadeReport, Hierarchy, PageTemplate};
pub use keys::{DeviceKey, PageScope};
pub use records::{
    ButtonRecord, ButtonState, CurrentPointer, DeviceRecord, DeviceStatus, PageRecord, PageRef,
    ProfileRecord, TouchMode, TouchScreenLayout, UNASSIGNED_ACTION,
};
