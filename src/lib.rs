//! Stream Deck sync library.
//!
//! Keeps Elgato Stream Deck panels attached to this host in sync with a
//! hierarchical key-value store shared by cooperating instances, and turns
//! button presses into action events on a message bus.
//!
//! # Modules
//!
//! - `codec`: HID report decoding and image frame encoding
//! - `store`: key-value store client with replay-then-stream watches
//! - `model`: instance → device → profile → page → button records
//! - `device`: model classification, HID and mock device access
//! - `lifecycle`: connect/disconnect detection
//! - `engine`: per-device sync tasks
//! - `manager`: one engine per connected device
//! - `bus` / `actions`: action event publishing
#![forbid(unsafe_code)]

pub mod actions;
pub mod bus;
pub mod cli;
pub mod codec;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod model;
pub mod render;
pub mod store;
