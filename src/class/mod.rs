//! LoRaWAN device class implementations
//!
//! Only Class A is provided: every downlink opportunity follows an uplink,
//! in up to two receive windows.

/// Class A send/receive cycle
pub mod class_a;

pub use class_a::{CycleReport, DiscardReason, Downlink};
