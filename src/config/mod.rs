//! Device and session configuration
//!
//! This module contains the types describing a device and the state it
//! persists between cycles:
//! - Device address and session keys
//! - Receive mode, tick source and wait bounds
//! - Frame counters, RX1 delay and channel plan

/// Device configuration and persistent state
pub mod device;

pub use device::{
    AESKey, ChannelConfig, DevAddr, DeviceConfig, PersistentConfig, ReceiveMode, Timeouts,
};
