//! LoRaWAN protocol implementation
//!
//! This module contains the data-frame side of the protocol:
//! - Frame codec (MHDR/FHDR, encryption, MIC)
//! - Downlink MAC command processing
//! - Receive window timing
//! - EU868 regional parameters and channel selection

/// MAC command handling
pub mod commands;

/// PHY payload framing
pub mod mac;

/// Receive window timing
pub mod phy;

/// Regional parameters and configurations
pub mod region;

pub use commands::{process_mac_commands, CommandError, MacCommand, MacResponse};
pub use mac::{decode_phy_payload, encode_phy_payload, DecodedFrame, FrameError, PhyPayload};
pub use phy::{calculate_rx_timings, RxTimings, RxWindow};
pub use region::{select_random_channel, DataRate};
