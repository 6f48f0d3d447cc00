//! LoRaWAN Class A style MAC driver for RFM95 / SX127x transceivers
//!
//! This crate drives an SX127x-family LoRa chip over SPI and implements a
//! lightweight ABP LoRaWAN MAC on top of it: unconfirmed uplinks, RX1/RX2
//! downlink windows scheduled from a precision tick, session-key encryption
//! and MIC, downlink MAC commands, and persisted frame counters.
//!
//! # Features
//! - Register and mode layer for the SX1276/RFM95 (`radio::sx127x`)
//! - Frame codec with AES-CTR payload encryption and AES-CMAC MIC
//! - Drift-aware RX window timing
//! - EU868 channel plan with random channel selection
//! - A polled raw LoRa profile without MAC framing (`radio::raw`)
//! - Optional `defmt` logging
//!
//! # Example
//! ```no_run
//! use rfm95_lorawan::{
//!     config::{AESKey, DevAddr, DeviceConfig},
//!     device::Device,
//!     platform::Platform,
//!     radio::{InterruptTimes, RegisterBus},
//! };
//!
//! static IRQ: InterruptTimes = InterruptTimes::new();
//!
//! # struct Bus;
//! # impl RegisterBus for Bus {
//! #     type Error = ();
//! #     fn read(&mut self, _: u8, _: &mut [u8]) -> Result<(), ()> { Ok(()) }
//! #     fn write(&mut self, _: u8, _: &[u8]) -> Result<(), ()> { Ok(()) }
//! # }
//! # struct Board;
//! # impl Platform for Board {
//! #     fn precision_tick(&mut self) -> u32 { 0 }
//! #     fn sleep_until(&mut self, _: u32) {}
//! #     fn random_int(&mut self, _: u32) -> u32 { 0 }
//! # }
//! # let (bus, board) = (Bus, Board);
//! let config = DeviceConfig::new_abp(
//!     DevAddr::new([0x26, 0x01, 0x1B, 0xDA]),
//!     AESKey::new([0x00; 16]), // NwkSKey
//!     AESKey::new([0x00; 16]), // AppSKey
//! );
//!
//! let mut device = Device::new(bus, board, &IRQ, config);
//! device.init().unwrap();
//!
//! // DIO edge handlers call `IRQ.on_interrupt(Dio::Dio0, tick)` etc.
//! let _report = device.send_receive_cycle(1, b"Hello, LoRaWAN!").unwrap();
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
mod fmt;

/// Device class implementations
pub mod class;

/// Device and network configuration
pub mod config;

/// Cryptographic functions
pub mod crypto;

/// High-level device interface
pub mod device;

/// LoRaWAN protocol implementation
pub mod lorawan;

/// Host services required by the driver
pub mod platform;

/// Radio hardware abstraction layer
pub mod radio;

pub use class::{CycleReport, Downlink};
pub use device::{Device, DeviceError};
pub use platform::Platform;
