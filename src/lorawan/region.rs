use crate::config::device::MAX_CHANNELS;
use crate::radio::traits::{Bandwidth, SpreadingFactor};

/// Fixed RX2 frequency in Hz
pub const RX2_FREQUENCY: u32 = 869_525_000;

/// Data rate used for uplinks and RX1
pub const UPLINK_DATA_RATE: DataRate = DataRate::DR5;

/// Data rate of the RX2 window
pub const RX2_DATA_RATE: DataRate = DataRate::DR0;

/// EU868 data rate identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRate {
    /// SF12 / 125 kHz
    DR0 = 0,
    /// SF11 / 125 kHz
    DR1 = 1,
    /// SF10 / 125 kHz
    DR2 = 2,
    /// SF9 / 125 kHz
    DR3 = 3,
    /// SF8 / 125 kHz
    DR4 = 4,
    /// SF7 / 125 kHz
    DR5 = 5,
    /// SF7 / 250 kHz
    DR6 = 6,
}

impl DataRate {
    /// Get spreading factor
    pub fn spreading_factor(&self) -> SpreadingFactor {
        match self {
            DataRate::DR0 => SpreadingFactor::Sf12,
            DataRate::DR1 => SpreadingFactor::Sf11,
            DataRate::DR2 => SpreadingFactor::Sf10,
            DataRate::DR3 => SpreadingFactor::Sf9,
            DataRate::DR4 => SpreadingFactor::Sf8,
            DataRate::DR5 | DataRate::DR6 => SpreadingFactor::Sf7,
        }
    }

    /// Get bandwidth
    pub fn bandwidth(&self) -> Bandwidth {
        match self {
            DataRate::DR6 => Bandwidth::Bw250,
            _ => Bandwidth::Bw125,
        }
    }

    /// Whether `min..=max` (raw DR indices) includes this data rate
    pub fn within(&self, min: u8, max: u8) -> bool {
        (min..=max).contains(&(*self as u8))
    }
}

/// Pick one of the enabled channels of `channel_mask` uniformly at random.
///
/// `random_int(n)` must return a value in `0..n`; out-of-range draws fall back
/// to the first enabled channel. Returns `None` when no channel is enabled.
pub fn select_random_channel(channel_mask: u16, random_int: impl FnOnce(u32) -> u32) -> Option<u8> {
    let channel_count = channel_mask.count_ones();
    if channel_count == 0 {
        return None;
    }

    let mut draw = random_int(channel_count);
    if draw >= channel_count {
        draw = 0;
    }

    for index in 0..MAX_CHANNELS as u8 {
        if channel_mask & (1 << index) != 0 {
            if draw == 0 {
                return Some(index);
            }
            draw -= 1;
        }
    }

    None
}
