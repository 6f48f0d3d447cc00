use super::region::{DataRate, RX2_DATA_RATE, RX2_FREQUENCY, UPLINK_DATA_RATE};
use crate::radio::traits::{symbol_time_us, Bandwidth, SpreadingFactor};

/// Widest symbol timeout the modem accepts (10-bit field)
pub const MAX_WINDOW_SYMBOLS: u16 = 0x3FF;

/// Downlink receive window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxWindow {
    /// First window, on the uplink channel
    Rx1,
    /// Second window, fixed frequency and data rate
    Rx2,
}

/// Radio settings of one receive window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxWindowParams {
    /// Listening frequency in Hz
    pub frequency: u32,
    /// Data rate to demodulate
    pub data_rate: DataRate,
    /// Delay after TX completion in seconds
    pub delay_s: u8,
}

impl RxWindow {
    /// Settings of this window after an uplink on `uplink_frequency`
    pub fn params(self, uplink_frequency: u32, rx1_delay: u8) -> RxWindowParams {
        match self {
            RxWindow::Rx1 => RxWindowParams {
                frequency: uplink_frequency,
                data_rate: UPLINK_DATA_RATE,
                delay_s: rx1_delay,
            },
            // Same delay as RX1; the SF12 offset places it after RX1 closes.
            RxWindow::Rx2 => RxWindowParams {
                frequency: RX2_FREQUENCY,
                data_rate: RX2_DATA_RATE,
                delay_s: rx1_delay,
            },
        }
    }
}

/// When to open a receive window and how long to listen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxTimings {
    /// Tick at which the radio enters single receive
    pub target: u32,
    /// Symbol timeout register value
    pub window_symbols: u16,
}

/// Derive the opening tick and symbol timeout of a receive window.
///
/// The window spans two symbols plus twice the worst-case clock error
/// accumulated over `delay_s`, and opens four symbols after the nominal start
/// minus half that error, so at least four preamble symbols remain to lock on.
///
/// # Arguments
/// * `tx_ticks` - Tick of the TX-done interrupt
/// * `delay_s` - Window delay in seconds
/// * `tick_frequency` - Precision tick rate in Hz
/// * `drift_us_per_s` - Tick drift budget
pub fn calculate_rx_timings(
    bandwidth: Bandwidth,
    spreading_factor: SpreadingFactor,
    tx_ticks: u32,
    delay_s: u8,
    tick_frequency: u32,
    drift_us_per_s: u32,
) -> RxTimings {
    let symbol_us = i64::from(symbol_time_us(bandwidth, spreading_factor));
    let error_us = i64::from(drift_us_per_s) * i64::from(delay_s);

    let window_us = 2 * symbol_us + 2 * error_us;
    let offset_us = 4 * symbol_us - error_us / 2;
    let offset_ticks = offset_us * i64::from(tick_frequency) / 1_000_000;

    let delay_ticks = u64::from(tick_frequency) * u64::from(delay_s);
    let target = tx_ticks
        .wrapping_add(delay_ticks as u32)
        .wrapping_add(offset_ticks as i32 as u32);

    let symbols = window_us / symbol_us;
    debug_assert!(
        symbols <= i64::from(MAX_WINDOW_SYMBOLS),
        "receive window exceeds the symbol timeout field"
    );
    let window_symbols = symbols.min(i64::from(MAX_WINDOW_SYMBOLS)) as u16;

    RxTimings {
        target,
        window_symbols,
    }
}
