//! Platform services the driver depends on but does not implement.

use crate::config::PersistentConfig;

/// Tick source, scheduler, entropy and storage of the host.
///
/// Only the first three methods are mandatory; the rest default to "absent".
pub trait Platform {
    /// Free-running counter at `DeviceConfig::precision_tick_frequency` Hz.
    /// Wraps at `u32::MAX`.
    fn precision_tick(&mut self) -> u32;

    /// Block until the counter reaches `tick`, accurate to within the
    /// configured drift budget.
    fn sleep_until(&mut self, tick: u32);

    /// Uniform integer in `0..max_exclusive`
    fn random_int(&mut self, max_exclusive: u32) -> u32;

    /// Battery level for DevStatusAns: 0 external power, 1..=254 level,
    /// 255 unknown.
    fn battery_level(&mut self) -> u8 {
        0xFF
    }

    /// Load the persisted state into `config`; `false` when nothing usable was
    /// found.
    fn reload_config(&mut self, _config: &mut PersistentConfig) -> bool {
        false
    }

    /// Persist `config`
    fn save_config(&mut self, _config: &PersistentConfig) {}

    /// Called once the chip's DIO routing is set up, so host edge interrupts
    /// can be enabled without catching the DIO5 clock output.
    fn on_after_interrupts_configured(&mut self) {}
}
