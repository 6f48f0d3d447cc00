//! DIO edge timestamps shared between the interrupt handler and the driver.
//!
//! Each slot is written by exactly one producer (the edge handler of that DIO
//! line) and consumed by the main line. The handler stores the tick before
//! raising the fired flag with release ordering; the consumer observes the
//! flag with acquire ordering before reading the tick, and clears the flag
//! itself before arming a new wait.

use core::convert::Infallible;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// DIO lines the driver waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dio {
    /// TX done / RX done
    Dio0 = 0,
    /// RX timeout
    Dio1 = 1,
    /// Mode ready
    Dio5 = 2,
}

impl Dio {
    /// All lines, in slot order
    pub const ALL: [Dio; 3] = [Dio::Dio0, Dio::Dio1, Dio::Dio5];
}

/// Tick captured at the last edge of each DIO line
pub struct InterruptTimes {
    ticks: [AtomicU32; 3],
    fired: [AtomicBool; 3],
}

impl InterruptTimes {
    /// Empty slots; usable in a `static`
    pub const fn new() -> Self {
        Self {
            ticks: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            fired: [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    /// Record an edge. Call from the GPIO/EXTI handler with the current
    /// precision tick.
    pub fn on_interrupt(&self, dio: Dio, tick: u32) {
        self.ticks[dio as usize].store(tick, Ordering::Relaxed);
        self.fired[dio as usize].store(true, Ordering::Release);
    }

    /// Forget the last edge of `dio`
    pub fn clear(&self, dio: Dio) {
        self.fired[dio as usize].store(false, Ordering::Release);
    }

    /// Forget the last edge of every line
    pub fn clear_all(&self) {
        for dio in Dio::ALL {
            self.clear(dio);
        }
    }

    /// Tick of the last edge, `WouldBlock` while none was recorded
    pub fn poll(&self, dio: Dio) -> nb::Result<u32, Infallible> {
        if self.fired[dio as usize].load(Ordering::Acquire) {
            Ok(self.ticks[dio as usize].load(Ordering::Relaxed))
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Tick of the last edge, if any
    pub fn time(&self, dio: Dio) -> Option<u32> {
        self.poll(dio).ok()
    }
}

impl Default for InterruptTimes {
    fn default() -> Self {
        Self::new()
    }
}
