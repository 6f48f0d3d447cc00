pub mod irq;
pub mod raw;
pub mod spi;
pub mod sx127x;
pub mod traits;

pub use irq::{Dio, InterruptTimes};
pub use raw::{PollStatus, RawRadio};
pub use spi::{SpiBus, SpiError};
pub use sx127x::{OpMode, RadioError, SX127x};
pub use traits::{Bandwidth, CodingRate, ModemConfig, RegisterBus, SpreadingFactor};
