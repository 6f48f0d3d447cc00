/// Register transport to the transceiver.
///
/// `header` is the register address byte with the write flag (bit 7) already
/// applied by the caller. Implementations keep chip select asserted for the
/// header and the whole data phase, so multi-byte transfers on the FIFO
/// register stream through the chip's FIFO pointer.
pub trait RegisterBus {
    /// Error type for bus transfers
    type Error;

    /// Send `header`, then clock `buf.len()` bytes in from the chip
    fn read(&mut self, header: u8, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Send `header`, then clock `data` out to the chip
    fn write(&mut self, header: u8, data: &[u8]) -> Result<(), Self::Error>;
}

/// LoRa signal bandwidth (MODEM_CONFIG_1 bits 7:4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bandwidth {
    /// 7.8 kHz
    Bw7_8 = 0,
    /// 10.4 kHz
    Bw10_4 = 1,
    /// 15.6 kHz
    Bw15_6 = 2,
    /// 20.8 kHz
    Bw20_8 = 3,
    /// 31.25 kHz
    Bw31_25 = 4,
    /// 41.7 kHz
    Bw41_7 = 5,
    /// 62.5 kHz
    Bw62_5 = 6,
    /// 125 kHz
    Bw125 = 7,
    /// 250 kHz
    Bw250 = 8,
    /// 500 kHz
    Bw500 = 9,
}

impl Bandwidth {
    /// Bandwidth in Hz
    pub fn hz(self) -> u32 {
        match self {
            Bandwidth::Bw7_8 => 7_800,
            Bandwidth::Bw10_4 => 10_400,
            Bandwidth::Bw15_6 => 15_600,
            Bandwidth::Bw20_8 => 20_800,
            Bandwidth::Bw31_25 => 31_250,
            Bandwidth::Bw41_7 => 41_700,
            Bandwidth::Bw62_5 => 62_500,
            Bandwidth::Bw125 => 125_000,
            Bandwidth::Bw250 => 250_000,
            Bandwidth::Bw500 => 500_000,
        }
    }
}

/// Forward error correction rate (MODEM_CONFIG_1 bits 3:1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodingRate {
    /// 4/5
    Cr4_5 = 1,
    /// 4/6
    Cr4_6 = 2,
    /// 4/7
    Cr4_7 = 3,
    /// 4/8
    Cr4_8 = 4,
}

/// Spreading factor (MODEM_CONFIG_2 bits 7:4).
///
/// SF6 needs implicit header mode, which this driver does not use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpreadingFactor {
    /// 128 chips/symbol
    Sf7 = 7,
    /// 256 chips/symbol
    Sf8 = 8,
    /// 512 chips/symbol
    Sf9 = 9,
    /// 1024 chips/symbol
    Sf10 = 10,
    /// 2048 chips/symbol
    Sf11 = 11,
    /// 4096 chips/symbol
    Sf12 = 12,
}

impl SpreadingFactor {
    /// Chips per symbol, `2^SF`
    pub fn chips(self) -> u32 {
        1 << (self as u32)
    }
}

/// Symbol duration in microseconds, `2^SF * 1e6 / BW`
pub fn symbol_time_us(bandwidth: Bandwidth, spreading_factor: SpreadingFactor) -> u32 {
    (u64::from(spreading_factor.chips()) * 1_000_000 / u64::from(bandwidth.hz())) as u32
}

/// Modem parameters written by [`SX127x::configure_modem`](super::sx127x::SX127x::configure_modem)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemConfig {
    /// Bandwidth
    pub bandwidth: Bandwidth,
    /// Coding rate
    pub coding_rate: CodingRate,
    /// Spreading factor
    pub spreading_factor: SpreadingFactor,
    /// Append/check payload CRC
    pub crc: bool,
    /// RX single timeout in symbols (10 bits); `None` leaves the LSB register alone
    pub symbol_timeout: Option<u16>,
}

impl ModemConfig {
    /// Explicit header LoRa with CRC and no symbol timeout
    pub fn new(bandwidth: Bandwidth, coding_rate: CodingRate, spreading_factor: SpreadingFactor) -> Self {
        Self {
            bandwidth,
            coding_rate,
            spreading_factor,
            crc: true,
            symbol_timeout: None,
        }
    }

    /// Set the RX single timeout in symbols
    pub fn with_symbol_timeout(mut self, symbols: u16) -> Self {
        self.symbol_timeout = Some(symbols);
        self
    }

    /// Whether low data rate optimisation is mandatory (symbols longer than 16 ms)
    pub fn low_data_rate_optimize(&self) -> bool {
        symbol_time_us(self.bandwidth, self.spreading_factor) > 16_000
    }
}
