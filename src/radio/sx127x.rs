use crate::radio::traits::{ModemConfig, RegisterBus};

// SX127x Register Map (LoRa mode)
pub(crate) const REG_FIFO: u8 = 0x00;
pub(crate) const REG_OP_MODE: u8 = 0x01;
pub(crate) const REG_FRF_MSB: u8 = 0x06;
pub(crate) const REG_FRF_MID: u8 = 0x07;
pub(crate) const REG_FRF_LSB: u8 = 0x08;
pub(crate) const REG_PA_CONFIG: u8 = 0x09;
pub(crate) const REG_LNA: u8 = 0x0C;
pub(crate) const REG_FIFO_ADDR_PTR: u8 = 0x0D;
pub(crate) const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
pub(crate) const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
pub(crate) const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub(crate) const REG_IRQ_FLAGS: u8 = 0x12;
pub(crate) const REG_RX_NB_BYTES: u8 = 0x13;
pub(crate) const REG_PKT_SNR_VALUE: u8 = 0x19;
pub(crate) const REG_PKT_RSSI_VALUE: u8 = 0x1A;
pub(crate) const REG_MODEM_CONFIG_1: u8 = 0x1D;
pub(crate) const REG_MODEM_CONFIG_2: u8 = 0x1E;
pub(crate) const REG_SYMB_TIMEOUT_LSB: u8 = 0x1F;
pub(crate) const REG_PREAMBLE_MSB: u8 = 0x20;
pub(crate) const REG_PREAMBLE_LSB: u8 = 0x21;
pub(crate) const REG_PAYLOAD_LENGTH: u8 = 0x22;
pub(crate) const REG_MAX_PAYLOAD_LENGTH: u8 = 0x23;
pub(crate) const REG_MODEM_CONFIG_3: u8 = 0x26;
pub(crate) const REG_INVERT_IQ_1: u8 = 0x33;
pub(crate) const REG_SYNC_WORD: u8 = 0x39;
pub(crate) const REG_INVERT_IQ_2: u8 = 0x3B;
pub(crate) const REG_DIO_MAPPING_1: u8 = 0x40;
pub(crate) const REG_VERSION: u8 = 0x42;
pub(crate) const REG_PA_DAC: u8 = 0x4D;

/// Address flag selecting a register write
pub(crate) const WRITE_FLAG: u8 = 0x80;

/// REG_VERSION of an RFM95 / SX1276
pub const CHIP_VERSION: u8 = 0x12;

// Operating Mode bits
const MODE_LONG_RANGE_MODE: u8 = 0x80;
const MODE_MASK: u8 = 0x07;

// PA config byte: bit 7 PA select, bits 6:4 max power, bits 3:0 output power
const PA_SELECT_SHIFT: u8 = 7;
const PA_MAX_POWER_SHIFT: u8 = 4;
const PA_MAX_POWER_MASK: u8 = 0x07;
const PA_OUTPUT_POWER_MASK: u8 = 0x0F;
const PA_DAC_LOW_POWER: u8 = 0x84;
const PA_DAC_HIGH_POWER: u8 = 0x87;

// IRQ Flags
pub(crate) const IRQ_RX_DONE_MASK: u8 = 0x40;
pub(crate) const IRQ_PAYLOAD_CRC_ERROR_MASK: u8 = 0x20;
pub(crate) const IRQ_TX_DONE_MASK: u8 = 0x08;

// MODEM_CONFIG_3
const AGC_AUTO_ON: u8 = 0x04;
const LOW_DATA_RATE_OPTIMIZE: u8 = 0x08;

/// FIFO offset used for outgoing frames
pub(crate) const FIFO_TX_BASE: u8 = 0x80;
/// FIFO offset used for incoming frames
pub(crate) const FIFO_RX_BASE: u8 = 0x00;
/// Largest frame this driver moves through the FIFO
pub const FIFO_SIZE: usize = 64;

/// Transceiver operating mode (REG_OP_MODE bits 2:0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpMode {
    /// Lowest power, FIFO not accessible
    Sleep = 0x00,
    /// Oscillator running
    Standby = 0x01,
    /// Frequency synthesis for TX
    FsTx = 0x02,
    /// Transmit the FIFO content
    Tx = 0x03,
    /// Frequency synthesis for RX
    FsRx = 0x04,
    /// Receive until told otherwise
    RxContinuous = 0x05,
    /// Receive one packet or time out
    RxSingle = 0x06,
    /// Channel activity detection
    Cad = 0x07,
}

impl OpMode {
    fn from_bits(bits: u8) -> Self {
        match bits & MODE_MASK {
            0x00 => OpMode::Sleep,
            0x01 => OpMode::Standby,
            0x02 => OpMode::FsTx,
            0x03 => OpMode::Tx,
            0x04 => OpMode::FsRx,
            0x05 => OpMode::RxContinuous,
            0x06 => OpMode::RxSingle,
            _ => OpMode::Cad,
        }
    }

    fn is_rx(self) -> bool {
        matches!(self, OpMode::RxContinuous | OpMode::RxSingle)
    }
}

/// DIO0..DIO3 routing written to REG_DIO_MAPPING_1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DioMapping {
    /// DIO0 = RxDone, DIO1 = RxTimeout
    RxDone = 0x00,
    /// DIO0 = TxDone
    TxDone = 0x40,
}

/// IQ polarity per AN1200.24: uplinks normal, downlinks inverted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqMode {
    /// Normal IQ
    Tx,
    /// Inverted IQ
    Rx,
}

/// Possible errors in radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError<E> {
    /// Register transfer failed
    Bus(E),
    /// REG_VERSION did not read [`CHIP_VERSION`]
    Version(u8),
    /// Requested output power is not one the PA can produce
    InvalidPower(i8),
    /// The awaited DIO edge never came
    Timeout(crate::radio::irq::Dio),
}

/// SX127x register and mode layer
pub struct SX127x<B: RegisterBus> {
    bus: B,
    rx_data_valid: bool,
}

impl<B: RegisterBus> SX127x<B> {
    /// Wrap a register bus
    pub fn new(bus: B) -> Self {
        Self { bus, rx_data_valid: false }
    }

    /// Give the bus back
    pub fn release(self) -> B {
        self.bus
    }

    /// Borrow the bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably borrow the bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Read `buf.len()` bytes starting at `addr`
    pub fn read_register(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), RadioError<B::Error>> {
        self.bus.read(addr & !WRITE_FLAG, buf).map_err(RadioError::Bus)
    }

    /// Read a single register
    pub fn read_u8(&mut self, addr: u8) -> Result<u8, RadioError<B::Error>> {
        let mut value = [0u8];
        self.read_register(addr, &mut value)?;
        Ok(value[0])
    }

    /// Write a single register
    pub fn write_register(&mut self, addr: u8, value: u8) -> Result<(), RadioError<B::Error>> {
        self.bus.write(addr | WRITE_FLAG, &[value]).map_err(RadioError::Bus)
    }

    /// Switch operating mode, keeping the LoRa modem selected.
    ///
    /// Entering RX invalidates any previously received packet.
    pub fn set_mode(&mut self, mode: OpMode) -> Result<(), RadioError<B::Error>> {
        trace!("sx127x: mode {}", mode);
        if mode.is_rx() {
            self.rx_data_valid = false;
        }
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE_MODE | mode as u8)
    }

    /// Current operating mode as reported by the chip
    pub fn get_mode(&mut self) -> Result<OpMode, RadioError<B::Error>> {
        Ok(OpMode::from_bits(self.read_u8(REG_OP_MODE)?))
    }

    /// Silicon revision
    pub fn get_version(&mut self) -> Result<u8, RadioError<B::Error>> {
        self.read_u8(REG_VERSION)
    }

    /// Bring the chip from power-on into LoRa sleep with the LoRaWAN defaults.
    ///
    /// `on_interrupts_configured` runs once the DIO routing is in a state where
    /// enabling the host's edge interrupts is safe.
    pub fn init(&mut self, on_interrupts_configured: impl FnOnce()) -> Result<(), RadioError<B::Error>> {
        // Check version
        let version = self.get_version()?;
        if version != CHIP_VERSION {
            return Err(RadioError::Version(version));
        }

        // LoRa mode can only be selected from FSK sleep.
        self.write_register(REG_OP_MODE, OpMode::Sleep as u8)?;
        self.set_mode(OpMode::Sleep)?;

        // Default DIO mapping keeps DIO5 off the 1 MHz ClkOut.
        self.map_dio(DioMapping::RxDone)?;
        on_interrupts_configured();

        self.set_power(17)?;

        // Highest LNA gain, 150% boost
        self.write_register(REG_LNA, 0x23)?;

        // 8 + 4.25 symbol preamble
        self.write_register(REG_PREAMBLE_MSB, 0x00)?;
        self.write_register(REG_PREAMBLE_LSB, 0x08)?;

        // LoRaWAN public sync word
        self.write_register(REG_SYNC_WORD, 0x34)?;

        self.write_register(REG_FIFO_TX_BASE_ADDR, FIFO_TX_BASE)?;
        self.write_register(REG_FIFO_RX_BASE_ADDR, FIFO_RX_BASE)?;
        self.set_max_payload_length(FIFO_SIZE as u8)?;

        self.set_mode(OpMode::Sleep)
    }

    /// Program PA_CONFIG and PA_DAC for `dbm` on the PA_BOOST pin.
    ///
    /// 2..=17 dBm use the default DAC, 20 dBm the +20 dBm boost.
    pub fn set_power(&mut self, dbm: i8) -> Result<(), RadioError<B::Error>> {
        let (output_power, pa_dac) = match dbm {
            2..=17 => ((dbm - 2) as u8, PA_DAC_LOW_POWER),
            20 => (15, PA_DAC_HIGH_POWER),
            _ => return Err(RadioError::InvalidPower(dbm)),
        };

        let pa_config = (1 << PA_SELECT_SHIFT)
            | ((7 & PA_MAX_POWER_MASK) << PA_MAX_POWER_SHIFT)
            | (output_power & PA_OUTPUT_POWER_MASK);

        self.write_register(REG_PA_CONFIG, pa_config)?;
        self.write_register(REG_PA_DAC, pa_dac)
    }

    /// Tune the carrier, `FRF = (Hz << 19) / 32 MHz`
    pub fn configure_frequency(&mut self, hz: u32) -> Result<(), RadioError<B::Error>> {
        let frf = (u64::from(hz) << 19) / 32_000_000;

        self.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.write_register(REG_FRF_LSB, frf as u8)
    }

    /// Write bandwidth, coding rate, spreading factor, CRC and symbol timeout
    pub fn configure_modem(&mut self, config: &ModemConfig) -> Result<(), RadioError<B::Error>> {
        let timeout = config.symbol_timeout.unwrap_or(0) & 0x3FF;

        // Explicit header mode
        let modem_config1 = ((config.bandwidth as u8) << 4) | ((config.coding_rate as u8) << 1);
        let modem_config2 =
            ((config.spreading_factor as u8) << 4) | ((config.crc as u8) << 2) | (timeout >> 8) as u8;
        let mut modem_config3 = AGC_AUTO_ON;
        if config.low_data_rate_optimize() {
            modem_config3 |= LOW_DATA_RATE_OPTIMIZE;
        }

        self.write_register(REG_MODEM_CONFIG_1, modem_config1)?;
        self.write_register(REG_MODEM_CONFIG_2, modem_config2)?;
        self.write_register(REG_MODEM_CONFIG_3, modem_config3)?;

        if config.symbol_timeout.is_some() {
            self.write_register(REG_SYMB_TIMEOUT_LSB, timeout as u8)?;
        }
        Ok(())
    }

    /// Set IQ polarity registers
    pub fn set_iq(&mut self, mode: IqMode) -> Result<(), RadioError<B::Error>> {
        let (iq1, iq2) = match mode {
            IqMode::Tx => (0x27, 0x1D),
            IqMode::Rx => (0x67, 0x19),
        };
        self.write_register(REG_INVERT_IQ_1, iq1)?;
        self.write_register(REG_INVERT_IQ_2, iq2)
    }

    /// Route IRQ sources to the DIO pins
    pub fn map_dio(&mut self, mapping: DioMapping) -> Result<(), RadioError<B::Error>> {
        self.write_register(REG_DIO_MAPPING_1, mapping as u8)
    }

    /// Current IRQ flags
    pub fn irq_flags(&mut self) -> Result<u8, RadioError<B::Error>> {
        self.read_u8(REG_IRQ_FLAGS)
    }

    /// Clear every IRQ flag
    pub fn clear_irq_flags(&mut self) -> Result<(), RadioError<B::Error>> {
        self.write_register(REG_IRQ_FLAGS, 0xFF)
    }

    /// Upper bound on received payload length
    pub fn set_max_payload_length(&mut self, bytes: u8) -> Result<(), RadioError<B::Error>> {
        self.write_register(REG_MAX_PAYLOAD_LENGTH, bytes)
    }

    /// Load `data` into the TX half of the FIFO and set the payload length.
    ///
    /// The FIFO is only accessible outside sleep.
    pub fn write_fifo(&mut self, data: &[u8]) -> Result<(), RadioError<B::Error>> {
        self.write_register(REG_PAYLOAD_LENGTH, data.len() as u8)?;
        self.write_register(REG_FIFO_ADDR_PTR, FIFO_TX_BASE)?;
        self.bus.write(REG_FIFO | WRITE_FLAG, data).map_err(RadioError::Bus)
    }

    /// Copy the last received packet into `buf`, returning its length.
    ///
    /// Packets longer than `buf` are truncated to `buf.len()`.
    pub fn read_fifo(&mut self, buf: &mut [u8]) -> Result<usize, RadioError<B::Error>> {
        let len = (self.read_u8(REG_RX_NB_BYTES)? as usize).min(buf.len());
        let start = self.read_u8(REG_FIFO_RX_CURRENT_ADDR)?;
        self.write_register(REG_FIFO_ADDR_PTR, start)?;
        self.read_register(REG_FIFO, &mut buf[..len])?;
        Ok(len)
    }

    /// SNR of the last packet in dB
    pub fn get_packet_snr(&mut self) -> Result<i8, RadioError<B::Error>> {
        let snr = self.read_u8(REG_PKT_SNR_VALUE)? as i8;
        Ok(snr / 4)
    }

    /// RSSI of the last packet in dBm (HF port)
    pub fn get_rssi(&mut self) -> Result<i16, RadioError<B::Error>> {
        let rssi = self.read_u8(REG_PKT_RSSI_VALUE)?;
        Ok(-157 + i16::from(rssi))
    }

    pub(crate) fn rx_data_valid(&self) -> bool {
        self.rx_data_valid
    }

    pub(crate) fn set_rx_data_valid(&mut self, valid: bool) {
        self.rx_data_valid = valid;
    }
}
