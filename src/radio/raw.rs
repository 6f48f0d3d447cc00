//! Polled point-to-point profile.
//!
//! A reduced-capability driver on the same register and mode layer as the
//! LoRaWAN device: no session keys, no receive windows, the caller polls for
//! TX completion and received packets.

use crate::radio::irq::Dio;
use crate::radio::sx127x::{
    DioMapping, OpMode, RadioError, SX127x, IRQ_PAYLOAD_CRC_ERROR_MASK, IRQ_RX_DONE_MASK,
    IRQ_TX_DONE_MASK, REG_FIFO_ADDR_PTR, FIFO_RX_BASE,
};
use crate::radio::traits::{Bandwidth, CodingRate, ModemConfig, RegisterBus, SpreadingFactor};

/// Size of the receive buffer; the chip never reports more than 255 bytes
pub const RX_BUFFER_LEN: usize = 256;

/// REG_OP_MODE reads to wait for standby before giving up
const MODE_READY_POLLS: u32 = 1_000;

/// Result of [`RawRadio::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollStatus {
    /// A packet arrived with a bad CRC and was dropped; still receiving
    RxError,
    /// Nothing happened since the last poll
    NoStatus,
    /// A packet is waiting in the receive buffer
    RxReady,
    /// The last `send` completed
    TxDone,
}

/// Polled LoRa transceiver without MAC framing
pub struct RawRadio<B: RegisterBus> {
    radio: SX127x<B>,
    rx_buffer: [u8; RX_BUFFER_LEN],
    rx_len: usize,
}

impl<B: RegisterBus> RawRadio<B> {
    /// Wrap a register bus
    pub fn new(bus: B) -> Self {
        Self {
            radio: SX127x::new(bus),
            rx_buffer: [0; RX_BUFFER_LEN],
            rx_len: 0,
        }
    }

    /// Access the register layer for fine tuning
    pub fn radio(&mut self) -> &mut SX127x<B> {
        &mut self.radio
    }

    /// Verify the chip, apply defaults, then tune to the given channel and
    /// modulation. Leaves the radio in standby.
    pub fn init_radio(
        &mut self,
        center_frequency_hz: u32,
        tx_power_dbm: i8,
        bandwidth: Bandwidth,
        coding_rate: CodingRate,
        spreading_factor: SpreadingFactor,
    ) -> Result<(), RadioError<B::Error>> {
        self.radio.init(|| {})?;
        self.radio.configure_frequency(center_frequency_hz)?;
        self.radio.set_power(tx_power_dbm)?;
        self.radio
            .configure_modem(&ModemConfig::new(bandwidth, coding_rate, spreading_factor))?;
        self.enter_standby()?;
        debug!("raw: ready at {} Hz", center_frequency_hz);
        Ok(())
    }

    /// Start transmitting `data`; completion is reported by [`poll`](Self::poll)
    pub fn send(&mut self, data: &[u8]) -> Result<(), RadioError<B::Error>> {
        self.enter_standby()?;
        self.radio.map_dio(DioMapping::TxDone)?;
        self.radio.clear_irq_flags()?;
        self.radio.write_fifo(data)?;
        self.radio.set_mode(OpMode::Tx)
    }

    /// Enter continuous receive
    pub fn start_receive(&mut self) -> Result<(), RadioError<B::Error>> {
        self.enter_standby()?;
        self.radio.map_dio(DioMapping::RxDone)?;
        self.radio.clear_irq_flags()?;
        self.radio.write_register(REG_FIFO_ADDR_PTR, FIFO_RX_BASE)?;
        self.radio.set_mode(OpMode::RxContinuous)
    }

    /// Switch to standby and poll the mode register until the chip reports it.
    /// The FIFO is not accessible before then.
    fn enter_standby(&mut self) -> Result<(), RadioError<B::Error>> {
        self.radio.set_mode(OpMode::Standby)?;
        for _ in 0..MODE_READY_POLLS {
            if self.radio.get_mode()? == OpMode::Standby {
                return Ok(());
            }
        }
        warn!("raw: chip did not report standby");
        Err(RadioError::Timeout(Dio::Dio5))
    }

    /// Check the IRQ flags once and service whatever completed
    pub fn poll(&mut self) -> Result<PollStatus, RadioError<B::Error>> {
        let flags = self.radio.irq_flags()?;

        if flags & IRQ_RX_DONE_MASK != 0 {
            self.radio.clear_irq_flags()?;
            if flags & IRQ_PAYLOAD_CRC_ERROR_MASK != 0 {
                warn!("raw: dropped packet with bad CRC");
                return Ok(PollStatus::RxError);
            }
            self.rx_len = self.radio.read_fifo(&mut self.rx_buffer)?;
            self.radio.set_rx_data_valid(true);
            return Ok(PollStatus::RxReady);
        }

        if flags & IRQ_TX_DONE_MASK != 0 {
            self.radio.clear_irq_flags()?;
            return Ok(PollStatus::TxDone);
        }

        Ok(PollStatus::NoStatus)
    }

    /// Whether a received packet has not been collected yet
    pub fn rx_data_ready(&self) -> bool {
        self.radio.rx_data_valid()
    }

    /// Collect a received packet into `buf`, entering receive mode first if
    /// needed. Returns 0 when nothing is available.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, RadioError<B::Error>> {
        if !self.radio.rx_data_valid() {
            if self.radio.get_mode()? != OpMode::RxContinuous {
                self.start_receive()?;
            }
            self.poll()?;
        }

        if !self.radio.rx_data_valid() {
            return Ok(0);
        }

        let len = self.rx_len.min(buf.len());
        buf[..len].copy_from_slice(&self.rx_buffer[..len]);
        self.radio.set_rx_data_valid(false);
        Ok(len)
    }
}
