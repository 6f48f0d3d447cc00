//! High-level LoRaWAN device interface
//!
//! [`Device`] owns the register layer, the platform services and the session
//! state, and provides the radio-facing steps of a Class A exchange. The cycle
//! that strings them together lives in [`class::class_a`](crate::class::class_a).

use crate::{
    config::device::{DeviceConfig, PersistentConfig},
    lorawan::{
        commands::CommandError,
        mac::{self, DecodedFrame, FrameError, PhyPayload},
        phy::{self, RxTimings, RxWindow},
        region::{self, DataRate, UPLINK_DATA_RATE},
    },
    platform::Platform,
    radio::{
        irq::{Dio, InterruptTimes},
        sx127x::{
            DioMapping, IqMode, OpMode, RadioError, SX127x, IRQ_PAYLOAD_CRC_ERROR_MASK,
            IRQ_RX_DONE_MASK, FIFO_SIZE,
        },
        traits::{CodingRate, ModemConfig, RegisterBus},
    },
};

/// Slowest precision tick the RX scheduling can work with
const MIN_TICK_FREQUENCY: u32 = 10_000;

/// LoRaWAN device error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError<E> {
    /// Register access or chip timeout
    Radio(RadioError<E>),
    /// Downlink rejected by the frame codec
    Frame(FrameError),
    /// Downlink MAC commands could not be processed
    Command(CommandError),
    /// The channel mask is empty
    NoChannel,
}

impl<E> From<RadioError<E>> for DeviceError<E> {
    fn from(error: RadioError<E>) -> Self {
        DeviceError::Radio(error)
    }
}

impl<E> From<FrameError> for DeviceError<E> {
    fn from(error: FrameError) -> Self {
        DeviceError::Frame(error)
    }
}

impl<E> From<CommandError> for DeviceError<E> {
    fn from(error: CommandError) -> Self {
        DeviceError::Command(error)
    }
}

/// What a receive window produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// Nothing demodulated before the symbol timeout
    Empty,
    /// A packet arrived with a bad payload CRC
    CrcError,
    /// A packet of `len` bytes is in the caller's buffer
    Packet {
        /// Received length
        len: usize,
        /// Packet SNR in dB
        snr: i8,
    },
}

/// RFM95 LoRaWAN device
pub struct Device<'a, B: RegisterBus, P: Platform> {
    pub(crate) radio: SX127x<B>,
    pub(crate) platform: P,
    pub(crate) irq: &'a InterruptTimes,
    pub(crate) config: DeviceConfig,
    pub(crate) persistent: PersistentConfig,
}

impl<'a, B: RegisterBus, P: Platform> Device<'a, B, P> {
    /// Assemble a device. Nothing touches the chip until [`init`](Self::init).
    ///
    /// `irq` must be the same slots the DIO edge handlers write to.
    pub fn new(bus: B, platform: P, irq: &'a InterruptTimes, config: DeviceConfig) -> Self {
        Self {
            radio: SX127x::new(bus),
            platform,
            irq,
            config,
            persistent: PersistentConfig::default(),
        }
    }

    /// Load the persistent state and bring the chip into LoRa sleep.
    ///
    /// # Panics
    /// If the configured precision tick is 10 kHz or slower.
    pub fn init(&mut self) -> Result<(), RadioError<B::Error>> {
        assert!(
            self.config.precision_tick_frequency > MIN_TICK_FREQUENCY,
            "precision tick too slow for receive windows"
        );

        let mut stored = PersistentConfig::default();
        self.persistent = if self.platform.reload_config(&mut stored) && stored.is_valid() {
            stored
        } else {
            info!("init: no valid stored config, using defaults");
            PersistentConfig::default()
        };

        self.irq.clear_all();
        let platform = &mut self.platform;
        self.radio.init(|| platform.on_after_interrupts_configured())?;

        info!(
            "init: chip ready, tx fcnt {}, rx fcnt {}",
            self.persistent.tx_frame_count,
            self.persistent.rx_frame_count
        );
        Ok(())
    }

    /// Static configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Counters, RX1 delay and channel plan
    pub fn persistent_config(&self) -> &PersistentConfig {
        &self.persistent
    }

    /// Mutable access to the persistent state, e.g. to add channels
    pub fn persistent_config_mut(&mut self) -> &mut PersistentConfig {
        &mut self.persistent
    }

    /// Platform services
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable platform services
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Register layer
    pub fn radio(&mut self) -> &mut SX127x<B> {
        &mut self.radio
    }

    /// Tear down, returning the bus and the platform
    pub fn release(self) -> (B, P) {
        (self.radio.release(), self.platform)
    }

    /// Encode `frame_payload` as the next uplink
    pub fn encode_phy_payload(&self, frame_payload: &[u8], port: u8) -> PhyPayload {
        mac::encode_phy_payload(&self.config, self.persistent.tx_frame_count, frame_payload, port)
    }

    /// Verify and decrypt a downlink in place
    pub fn decode_phy_payload<'b>(&mut self, buf: &'b mut [u8]) -> Result<DecodedFrame<'b>, FrameError> {
        mac::decode_phy_payload(&self.config, &mut self.persistent.rx_frame_count, buf)
    }

    /// Opening tick and symbol timeout of `window` after a TX done at `tx_ticks`
    pub fn calculate_rx_timings(&self, window: RxWindow, tx_ticks: u32) -> RxTimings {
        let params = window.params(0, self.persistent.rx1_delay);
        phy::calculate_rx_timings(
            params.data_rate.bandwidth(),
            params.data_rate.spreading_factor(),
            tx_ticks,
            params.delay_s,
            self.config.precision_tick_frequency,
            self.config.precision_tick_drift_us_per_s,
        )
    }

    /// Pick a random enabled channel
    pub fn select_random_channel(&mut self) -> Option<u8> {
        let platform = &mut self.platform;
        region::select_random_channel(self.persistent.channel_mask, |max| platform.random_int(max))
    }

    /// Busy-poll the `dio` slot until it fires or `timeout_ms` elapses.
    ///
    /// Returns the tick recorded by the edge handler.
    pub fn wait_for_irq(&mut self, dio: Dio, timeout_ms: u32) -> Result<u32, RadioError<B::Error>> {
        let timeout = self.config.ms_to_ticks(timeout_ms);
        let start = self.platform.precision_tick();

        loop {
            match self.irq.poll(dio) {
                Ok(tick) => return Ok(tick),
                Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(never)) => match never {},
            }

            if self.platform.precision_tick().wrapping_sub(start) > timeout {
                // The edge may have landed between the poll and the deadline check.
                return self.irq.time(dio).ok_or(RadioError::Timeout(dio));
            }
        }
    }

    /// Wait for RX done or RX timeout on a single receive.
    ///
    /// `Ok(true)` when a packet is ready, `Ok(false)` on RX timeout. When
    /// neither line fires within the receive timeout the IRQ flags decide.
    pub fn wait_for_rx_irqs(&mut self) -> Result<bool, RadioError<B::Error>> {
        let timeout = self.config.ms_to_ticks(self.config.timeouts.receive_ms);
        let start = self.platform.precision_tick();

        loop {
            if self.irq.time(Dio::Dio0).is_some() {
                return Ok(true);
            }
            if self.irq.time(Dio::Dio1).is_some() {
                return Ok(false);
            }
            if self.platform.precision_tick().wrapping_sub(start) > timeout {
                // Trust the chip over a missed edge.
                let flags = self.radio.irq_flags()?;
                warn!("rx: no DIO edge before timeout, irq flags {:#x}", flags);
                return Ok(flags & IRQ_RX_DONE_MASK != 0);
            }
        }
    }

    fn modem_config(data_rate: DataRate) -> ModemConfig {
        ModemConfig::new(data_rate.bandwidth(), CodingRate::Cr4_5, data_rate.spreading_factor())
    }

    /// Transmit `payload` on `frequency` at the uplink data rate.
    ///
    /// Returns the tick of the TX-done edge; the chip is back in sleep.
    pub fn send_package(&mut self, payload: &[u8], frequency: u32) -> Result<u32, RadioError<B::Error>> {
        self.radio.configure_frequency(frequency)?;
        self.radio.configure_modem(&Self::modem_config(UPLINK_DATA_RATE))?;
        self.radio.set_iq(IqMode::Tx)?;
        self.radio.map_dio(DioMapping::TxDone)?;
        self.radio.clear_irq_flags()?;

        self.irq.clear(Dio::Dio0);
        self.irq.clear(Dio::Dio5);
        self.radio.set_mode(OpMode::Standby)?;
        self.wait_for_irq(Dio::Dio5, self.config.timeouts.wakeup_ms)?;

        self.radio.write_fifo(payload)?;
        self.radio.set_mode(OpMode::Tx)?;
        let tx_ticks = self.wait_for_irq(Dio::Dio0, self.config.timeouts.send_ms)?;

        self.radio.set_mode(OpMode::Sleep)?;
        Ok(tx_ticks)
    }

    /// Encode, transmit and count one uplink.
    ///
    /// The frame counter advances only once TX done was seen.
    pub fn send_uplink(
        &mut self,
        frame_payload: &[u8],
        port: u8,
        frequency: u32,
    ) -> Result<u32, RadioError<B::Error>> {
        let frame = self.encode_phy_payload(frame_payload, port);
        debug!(
            "tx: fcnt {} port {} on {} Hz, {} bytes",
            self.persistent.tx_frame_count,
            port,
            frequency,
            frame.len()
        );

        let tx_ticks = self.send_package(frame.as_slice(), frequency)?;
        self.persistent.tx_frame_count = self.persistent.tx_frame_count.wrapping_add(1);
        Ok(tx_ticks)
    }

    /// Sleep until just before `target`, wake the chip, then enter single
    /// receive exactly at `target`.
    pub fn receive_at_scheduled_time(&mut self, target: u32) -> Result<(), RadioError<B::Error>> {
        let lead = self.config.ms_to_ticks(self.config.timeouts.wakeup_ms);
        self.platform.sleep_until(target.wrapping_sub(lead));

        self.radio.map_dio(DioMapping::RxDone)?;
        self.radio.clear_irq_flags()?;
        self.irq.clear_all();
        self.radio.set_mode(OpMode::Standby)?;
        self.wait_for_irq(Dio::Dio5, self.config.timeouts.wakeup_ms)?;

        self.platform.sleep_until(target);
        self.radio.set_mode(OpMode::RxSingle)
    }

    /// Open `window` after an uplink on `uplink_frequency` that finished at
    /// `tx_ticks`, collecting any packet into `buf`.
    ///
    /// The chip is back in sleep when this returns `Ok`.
    pub fn receive_package(
        &mut self,
        window: RxWindow,
        tx_ticks: u32,
        uplink_frequency: u32,
        buf: &mut [u8; FIFO_SIZE],
    ) -> Result<Reception, RadioError<B::Error>> {
        let params = window.params(uplink_frequency, self.persistent.rx1_delay);
        let timings = self.calculate_rx_timings(window, tx_ticks);

        self.radio.configure_frequency(params.frequency)?;
        self.radio.configure_modem(
            &Self::modem_config(params.data_rate).with_symbol_timeout(timings.window_symbols),
        )?;
        self.radio.set_iq(IqMode::Rx)?;

        debug!(
            "rx: {} at tick {} on {} Hz, {} symbols",
            window,
            timings.target,
            params.frequency,
            timings.window_symbols
        );
        self.receive_at_scheduled_time(timings.target)?;

        let reception = if self.wait_for_rx_irqs()? {
            let flags = self.radio.irq_flags()?;
            if flags & IRQ_PAYLOAD_CRC_ERROR_MASK != 0 {
                warn!("rx: {} packet with bad CRC", window);
                Reception::CrcError
            } else {
                let snr = self.radio.get_packet_snr()?;
                let len = self.radio.read_fifo(buf)?;
                Reception::Packet { len, snr }
            }
        } else {
            Reception::Empty
        };

        self.radio.clear_irq_flags()?;
        self.radio.set_mode(OpMode::Sleep)?;
        Ok(reception)
    }
}
