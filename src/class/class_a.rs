use heapless::Vec;

use crate::config::device::ReceiveMode;
use crate::device::{Device, DeviceError, Reception};
use crate::lorawan::{
    commands::{process_mac_commands, CommandError, DeviceTime, LinkCheck},
    mac::{FrameError, MAX_FRAME_PAYLOAD},
    phy::RxWindow,
};
use crate::platform::Platform;
use crate::radio::{
    sx127x::{OpMode, FIFO_SIZE},
    traits::RegisterBus,
};

/// Class A state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    /// Cycle finished
    Idle,
    /// Drawing the uplink channel
    ChannelSelect,
    /// Transmitting the application uplink
    Send,
    /// In RX1 window
    Rx1Wait,
    /// In RX2 window
    Rx2Wait,
    /// Decoding a downlink and answering its MAC commands
    MacProcessing(RxWindow),
    /// Saving counters and channel plan
    Persist,
}

/// Why a received downlink was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscardReason {
    /// Payload CRC failed on the chip
    Crc,
    /// Frame codec rejected it
    Frame(FrameError),
    /// Its MAC commands were malformed
    Command(CommandError),
}

/// Downlink outcome of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downlink {
    /// Receive mode is [`ReceiveMode::None`]
    NotRequested,
    /// The windows stayed silent
    None,
    /// Something arrived but was not accepted
    Discarded(DiscardReason),
    /// A verified downlink
    Received {
        /// Window it arrived in
        window: RxWindow,
        /// FPort, 0 for MAC-only frames
        port: u8,
        /// Accepted downlink frame counter
        frame_count: u32,
        /// Packet SNR in dB
        snr: i8,
        /// Bytes of MAC answers sent back in a second uplink
        mac_answer_len: usize,
        /// LinkCheckAns carried by the frame
        link_check: Option<LinkCheck>,
        /// DeviceTimeAns carried by the frame
        device_time: Option<DeviceTime>,
        /// Decrypted application payload, empty on port 0
        payload: Vec<u8, MAX_FRAME_PAYLOAD>,
    },
}

/// Summary of one send/receive cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Channel index the uplinks went out on
    pub channel: u8,
    /// Uplinks transmitted, 2 when MAC answers were sent back
    pub uplinks: u8,
    /// What came back
    pub downlink: Downlink,
}

impl<'a, B: RegisterBus, P: Platform> Device<'a, B, P> {
    /// Run one Class A exchange: send `data` on `port`, open the receive
    /// windows selected by the receive mode, answer MAC commands and persist.
    ///
    /// `Err` is returned only for register access failures and TX or wake-up
    /// timeouts; the chip is forced back to sleep in that case. Rejected or
    /// missing downlinks are reported in [`CycleReport::downlink`]. The
    /// persistent state is saved in every case.
    ///
    /// # Panics
    /// If `data` is longer than [`MAX_FRAME_PAYLOAD`].
    pub fn send_receive_cycle(
        &mut self,
        port: u8,
        data: &[u8],
    ) -> Result<CycleReport, DeviceError<B::Error>> {
        let result = self.run_cycle(port, data);

        if result.is_err() {
            error!("cycle: aborted, forcing sleep");
            if self.radio.set_mode(OpMode::Sleep).is_err() {
                error!("cycle: could not return the chip to sleep");
            }
            self.platform.save_config(&self.persistent);
        }

        result
    }

    fn run_cycle(&mut self, port: u8, data: &[u8]) -> Result<CycleReport, DeviceError<B::Error>> {
        let mut report = CycleReport {
            channel: 0,
            uplinks: 0,
            downlink: Downlink::NotRequested,
        };
        let mut frequency = 0;
        let mut tx_ticks = 0;
        let mut rx_buffer = [0u8; FIFO_SIZE];
        let mut received = (0, 0);

        let mut state = State::ChannelSelect;
        loop {
            trace!("cycle: {}", state);
            state = match state {
                State::Idle => return Ok(report),
                State::ChannelSelect => {
                    let channel = self.select_random_channel().ok_or(DeviceError::NoChannel)?;
                    frequency = self
                        .persistent
                        .channel_frequency(usize::from(channel))
                        .ok_or(DeviceError::NoChannel)?;
                    report.channel = channel;
                    State::Send
                }
                State::Send => {
                    tx_ticks = self.send_uplink(data, port, frequency)?;
                    report.uplinks += 1;
                    info!("cycle: uplink done on channel {}", report.channel);

                    if self.config.receive_mode == ReceiveMode::None {
                        State::Persist
                    } else {
                        report.downlink = Downlink::None;
                        State::Rx1Wait
                    }
                }
                State::Rx1Wait | State::Rx2Wait => {
                    let window = if state == State::Rx1Wait {
                        RxWindow::Rx1
                    } else {
                        RxWindow::Rx2
                    };

                    match self.receive_package(window, tx_ticks, frequency, &mut rx_buffer)? {
                        Reception::Packet { len, snr } => {
                            received = (len, snr);
                            State::MacProcessing(window)
                        }
                        Reception::CrcError => {
                            report.downlink = Downlink::Discarded(DiscardReason::Crc);
                            self.next_window(window)
                        }
                        Reception::Empty => self.next_window(window),
                    }
                }
                State::MacProcessing(window) => {
                    let (len, snr) = received;
                    match self.process_downlink(window, &mut rx_buffer[..len], snr, frequency) {
                        Ok((downlink, answered)) => {
                            report.uplinks += answered;
                            report.downlink = downlink;
                            State::Persist
                        }
                        Err(DeviceError::Frame(error)) => {
                            warn!("cycle: {} frame rejected: {}", window, error);
                            report.downlink = Downlink::Discarded(DiscardReason::Frame(error));
                            self.next_window(window)
                        }
                        Err(DeviceError::Command(error)) => {
                            warn!("cycle: MAC commands rejected: {}", error);
                            report.downlink = Downlink::Discarded(DiscardReason::Command(error));
                            State::Persist
                        }
                        Err(error) => return Err(error),
                    }
                }
                State::Persist => {
                    debug!(
                        "cycle: saving tx fcnt {} rx fcnt {}",
                        self.persistent.tx_frame_count,
                        self.persistent.rx_frame_count
                    );
                    self.platform.save_config(&self.persistent);
                    State::Idle
                }
            };
        }
    }

    /// Where to go when `window` produced nothing usable
    fn next_window(&self, window: RxWindow) -> State {
        match (window, self.config.receive_mode) {
            (RxWindow::Rx1, ReceiveMode::Rx12) => State::Rx2Wait,
            _ => State::Persist,
        }
    }

    /// Decode a received frame, apply its MAC commands and send the answers
    /// back on the uplink channel. Returns the downlink report and the number
    /// of extra uplinks sent.
    fn process_downlink(
        &mut self,
        window: RxWindow,
        buf: &mut [u8],
        snr: i8,
        frequency: u32,
    ) -> Result<(Downlink, u8), DeviceError<B::Error>> {
        let battery = self.platform.battery_level();
        let frame = crate::lorawan::mac::decode_phy_payload(
            &self.config,
            &mut self.persistent.rx_frame_count,
            buf,
        )?;
        info!(
            "cycle: downlink fcnt {} port {} in {}",
            frame.frame_count,
            frame.port(),
            window
        );

        let response = process_mac_commands(&mut self.persistent, frame.mac_commands(), battery, snr)?;

        let payload = if frame.port() == 0 {
            Vec::new()
        } else {
            Vec::from_slice(frame.payload).unwrap_or_default()
        };
        let downlink = Downlink::Received {
            window,
            port: frame.port(),
            frame_count: frame.frame_count,
            snr,
            mac_answer_len: response.answers.len(),
            link_check: response.link_check,
            device_time: response.device_time,
            payload,
        };

        if response.answers.is_empty() {
            return Ok((downlink, 0));
        }

        debug!("cycle: answering {} bytes of MAC commands", response.answers.len());
        self.send_uplink(&response.answers, 0, frequency)?;
        Ok((downlink, 1))
    }
}
