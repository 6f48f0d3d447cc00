use heapless::Vec;

use crate::config::device::{PersistentConfig, FIXED_CHANNELS, MAX_CHANNELS};
use crate::lorawan::mac::MAX_FRAME_PAYLOAD;
use crate::lorawan::region::UPLINK_DATA_RATE;

/// Accepted uplink frequency range for NewChannelReq
const CHANNEL_FREQUENCY_RANGE: core::ops::RangeInclusive<u32> = 863_000_000..=870_000_000;

/// Downlink MAC command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandIdentifier {
    ResetConf = 0x01,
    LinkCheckAns = 0x02,
    LinkADRReq = 0x03,
    DutyCycleReq = 0x04,
    RXParamSetupReq = 0x05,
    DevStatusReq = 0x06,
    NewChannelReq = 0x07,
    RXTimingSetupReq = 0x08,
    TxParamSetupReq = 0x09,
    DlChannelReq = 0x0A,
    RekeyConf = 0x0B,
    ADRParamSetupReq = 0x0C,
    DeviceTimeAns = 0x0D,
}

impl CommandIdentifier {
    /// Look up a CID
    pub fn from_u8(cid: u8) -> Option<Self> {
        Some(match cid {
            0x01 => Self::ResetConf,
            0x02 => Self::LinkCheckAns,
            0x03 => Self::LinkADRReq,
            0x04 => Self::DutyCycleReq,
            0x05 => Self::RXParamSetupReq,
            0x06 => Self::DevStatusReq,
            0x07 => Self::NewChannelReq,
            0x08 => Self::RXTimingSetupReq,
            0x09 => Self::TxParamSetupReq,
            0x0A => Self::DlChannelReq,
            0x0B => Self::RekeyConf,
            0x0C => Self::ADRParamSetupReq,
            0x0D => Self::DeviceTimeAns,
            _ => return None,
        })
    }

    /// Number of argument bytes following the CID
    pub fn payload_len(self) -> usize {
        match self {
            Self::ResetConf => 1,
            Self::LinkCheckAns => 2,
            Self::LinkADRReq => 4,
            Self::DutyCycleReq => 1,
            Self::RXParamSetupReq => 4,
            Self::DevStatusReq => 0,
            Self::NewChannelReq => 5,
            Self::RXTimingSetupReq => 1,
            Self::TxParamSetupReq => 1,
            Self::DlChannelReq => 4,
            Self::RekeyConf => 1,
            Self::ADRParamSetupReq => 1,
            Self::DeviceTimeAns => 5,
        }
    }
}

/// Downlink MAC command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacCommand {
    /// Reset confirmation
    ResetConf {
        /// Server LoRaWAN minor version
        version: u8,
    },
    /// Link check answer
    LinkCheckAns {
        /// Link margin in dB
        margin: u8,
        /// Number of gateways that received the request
        gateway_count: u8,
    },
    /// Link ADR request
    LinkADRReq {
        /// Data rate
        data_rate: u8,
        /// TX power
        tx_power: u8,
        /// Channel mask
        ch_mask: u16,
        /// Channel mask control
        ch_mask_cntl: u8,
        /// Number of transmissions
        nb_trans: u8,
    },
    /// Duty cycle request
    DutyCycleReq {
        /// Maximum duty cycle
        max_duty_cycle: u8,
    },
    /// RX parameter setup request
    RXParamSetupReq {
        /// RX1 data rate offset
        rx1_dr_offset: u8,
        /// RX2 data rate
        rx2_data_rate: u8,
        /// RX2 frequency in Hz
        freq: u32,
    },
    /// Device status request
    DevStatusReq,
    /// New channel request
    NewChannelReq {
        /// Channel index
        ch_index: u8,
        /// Frequency in Hz, 0 disables the channel
        freq: u32,
        /// Maximum data rate
        max_dr: u8,
        /// Minimum data rate
        min_dr: u8,
    },
    /// RX timing setup request
    RXTimingSetupReq {
        /// Delay (0-15)
        delay: u8,
    },
    /// TX parameter setup request
    TxParamSetupReq {
        /// Downlink dwell time
        downlink_dwell_time: bool,
        /// Uplink dwell time
        uplink_dwell_time: bool,
        /// Maximum EIRP
        max_eirp: u8,
    },
    /// Downlink channel request
    DlChannelReq {
        /// Channel index
        ch_index: u8,
        /// Frequency in Hz
        freq: u32,
    },
    /// Rekey confirmation
    RekeyConf {
        /// Server LoRaWAN minor version
        version: u8,
    },
    /// ADR back-off parameters
    ADRParamSetupReq {
        /// ADR_ACK_LIMIT exponent
        limit_exp: u8,
        /// ADR_ACK_DELAY exponent
        delay_exp: u8,
    },
    /// Network time
    DeviceTimeAns {
        /// Seconds since the GPS epoch
        seconds: u32,
        /// Fractional second in 1/256 s
        fraction: u8,
    },
}

fn frequency(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) * 100
}

impl MacCommand {
    /// Parse a command from its identifier and exactly its argument bytes
    pub fn from_bytes(cid: CommandIdentifier, payload: &[u8]) -> Option<Self> {
        if payload.len() != cid.payload_len() {
            return None;
        }

        Some(match cid {
            CommandIdentifier::ResetConf => MacCommand::ResetConf {
                version: payload[0] & 0x0F,
            },
            CommandIdentifier::LinkCheckAns => MacCommand::LinkCheckAns {
                margin: payload[0],
                gateway_count: payload[1],
            },
            CommandIdentifier::LinkADRReq => MacCommand::LinkADRReq {
                data_rate: payload[0] >> 4,
                tx_power: payload[0] & 0x0F,
                ch_mask: u16::from_le_bytes([payload[1], payload[2]]),
                ch_mask_cntl: (payload[3] >> 4) & 0x07,
                nb_trans: payload[3] & 0x0F,
            },
            CommandIdentifier::DutyCycleReq => MacCommand::DutyCycleReq {
                max_duty_cycle: payload[0] & 0x0F,
            },
            CommandIdentifier::RXParamSetupReq => MacCommand::RXParamSetupReq {
                rx1_dr_offset: (payload[0] >> 4) & 0x07,
                rx2_data_rate: payload[0] & 0x0F,
                freq: frequency(&payload[1..4]),
            },
            CommandIdentifier::DevStatusReq => MacCommand::DevStatusReq,
            CommandIdentifier::NewChannelReq => MacCommand::NewChannelReq {
                ch_index: payload[0],
                freq: frequency(&payload[1..4]),
                max_dr: payload[4] >> 4,
                min_dr: payload[4] & 0x0F,
            },
            CommandIdentifier::RXTimingSetupReq => MacCommand::RXTimingSetupReq {
                delay: payload[0] & 0x0F,
            },
            CommandIdentifier::TxParamSetupReq => MacCommand::TxParamSetupReq {
                downlink_dwell_time: (payload[0] & 0x20) != 0,
                uplink_dwell_time: (payload[0] & 0x10) != 0,
                max_eirp: payload[0] & 0x0F,
            },
            CommandIdentifier::DlChannelReq => MacCommand::DlChannelReq {
                ch_index: payload[0],
                freq: frequency(&payload[1..4]),
            },
            CommandIdentifier::RekeyConf => MacCommand::RekeyConf {
                version: payload[0] & 0x0F,
            },
            CommandIdentifier::ADRParamSetupReq => MacCommand::ADRParamSetupReq {
                limit_exp: payload[0] >> 4,
                delay_exp: payload[0] & 0x0F,
            },
            CommandIdentifier::DeviceTimeAns => MacCommand::DeviceTimeAns {
                seconds: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                fraction: payload[4],
            },
        })
    }
}

/// Errors of the MAC command stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The command with this CID is cut short
    Truncated(u8),
    /// Answers do not fit one uplink
    AnswerOverflow,
}

/// Iterator over a MAC command stream.
///
/// Skips unknown CIDs one byte at a time; yields one `Truncated` error and
/// stops when the arguments of a known CID run past the end.
pub struct MacCommandIter<'a> {
    data: &'a [u8],
}

/// Walk `data` as a sequence of MAC commands
pub fn parse_mac_commands(data: &[u8]) -> MacCommandIter<'_> {
    MacCommandIter { data }
}

impl<'a> Iterator for MacCommandIter<'a> {
    type Item = Result<MacCommand, CommandError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (cid, identifier, rest) = loop {
            let (&cid, rest) = self.data.split_first()?;
            match CommandIdentifier::from_u8(cid) {
                Some(identifier) => break (cid, identifier, rest),
                None => {
                    warn!("mac: skipping unknown command {:#x}", cid);
                    self.data = rest;
                }
            }
        };

        let len = identifier.payload_len();
        if rest.len() < len {
            self.data = &[];
            return Some(Err(CommandError::Truncated(cid)));
        }

        let (payload, rest) = rest.split_at(len);
        self.data = rest;
        MacCommand::from_bytes(identifier, payload).map(Ok)
    }
}

/// Result of a LinkCheckReq round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkCheck {
    /// Demodulation margin in dB
    pub margin: u8,
    /// Gateways that heard the request
    pub gateway_count: u8,
}

/// Network time delivered by DeviceTimeAns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceTime {
    /// Seconds since the GPS epoch
    pub seconds: u32,
    /// Fractional second in 1/256 s
    pub fraction: u8,
}

/// Outcome of processing one command stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacResponse {
    /// Answer commands to send back on port 0
    pub answers: Vec<u8, MAX_FRAME_PAYLOAD>,
    /// Last LinkCheckAns seen
    pub link_check: Option<LinkCheck>,
    /// Last DeviceTimeAns seen
    pub device_time: Option<DeviceTime>,
}

impl MacResponse {
    fn answer(&mut self, bytes: &[u8]) -> Result<(), CommandError> {
        self.answers
            .extend_from_slice(bytes)
            .map_err(|_| CommandError::AnswerOverflow)
    }
}

/// Apply a NewChannelReq and return the NewChannelAns status byte
fn new_channel(config: &mut PersistentConfig, ch_index: u8, freq: u32, max_dr: u8, min_dr: u8) -> u8 {
    let index = usize::from(ch_index);
    let writable = (FIXED_CHANNELS..MAX_CHANNELS).contains(&index);

    let frequency_ok = writable && (freq == 0 || CHANNEL_FREQUENCY_RANGE.contains(&freq));
    let data_rate_ok = min_dr <= max_dr && UPLINK_DATA_RATE.within(min_dr, max_dr);

    let status = (u8::from(data_rate_ok) << 1) | u8::from(frequency_ok);
    if frequency_ok && freq == 0 {
        config.clear_channel(index);
        return 0x03;
    }
    if status == 0x03 {
        config.set_channel(index, freq);
    }
    status
}

/// Process a downlink MAC command stream against the persistent state.
///
/// `battery` and `snr` feed DevStatusAns. Answers are collected in order; a
/// truncated command discards the whole stream.
pub fn process_mac_commands(
    config: &mut PersistentConfig,
    commands: &[u8],
    battery: u8,
    snr: i8,
) -> Result<MacResponse, CommandError> {
    let mut response = MacResponse::default();

    for command in parse_mac_commands(commands) {
        let command = command?;
        debug!("mac: {}", command);

        match command {
            MacCommand::LinkCheckAns { margin, gateway_count } => {
                response.link_check = Some(LinkCheck { margin, gateway_count });
            }
            MacCommand::RXParamSetupReq { .. } => {
                // RX2 stays on the regional default.
                response.answer(&[CommandIdentifier::RXParamSetupReq as u8, 0x07])?;
            }
            MacCommand::DevStatusReq => {
                let margin = (snr.clamp(-32, 31) as u8) & 0x3F;
                response.answer(&[CommandIdentifier::DevStatusReq as u8, battery, margin])?;
            }
            MacCommand::NewChannelReq { ch_index, freq, max_dr, min_dr } => {
                let status = new_channel(config, ch_index, freq, max_dr, min_dr);
                response.answer(&[CommandIdentifier::NewChannelReq as u8, status])?;
            }
            MacCommand::RXTimingSetupReq { delay } => {
                config.rx1_delay = delay.max(1);
                response.answer(&[CommandIdentifier::RXTimingSetupReq as u8])?;
            }
            MacCommand::DeviceTimeAns { seconds, fraction } => {
                response.device_time = Some(DeviceTime { seconds, fraction });
            }
            MacCommand::ResetConf { .. }
            | MacCommand::LinkADRReq { .. }
            | MacCommand::DutyCycleReq { .. }
            | MacCommand::TxParamSetupReq { .. }
            | MacCommand::DlChannelReq { .. }
            | MacCommand::RekeyConf { .. }
            | MacCommand::ADRParamSetupReq { .. } => {}
        }
    }

    Ok(response)
}
