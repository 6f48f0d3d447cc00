//! PHY payload framing for unconfirmed data frames.
//!
//! ```text
//! | MHDR | DevAddr | FCtrl | FCnt | FOpts  | FPort | FRMPayload | MIC |
//! |  1   |    4    |   1   |  2   | 0..=15 |  0/1  |     N      |  4  |
//! ```

use crate::config::device::DeviceConfig;
use crate::crypto::{self, Direction, MIC_SIZE};
use crate::radio::sx127x::FIFO_SIZE;

/// MHDR + FHDR without options + FPort
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest application payload that still fits the chip FIFO
pub const MAX_FRAME_PAYLOAD: usize = FIFO_SIZE - FRAME_HEADER_SIZE - MIC_SIZE;

/// Shortest frame the decoder considers: MHDR, FHDR without options, MIC
const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE - 1 + MIC_SIZE;

/// MAC header types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MType {
    JoinRequest = 0x00,
    JoinAccept = 0x20,
    UnconfirmedDataUp = 0x40,
    UnconfirmedDataDown = 0x60,
    ConfirmedDataUp = 0x80,
    ConfirmedDataDown = 0xA0,
    RejoinRequest = 0xC0,
    Proprietary = 0xE0,
}

/// Frame header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub f_pending: bool,
    pub f_opts_len: u8,
}

impl FCtrl {
    fn to_byte(self) -> u8 {
        let mut byte = self.f_opts_len & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            adr_ack_req: (byte & 0x40) != 0,
            ack: (byte & 0x20) != 0,
            f_pending: (byte & 0x10) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Reasons a downlink is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Shorter than its header, options and MIC
    TooShort,
    /// MHDR other than unconfirmed data down
    UnsupportedMType(u8),
    /// Addressed to another device
    AddressMismatch,
    /// Frame counter below the last accepted one
    StaleFrameCounter {
        /// Counter carried by the frame
        received: u32,
        /// Last accepted counter
        stored: u32,
    },
    /// MIC does not match
    InvalidMic,
}

/// Encoded uplink, sized for the chip FIFO
#[derive(Clone)]
pub struct PhyPayload {
    buf: [u8; FIFO_SIZE],
    len: usize,
}

impl PhyPayload {
    /// Encoded bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Encoded length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true for a finished frame
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn session_key(config: &DeviceConfig, port: u8) -> &crate::config::AESKey {
    if port == 0 {
        &config.nwk_skey
    } else {
        &config.app_skey
    }
}

/// Build an unconfirmed uplink carrying `frame_payload` on `port`.
///
/// `frame_count` must be the counter of this transmission; its low 16 bits
/// go on the air, all 32 bits feed the encryption and MIC.
///
/// # Panics
/// If `frame_payload` is longer than [`MAX_FRAME_PAYLOAD`].
pub fn encode_phy_payload(
    config: &DeviceConfig,
    frame_count: u32,
    frame_payload: &[u8],
    port: u8,
) -> PhyPayload {
    assert!(
        frame_payload.len() <= MAX_FRAME_PAYLOAD,
        "frame payload exceeds the radio FIFO"
    );

    let mut buf = [0u8; FIFO_SIZE];
    buf[0] = MType::UnconfirmedDataUp as u8;
    buf[1..5].copy_from_slice(&config.dev_addr.to_wire());
    buf[5] = FCtrl::default().to_byte();
    buf[6..8].copy_from_slice(&(frame_count as u16).to_le_bytes());
    buf[8] = port;

    let payload_end = FRAME_HEADER_SIZE + frame_payload.len();
    let payload = &mut buf[FRAME_HEADER_SIZE..payload_end];
    payload.copy_from_slice(frame_payload);
    crypto::encrypt_payload(
        session_key(config, port),
        config.dev_addr,
        frame_count,
        Direction::Up,
        payload,
    );

    let mic = crypto::compute_mic(
        &config.nwk_skey,
        &buf[..payload_end],
        config.dev_addr,
        frame_count,
        Direction::Up,
    );
    buf[payload_end..payload_end + MIC_SIZE].copy_from_slice(&mic);

    PhyPayload {
        buf,
        len: payload_end + MIC_SIZE,
    }
}

/// A verified, decrypted downlink borrowing the receive buffer
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedFrame<'b> {
    /// Full frame counter the frame was accepted with
    pub frame_count: u32,
    /// Frame control flags
    pub f_ctrl: FCtrl,
    /// FPort, absent when the frame carries no payload
    pub port: Option<u8>,
    /// MAC commands piggybacked in the header
    pub f_opts: &'b [u8],
    /// Decrypted FRMPayload
    pub payload: &'b [u8],
}

impl<'b> DecodedFrame<'b> {
    /// Port the frame is addressed to; a frame without payload counts as port 0
    pub fn port(&self) -> u8 {
        self.port.unwrap_or(0)
    }

    /// The MAC command stream of this frame: the payload on port 0, the
    /// header options otherwise
    pub fn mac_commands(&self) -> &'b [u8] {
        match self.port {
            Some(0) => self.payload,
            _ => self.f_opts,
        }
    }
}

/// Extend a 16-bit wire counter with the upper half of the stored one
fn full_frame_count(wire: u16, stored: u32) -> u32 {
    (stored & 0xFFFF_0000) | u32::from(wire)
}

/// Verify and decrypt an unconfirmed downlink held in `buf`.
///
/// `rx_frame_count` is only advanced once the MIC checks out; any rejection
/// leaves it untouched.
pub fn decode_phy_payload<'b>(
    config: &DeviceConfig,
    rx_frame_count: &mut u32,
    buf: &'b mut [u8],
) -> Result<DecodedFrame<'b>, FrameError> {
    let len = buf.len();
    if len < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort);
    }

    if buf[0] != MType::UnconfirmedDataDown as u8 {
        return Err(FrameError::UnsupportedMType(buf[0]));
    }

    if buf[1..5] != config.dev_addr.to_wire() {
        return Err(FrameError::AddressMismatch);
    }

    let f_ctrl = FCtrl::from_byte(buf[5]);
    let f_opts_end = FRAME_HEADER_SIZE - 1 + usize::from(f_ctrl.f_opts_len);
    let mic_start = len - MIC_SIZE;
    if mic_start < f_opts_end {
        return Err(FrameError::TooShort);
    }

    let frame_count = full_frame_count(u16::from_le_bytes([buf[6], buf[7]]), *rx_frame_count);
    if frame_count < *rx_frame_count {
        return Err(FrameError::StaleFrameCounter {
            received: frame_count,
            stored: *rx_frame_count,
        });
    }

    if !crypto::verify_mic(
        &config.nwk_skey,
        &buf[..mic_start],
        config.dev_addr,
        frame_count,
        Direction::Down,
        &buf[mic_start..],
    ) {
        return Err(FrameError::InvalidMic);
    }
    *rx_frame_count = frame_count;

    let port = if mic_start > f_opts_end {
        let port = buf[f_opts_end];
        crypto::encrypt_payload(
            session_key(config, port),
            config.dev_addr,
            frame_count,
            Direction::Down,
            &mut buf[f_opts_end + 1..mic_start],
        );
        Some(port)
    } else {
        None
    };

    let buf: &'b [u8] = buf;
    let payload = match port {
        Some(_) => &buf[f_opts_end + 1..mic_start],
        None => &buf[mic_start..mic_start],
    };

    Ok(DecodedFrame {
        frame_count,
        f_ctrl,
        port,
        f_opts: &buf[FRAME_HEADER_SIZE - 1..f_opts_end],
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AESKey, DevAddr};

    fn config() -> DeviceConfig {
        DeviceConfig::new_abp(
            DevAddr::new([0x26, 0x01, 0x1B, 0xDA]),
            AESKey::new([0x2B; 16]),
            AESKey::new([0x3C; 16]),
        )
    }

    fn reference_config() -> DeviceConfig {
        DeviceConfig::new_abp(
            DevAddr::new([0x01, 0x02, 0x03, 0x04]),
            AESKey::new([0x02; 16]),
            AESKey::new([0x01; 16]),
        )
    }

    #[test]
    fn encodes_reference_uplink() {
        let frame = encode_phy_payload(&reference_config(), 1, b"hello", 1);
        assert_eq!(
            frame.as_slice(),
            &[
                0x40, 0x04, 0x03, 0x02, 0x01, 0x00, 0x01, 0x00, 0x01, 0xA6, 0x94, 0x64, 0x26, 0x15,
                0x36, 0xD9, 0xF3, 0x35,
            ]
        );
    }

    #[test]
    fn encodes_reference_port_zero_uplink_with_high_counter() {
        let frame = encode_phy_payload(&reference_config(), 0x0001_0002, &[0x08], 0);
        assert_eq!(
            frame.as_slice(),
            &[0x40, 0x04, 0x03, 0x02, 0x01, 0x00, 0x02, 0x00, 0x00, 0xD5, 0x75, 0x2E, 0xCB, 0xA6]
        );
    }

    #[test]
    fn decodes_reference_downlink() {
        let mut buf = [
            0x60, 0x04, 0x03, 0x02, 0x01, 0x00, 0x05, 0x00, 0x07, 0x06, 0xC3, 0x7A, 0x11, 0x41, 0x0D,
            0x9D, 0x40, 0x5B, 0x56, 0x1C, 0x91, 0xD7, 0xE7, 0x32, 0x33, 0xDC, 0x83, 0x07, 0x74, 0x05,
            0xF3, 0x3C, 0xEC, 0xB4, 0xAC, 0x81, 0xA0, 0x64, 0x90, 0xAE, 0xF4, 0xBE, 0x3E, 0x7F,
        ];
        let mut rx_count = 4;
        let frame = decode_phy_payload(&reference_config(), &mut rx_count, &mut buf).unwrap();
        assert_eq!(frame.frame_count, 5);
        assert_eq!(frame.port, Some(7));
        assert_eq!(frame.payload, b"downlink payload over one block");
        assert_eq!(rx_count, 5);
    }

    /// Build a downlink the way a network server would
    fn downlink(config: &DeviceConfig, fcnt: u32, f_opts: &[u8], port: Option<u8>, payload: &[u8]) -> ([u8; 64], usize) {
        let mut buf = [0u8; 64];
        buf[0] = MType::UnconfirmedDataDown as u8;
        buf[1..5].copy_from_slice(&config.dev_addr.to_wire());
        buf[5] = f_opts.len() as u8;
        buf[6..8].copy_from_slice(&(fcnt as u16).to_le_bytes());
        let mut pos = 8;
        buf[pos..pos + f_opts.len()].copy_from_slice(f_opts);
        pos += f_opts.len();
        if let Some(port) = port {
            buf[pos] = port;
            pos += 1;
            buf[pos..pos + payload.len()].copy_from_slice(payload);
            crypto::encrypt_payload(
                session_key(config, port),
                config.dev_addr,
                fcnt,
                Direction::Down,
                &mut buf[pos..pos + payload.len()],
            );
            pos += payload.len();
        }
        let mic = crypto::compute_mic(&config.nwk_skey, &buf[..pos], config.dev_addr, fcnt, Direction::Down);
        buf[pos..pos + 4].copy_from_slice(&mic);
        (buf, pos + 4)
    }

    #[test]
    fn uplink_layout() {
        let config = config();
        let frame = encode_phy_payload(&config, 0x0001_0203, b"hi", 7);
        let bytes = frame.as_slice();

        assert_eq!(bytes.len(), 2 + FRAME_HEADER_SIZE + MIC_SIZE);
        assert_eq!(bytes[0], 0x40);
        assert_eq!(&bytes[1..5], &[0xDA, 0x1B, 0x01, 0x26]);
        assert_eq!(bytes[5], 0x00);
        assert_eq!(&bytes[6..8], &[0x03, 0x02]);
        assert_eq!(bytes[8], 7);
        assert_ne!(&bytes[9..11], b"hi");
    }

    #[test]
    fn largest_payload_fills_the_fifo() {
        let frame = encode_phy_payload(&config(), 0, &[0xA5; MAX_FRAME_PAYLOAD], 1);
        assert_eq!(frame.len(), FIFO_SIZE);
    }

    #[test]
    #[should_panic]
    fn oversized_payload_panics() {
        encode_phy_payload(&config(), 0, &[0; MAX_FRAME_PAYLOAD + 1], 1);
    }

    #[test]
    fn decodes_application_payload() {
        let config = config();
        let (mut buf, len) = downlink(&config, 5, &[], Some(10), b"payload");
        let mut rx_count = 2;

        let frame = decode_phy_payload(&config, &mut rx_count, &mut buf[..len]).unwrap();
        assert_eq!(frame.port, Some(10));
        assert_eq!(frame.payload, b"payload");
        assert!(frame.f_opts.is_empty());
        assert_eq!(frame.frame_count, 5);
        assert_eq!(rx_count, 5);
    }

    #[test]
    fn port_follows_header_options() {
        let config = config();
        let (mut buf, len) = downlink(&config, 1, &[0x06], Some(3), &[0xEE]);
        let mut rx_count = 0;

        let frame = decode_phy_payload(&config, &mut rx_count, &mut buf[..len]).unwrap();
        assert_eq!(frame.port(), 3);
        assert_eq!(frame.f_opts, &[0x06]);
        assert_eq!(frame.payload, &[0xEE]);
        assert_eq!(frame.mac_commands(), &[0x06]);
    }

    #[test]
    fn options_only_frame_is_port_zero() {
        let config = config();
        let (mut buf, len) = downlink(&config, 1, &[0x08, 0x02], None, &[]);
        let mut rx_count = 0;

        let frame = decode_phy_payload(&config, &mut rx_count, &mut buf[..len]).unwrap();
        assert_eq!(frame.port, None);
        assert_eq!(frame.port(), 0);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.mac_commands(), &[0x08, 0x02]);
    }

    #[test]
    fn port_zero_payload_uses_network_key() {
        let config = config();
        let (mut buf, len) = downlink(&config, 9, &[], Some(0), &[0x06]);
        let mut rx_count = 0;

        let frame = decode_phy_payload(&config, &mut rx_count, &mut buf[..len]).unwrap();
        assert_eq!(frame.mac_commands(), &[0x06]);
    }

    #[test]
    fn stale_counter_is_rejected_untouched() {
        let config = config();
        let (mut buf, len) = downlink(&config, 3, &[], Some(1), b"x");
        let original = buf;
        let mut rx_count = 4;

        assert_eq!(
            decode_phy_payload(&config, &mut rx_count, &mut buf[..len]),
            Err(FrameError::StaleFrameCounter { received: 3, stored: 4 })
        );
        assert_eq!(rx_count, 4);
        assert_eq!(buf, original);
    }

    #[test]
    fn header_checks() {
        let config = config();
        let mut rx_count = 0;

        let (mut buf, len) = downlink(&config, 1, &[], Some(1), b"x");
        buf[0] = 0xA0;
        assert_eq!(
            decode_phy_payload(&config, &mut rx_count, &mut buf[..len]),
            Err(FrameError::UnsupportedMType(0xA0))
        );

        let (mut buf, len) = downlink(&config, 1, &[], Some(1), b"x");
        buf[2] ^= 0x01;
        assert_eq!(
            decode_phy_payload(&config, &mut rx_count, &mut buf[..len]),
            Err(FrameError::AddressMismatch)
        );

        let (mut buf, _) = downlink(&config, 1, &[], None, &[]);
        assert_eq!(
            decode_phy_payload(&config, &mut rx_count, &mut buf[..MIN_FRAME_SIZE - 1]),
            Err(FrameError::TooShort)
        );

        // FOptsLen claims more options than the frame holds
        let (mut buf, len) = downlink(&config, 1, &[], None, &[]);
        buf[5] = 0x03;
        assert_eq!(
            decode_phy_payload(&config, &mut rx_count, &mut buf[..len]),
            Err(FrameError::TooShort)
        );
        assert_eq!(rx_count, 0);
    }

    #[test]
    fn bit_flips_fail_the_mic() {
        let config = config();
        let (pristine, len) = downlink(&config, 7, &[0x02, 0x10, 0x01], Some(4), b"abc");

        // Flips in DevAddr or MHDR are caught before the MIC check; only the
        // MIC itself decides the rest.
        for index in 5..len {
            let mut buf = pristine;
            buf[index] ^= 0x01;
            let mut rx_count = 0;
            let result = decode_phy_payload(&config, &mut rx_count, &mut buf[..len]);
            assert!(result.is_err(), "flip at {} accepted", index);
            assert_eq!(rx_count, 0);
        }
    }
}
