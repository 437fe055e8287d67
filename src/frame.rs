//! Frame codec for the keypad and control box serial links.
//!
//! Both links carry frames with the following layout:
//!
//! ```text
//! start | len | opcode | payload ... | checksum | end
//! ```
//!
//! The `len` byte counts every byte from `len` itself through the checksum,
//! so the start and end markers are the only bytes not covered by it.
//! [`FrameFormat::LOCTEK`] matches Loctek control boxes: `0x9b` start marker,
//! `0x9d` end marker and a CRC-16/MODBUS checksum transmitted high byte first.
//!
//! All functions in this module are pure. Callers own the receive buffer
//! and decide what to discard based on the returned [`Parse`] outcome.

use alloc::vec::Vec;
use bitflags_derive::{FlagsDebug, FlagsDisplay};
use core::{
    fmt::{Display, Formatter},
    num::Wrapping,
};
use crc::{CRC_16_MODBUS, Crc};
use log::trace;
use strum::FromRepr;

/// Maximum length of a frame on the wire, including both markers.
pub const MAX_FRAME_LEN: usize = 32;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Framing error.
///
/// Returned by [`FrameFormat::parse`] for corrupt data and by
/// [`FrameFormat::serialize`] for payloads that cannot be framed.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum FrameError {
    /// The data does not begin with the start marker.
    MissingStartMarker,
    /// The declared or actual frame length is out of range.
    InvalidLength,
    /// The byte after the checksum is not the end marker.
    MissingEndMarker,
    /// The checksum does not match the frame contents.
    IncorrectChecksum,
    /// The payload width does not match the opcode.
    InvalidPayloadLength,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::MissingStartMarker => write!(f, "missing start marker"),
            Self::InvalidLength => write!(f, "invalid frame length"),
            Self::MissingEndMarker => write!(f, "missing end marker"),
            Self::IncorrectChecksum => write!(f, "incorrect checksum"),
            Self::InvalidPayloadLength => write!(f, "invalid payload length"),
        }
    }
}

impl core::error::Error for FrameError {}

/// Checksum algorithm protecting a frame.
///
/// The checksum covers the length byte, the opcode and the payload.
/// Multi-byte checksums are transmitted high byte first.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub enum Checksum {
    /// CRC-16/MODBUS, as used by Loctek control boxes.
    #[default]
    Crc16Modbus,
    /// 8-bit sum, wrapping on overflow.
    Sum8,
    /// 8-bit XOR of all bytes.
    Xor8,
}

impl Checksum {
    /// Returns the number of checksum bytes on the wire.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Crc16Modbus => 2,
            Self::Sum8 | Self::Xor8 => 1,
        }
    }

    fn compute(self, data: &[u8]) -> u16 {
        match self {
            Self::Crc16Modbus => CRC16.checksum(data),
            Self::Sum8 => data.iter().map(|&x| Wrapping(x)).sum::<Wrapping<u8>>().0.into(),
            Self::Xor8 => data.iter().fold(0u8, |acc, &x| acc ^ x).into(),
        }
    }

    fn encode(self, val: u16, out: &mut Vec<u8>) {
        out.extend_from_slice(&val.to_be_bytes()[2 - self.width()..]);
    }

    fn decode(bytes: &[u8]) -> u16 {
        bytes
            .iter()
            .fold(0x0000, |acc, &b| (acc << 8) | u16::from(b))
    }
}

/// Opcodes with a known meaning.
///
/// Frames with any other opcode are still valid and are passed through untouched.
#[derive(FromRepr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Opcode {
    /// Keypad button state, sent by the keypad (or injected) towards the control box.
    Buttons = 0x02,
    /// Height display contents, sent by the control box towards the keypad.
    Height = 0x12,
}

impl Opcode {
    /// Returns the fixed payload width of the opcode.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Buttons => 2,
            Self::Height => 3,
        }
    }
}

bitflags::bitflags! {
    /// Keypad buttons.
    ///
    /// Encoded big-endian as the 2-byte payload of a [`Opcode::Buttons`] frame.
    /// An empty set is the keypad's idle frame, which also wakes up the control box.
    #[derive(FlagsDisplay, FlagsDebug, PartialEq, Eq, Copy, Clone)]
    pub struct Buttons: u16 {
        /// Move up.
        const Up = 0x0100;
        /// Move down.
        const Down = 0x0200;
        /// Memory position 1.
        const Preset1 = 0x0400;
        /// Memory position 2.
        const Preset2 = 0x0800;
        /// Memory position 3.
        const Preset3 = 0x1000;
        /// "M" button, used to stop a moving desk.
        const Memory = 0x2000;
        /// Memory position 4.
        const Preset4 = 0x0001;
    }
}

impl Buttons {
    /// Returns the memory slot (1 to 4) if exactly one preset button is pressed.
    #[must_use]
    pub fn preset_slot(self) -> Option<u8> {
        [
            (Self::Preset1, 1),
            (Self::Preset2, 2),
            (Self::Preset3, 3),
            (Self::Preset4, 4),
        ]
        .into_iter()
        .find_map(|(buttons, slot)| (buttons == self).then_some(slot))
    }
}

/// Desk height as shown on the keypad display.
///
/// Stored in tenths of the display unit (centimeters or inches,
/// depending on the control box setting).
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug)]
pub struct Height(u16);

impl Height {
    /// Constructs a height from tenths of the display unit.
    #[must_use]
    pub const fn from_tenths(tenths: u16) -> Self {
        Self(tenths)
    }

    /// Returns the height in tenths of the display unit.
    #[must_use]
    pub const fn tenths(self) -> u16 {
        self.0
    }

    /// Decodes the three seven-segment digits of a height frame.
    ///
    /// Bit 7 of a segment byte is the decimal point following that digit.
    /// Returns [`None`] for a blank display or one showing letters (e.g. error codes).
    #[must_use]
    pub fn decode(segments: [u8; 3]) -> Option<Self> {
        let mut val: u16 = 0;
        let mut decimals = 0;
        let mut lit = false;

        for (i, &seg) in segments.iter().enumerate() {
            let digit = match seg & 0x7f {
                // Leading blank digit
                0x00 if !lit => 0,
                code => decode_digit(code)?,
            };

            lit |= seg & 0x7f != 0x00;
            val = val * 10 + u16::from(digit);

            if seg & 0x80 != 0 {
                decimals = segments.len() - 1 - i;
            }
        }

        if !lit {
            return None;
        }

        match decimals {
            0 => Some(Self(val * 10)),
            1 => Some(Self(val)),
            _ => Some(Self(val / 10)),
        }
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// Decodes a seven-segment digit code (segment `a` in bit 0, `g` in bit 6).
fn decode_digit(code: u8) -> Option<u8> {
    match code {
        0x3f => Some(0),
        0x06 => Some(1),
        0x5b => Some(2),
        0x4f => Some(3),
        0x66 => Some(4),
        0x6d => Some(5),
        0x7d | 0x7c => Some(6),
        0x07 | 0x27 => Some(7),
        0x7f => Some(8),
        0x6f | 0x67 => Some(9),
        _ => None,
    }
}

/// A complete, checksum-verified frame.
///
/// Frames are immutable. The exact wire bytes are kept so that
/// forwarded frames are byte-identical to the received ones.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Frame {
    opcode: u8,
    payload: Vec<u8>,
    bytes: Vec<u8>,
}

impl Frame {
    /// Returns the opcode byte.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Returns the payload bytes between opcode and checksum.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the frame as transmitted on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the pressed buttons if this is a button frame.
    #[must_use]
    pub fn buttons(&self) -> Option<Buttons> {
        if self.opcode != Opcode::Buttons as u8 {
            return None;
        }

        <[u8; 2]>::try_from(self.payload())
            .ok()
            .map(|mask| Buttons::from_bits_retain(u16::from_be_bytes(mask)))
    }

    /// Returns the displayed height if this is a numeric height frame.
    #[must_use]
    pub fn height(&self) -> Option<Height> {
        if self.opcode != Opcode::Height as u8 {
            return None;
        }

        <[u8; 3]>::try_from(self.payload())
            .ok()
            .and_then(Height::decode)
    }
}

/// Outcome of [`FrameFormat::parse`].
#[derive(PartialEq, Eq, Debug)]
pub enum Parse {
    /// A complete frame was found at the start of the buffer.
    ///
    /// The frame occupies the first `frame.as_bytes().len()` bytes.
    Frame(Frame),
    /// More bytes are required. The buffer must be retained.
    Incomplete,
    /// The buffer does not start with a valid frame.
    ///
    /// The caller must resynchronize using [`FrameFormat::resync`].
    Invalid(FrameError),
}

/// Wire format parameters of a link.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct FrameFormat {
    /// Byte marking the start of a frame.
    pub start: u8,
    /// Byte marking the end of a frame.
    pub end: u8,
    /// Checksum algorithm.
    pub checksum: Checksum,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::LOCTEK
    }
}

impl FrameFormat {
    /// Frame format used by Loctek control boxes and keypads.
    pub const LOCTEK: Self = Self {
        start: 0x9b,
        end: 0x9d,
        checksum: Checksum::Crc16Modbus,
    };

    /// Smallest valid value of the length byte (no payload).
    const fn min_len(&self) -> usize {
        2 + self.checksum.width()
    }

    /// Attempts to parse a frame at the start of `buf`.
    pub fn parse(&self, buf: &[u8]) -> Parse {
        let Some((&start, rest)) = buf.split_first() else {
            return Parse::Incomplete;
        };

        if start != self.start {
            return Parse::Invalid(FrameError::MissingStartMarker);
        }

        let Some(&len) = rest.first() else {
            return Parse::Incomplete;
        };
        let len = usize::from(len);

        // Reject bogus lengths early instead of waiting for bytes that never arrive
        if len < self.min_len() || len + 2 > MAX_FRAME_LEN {
            return Parse::Invalid(FrameError::InvalidLength);
        }

        let total = len + 2;

        if buf.len() < total {
            return Parse::Incomplete;
        }

        let bytes = &buf[..total];

        if bytes[total - 1] != self.end {
            return Parse::Invalid(FrameError::MissingEndMarker);
        }

        let (body, checksum) = bytes[1..total - 1].split_at(len - self.checksum.width());

        if Checksum::decode(checksum) != self.checksum.compute(body) {
            return Parse::Invalid(FrameError::IncorrectChecksum);
        }

        let opcode = body[1];
        let payload = &body[2..];

        if let Some(op) = Opcode::from_repr(opcode)
            && payload.len() != op.payload_len()
        {
            return Parse::Invalid(FrameError::InvalidPayloadLength);
        }

        Parse::Frame(Frame {
            opcode,
            payload: payload.to_vec(),
            bytes: bytes.to_vec(),
        })
    }

    /// Returns the number of bytes to discard to reach the next plausible start marker.
    ///
    /// The first byte is always discarded, so repeated calls make progress.
    #[must_use]
    pub fn resync(&self, buf: &[u8]) -> usize {
        buf.iter()
            .skip(1)
            .position(|&b| b == self.start)
            .map_or(buf.len(), |pos| pos + 1)
    }

    /// Builds a frame from an opcode and payload.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidPayloadLength`] if the payload width does not match
    ///   a known opcode or the frame would exceed [`MAX_FRAME_LEN`].
    pub fn serialize(&self, opcode: u8, payload: &[u8]) -> Result<Frame, FrameError> {
        if let Some(op) = Opcode::from_repr(opcode)
            && payload.len() != op.payload_len()
        {
            return Err(FrameError::InvalidPayloadLength);
        }

        if self.min_len() + payload.len() + 2 > MAX_FRAME_LEN {
            return Err(FrameError::InvalidPayloadLength);
        }

        Ok(self.build(opcode, payload))
    }

    /// Decodes a byte string that must contain exactly one frame.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidLength`] if the bytes hold a partial frame or trailing data.
    /// - Any other [`FrameError`] if the frame is corrupt.
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, FrameError> {
        match self.parse(bytes) {
            Parse::Frame(frame) if frame.as_bytes().len() == bytes.len() => Ok(frame),
            Parse::Frame(_) | Parse::Incomplete => Err(FrameError::InvalidLength),
            Parse::Invalid(err) => Err(err),
        }
    }

    /// Builds a keypad button frame.
    #[must_use]
    pub fn command(&self, buttons: Buttons) -> Frame {
        self.build(Opcode::Buttons as u8, &buttons.bits().to_be_bytes())
    }

    /// Builds a frame without validating the payload width.
    fn build(&self, opcode: u8, payload: &[u8]) -> Frame {
        let len = self.min_len() + payload.len();
        let mut bytes = Vec::with_capacity(len + 2);

        bytes.push(self.start);
        bytes.push(u8::try_from(len).unwrap_or(u8::MAX));
        bytes.push(opcode);
        bytes.extend_from_slice(payload);
        self.checksum
            .encode(self.checksum.compute(&bytes[1..]), &mut bytes);
        bytes.push(self.end);

        trace!("New frame: {bytes:02x?}");

        Frame {
            opcode,
            payload: payload.to_vec(),
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::init_logger;
    use alloc::string::ToString;

    const WAKE_UP: [u8; 8] = [0x9b, 0x06, 0x02, 0x00, 0x00, 0x6c, 0xa1, 0x9d];
    const UP: [u8; 8] = [0x9b, 0x06, 0x02, 0x01, 0x00, 0xfc, 0xa0, 0x9d];
    const DOWN: [u8; 8] = [0x9b, 0x06, 0x02, 0x02, 0x00, 0x0c, 0xa0, 0x9d];
    const STOP: [u8; 8] = [0x9b, 0x06, 0x02, 0x20, 0x00, 0xac, 0xb8, 0x9d];
    const PRESET_1: [u8; 8] = [0x9b, 0x06, 0x02, 0x04, 0x00, 0xac, 0xa3, 0x9d];
    const PRESET_4: [u8; 8] = [0x9b, 0x06, 0x02, 0x00, 0x01, 0xac, 0x60, 0x9d];

    #[test]
    fn command_frames() {
        init_logger();

        let fmt = FrameFormat::LOCTEK;

        assert_eq!(
            fmt.command(Buttons::empty()).as_bytes(),
            WAKE_UP,
            "wake-up frame should be correct"
        );
        assert_eq!(fmt.command(Buttons::Up).as_bytes(), UP, "up frame should be correct");
        assert_eq!(
            fmt.command(Buttons::Down).as_bytes(),
            DOWN,
            "down frame should be correct"
        );
        assert_eq!(
            fmt.command(Buttons::Memory).as_bytes(),
            STOP,
            "stop frame should be correct"
        );
        assert_eq!(
            fmt.command(Buttons::Preset1).as_bytes(),
            PRESET_1,
            "preset 1 frame should be correct"
        );
        assert_eq!(
            fmt.command(Buttons::Preset4).as_bytes(),
            PRESET_4,
            "preset 4 frame should be correct"
        );
    }

    #[test]
    fn parse_button_frame() {
        init_logger();

        let Parse::Frame(frame) = FrameFormat::LOCTEK.parse(&PRESET_4) else {
            panic!("frame should be parsed");
        };

        assert_eq!(frame.opcode(), 0x02, "opcode should be correct");
        assert_eq!(frame.payload(), [0x00, 0x01], "payload should be correct");
        assert_eq!(frame.buttons(), Some(Buttons::Preset4), "buttons should be correct");
        assert_eq!(
            frame.buttons().and_then(Buttons::preset_slot),
            Some(4),
            "preset slot should be correct"
        );
    }

    #[test]
    fn parse_round_trip() {
        init_logger();

        for fmt in [
            FrameFormat::LOCTEK,
            FrameFormat {
                start: 0x9a,
                end: 0x9c,
                checksum: Checksum::Sum8,
            },
            FrameFormat {
                checksum: Checksum::Xor8,
                ..FrameFormat::LOCTEK
            },
        ] {
            let frame = fmt
                .serialize(0x12, &[0x07, 0xdb, 0x6d])
                .expect("payload should be valid");

            assert_eq!(
                fmt.parse(frame.as_bytes()),
                Parse::Frame(frame.clone()),
                "parsed frame should equal serialized frame"
            );

            let frame = fmt
                .serialize(0x42, &[0x01, 0x02, 0x03, 0x04, 0x05])
                .expect("payload should be valid");

            assert_eq!(
                fmt.decode(frame.as_bytes()),
                Ok(frame),
                "decoded frame should equal serialized frame"
            );
        }
    }

    #[test]
    fn parse_incomplete() {
        init_logger();

        let fmt = FrameFormat::LOCTEK;

        for len in 0..UP.len() {
            assert_eq!(
                fmt.parse(&UP[..len]),
                Parse::Incomplete,
                "partial frame should be incomplete"
            );
        }
    }

    #[test]
    fn parse_trailing_bytes() {
        init_logger();

        let mut buf = UP.to_vec();

        buf.extend_from_slice(&DOWN[..3]);

        let Parse::Frame(frame) = FrameFormat::LOCTEK.parse(&buf) else {
            panic!("frame should be parsed");
        };

        assert_eq!(frame.as_bytes(), UP, "only the first frame should be consumed");
    }

    #[test]
    fn error_checksum_bit_flip() {
        init_logger();

        let fmt = FrameFormat::LOCTEK;

        for byte in 5..7 {
            for bit in 0..8 {
                let mut buf = UP;

                buf[byte] ^= 1 << bit;

                assert_eq!(
                    fmt.parse(&buf),
                    Parse::Invalid(FrameError::IncorrectChecksum),
                    "flipped checksum bit should be rejected"
                );
            }
        }
    }

    #[test]
    fn error_payload_bit_flip() {
        init_logger();

        let mut buf = PRESET_1;

        buf[3] ^= 0x01;

        assert_eq!(
            FrameFormat::LOCTEK.parse(&buf),
            Parse::Invalid(FrameError::IncorrectChecksum),
            "corrupted payload should be rejected"
        );
    }

    #[test]
    fn error_markers() {
        init_logger();

        let fmt = FrameFormat::LOCTEK;
        let mut buf = UP;

        buf[7] = 0x00;

        assert_eq!(
            fmt.parse(&buf),
            Parse::Invalid(FrameError::MissingEndMarker),
            "missing end marker should be rejected"
        );
        assert_eq!(
            fmt.parse(&UP[1..]),
            Parse::Invalid(FrameError::MissingStartMarker),
            "missing start marker should be rejected"
        );
        assert_eq!(
            fmt.parse(&[0x9b, 0xff]),
            Parse::Invalid(FrameError::InvalidLength),
            "oversized length should be rejected"
        );
        assert_eq!(
            fmt.parse(&[0x9b, 0x01]),
            Parse::Invalid(FrameError::InvalidLength),
            "undersized length should be rejected"
        );
    }

    #[test]
    fn resync() {
        init_logger();

        let fmt = FrameFormat::LOCTEK;

        assert_eq!(fmt.resync(&[0x9b, 0x00, 0x11, 0x9b, 0x06]), 3);
        assert_eq!(fmt.resync(&[0x00, 0x11, 0x22]), 3);
        assert_eq!(fmt.resync(&[0x9b]), 1);
    }

    #[test]
    fn error_serialize_payload_width() {
        init_logger();

        let fmt = FrameFormat::LOCTEK;

        assert_eq!(
            fmt.serialize(Opcode::Buttons as u8, &[0x01]),
            Err(FrameError::InvalidPayloadLength),
            "short button payload should be rejected"
        );
        assert_eq!(
            fmt.serialize(Opcode::Height as u8, &[0x00; 8]),
            Err(FrameError::InvalidPayloadLength),
            "long height payload should be rejected"
        );
        assert_eq!(
            fmt.serialize(0x42, &[0x00; 40]),
            Err(FrameError::InvalidPayloadLength),
            "oversized payload should be rejected"
        );
    }

    #[test]
    fn error_decode_trailing_data() {
        init_logger();

        let mut buf = UP.to_vec();

        buf.push(0x00);

        assert_eq!(
            FrameFormat::LOCTEK.decode(&buf),
            Err(FrameError::InvalidLength),
            "trailing data should be rejected"
        );
        assert_eq!(
            FrameFormat::LOCTEK.decode(&UP[..6]),
            Err(FrameError::InvalidLength),
            "partial frame should be rejected"
        );
    }

    #[test]
    fn decode_height() {
        init_logger();

        assert_eq!(
            Height::decode([0x07, 0x5b | 0x80, 0x6d]),
            Some(Height::from_tenths(725)),
            "72.5 should be decoded"
        );
        assert_eq!(
            Height::decode([0x06, 0x5b, 0x3f]),
            Some(Height::from_tenths(1200)),
            "120 should be decoded"
        );
        assert_eq!(
            Height::decode([0x00, 0x7f, 0x6d]),
            Some(Height::from_tenths(850)),
            "leading blank should be decoded"
        );
        assert_eq!(Height::decode([0x00, 0x00, 0x00]), None, "blank display");
        assert_eq!(Height::decode([0x79, 0x3f, 0x06]), None, "error code display");
        assert_eq!(Height::from_tenths(725).to_string(), "72.5");
    }

    #[test]
    fn height_frame() {
        init_logger();

        let fmt = FrameFormat::LOCTEK;
        let frame = fmt
            .serialize(Opcode::Height as u8, &[0x07, 0xdb, 0x6d])
            .expect("payload should be valid");

        assert_eq!(frame.as_bytes()[..3], [0x9b, 0x07, 0x12]);
        assert_eq!(frame.height(), Some(Height::from_tenths(725)));
        assert_eq!(frame.buttons(), None);
    }
}
