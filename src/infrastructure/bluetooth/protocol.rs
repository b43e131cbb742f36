//! Light Control Protocol
//!
//! Every command is a fixed 20-byte frame written to the control
//! characteristic without response.
//!
//! # Frame Structure (20 bytes)
//!
//! ```text
//! [0]     : 0x33 header
//! [1]     : Command (see LedCommand)
//! [2-18]  : Payload, zero padded to 17 bytes
//! [19]    : Checksum, XOR of bytes 0..19
//! ```
//!
//! # Color payloads
//!
//! ```text
//! Simple   : [led_mode, r, g, b]
//! Extended : [led_mode, 0x01, r, g, b, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x74]
//! ```

use crate::domain::error::ProtocolError;
use crate::domain::models::{AttrValue, Rgb};
use crate::domain::registry::{ColorMode, ModelDescriptor};
use std::fmt;
use uuid::Uuid;

/// Control characteristic every command frame is written to.
pub const CONTROL_CHAR_UUID: &str = "00010203-0405-0607-0809-0a0b0c0d2b11";

pub const FRAME_HEADER: u8 = 0x33;
pub const FRAME_LEN: usize = 20;
pub const MAX_PAYLOAD_LEN: usize = 17;

/// Control command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedCommand {
    /// Payload `[0|1]`
    Power = 0x01,
    /// Payload `[level]`, device units
    Brightness = 0x04,
    /// Payload per color mode
    Color = 0x05,
}

impl LedCommand {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Power),
            0x04 => Some(Self::Brightness),
            0x05 => Some(Self::Color),
            _ => None,
        }
    }
}

/// A complete, checksummed wire frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Validate raw bytes: length, header and checksum.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: [u8; FRAME_LEN] = bytes.try_into().map_err(|_| ProtocolError::InvalidLength {
            expected: FRAME_LEN,
            actual: bytes.len(),
        })?;

        if raw[0] != FRAME_HEADER {
            return Err(ProtocolError::InvalidHeader(raw[0]));
        }

        let expected = checksum(&raw[..FRAME_LEN - 1]);
        let actual = raw[FRAME_LEN - 1];
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn command(&self) -> u8 {
        self.0[1]
    }

    /// The padded 17-byte payload.
    pub fn payload(&self) -> &[u8] {
        &self.0[2..FRAME_LEN - 1]
    }

    pub fn checksum(&self) -> u8 {
        self.0[FRAME_LEN - 1]
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.to_hex())
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Build a frame for `command` with `payload` (at most 17 bytes).
pub fn encode(command: u8, payload: &[u8]) -> Result<Frame, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut raw = [0u8; FRAME_LEN];
    raw[0] = FRAME_HEADER;
    raw[1] = command;
    raw[2..2 + payload.len()].copy_from_slice(payload);
    raw[FRAME_LEN - 1] = checksum(&raw[..FRAME_LEN - 1]);

    Ok(Frame(raw))
}

/// Color payload in the layout `descriptor` expects.
pub fn color_payload(descriptor: &ModelDescriptor, rgb: Rgb) -> Vec<u8> {
    match descriptor.color_mode {
        ColorMode::Simple => vec![descriptor.led_mode, rgb.r, rgb.g, rgb.b],
        ColorMode::Extended => vec![
            descriptor.led_mode,
            0x01,
            rgb.r,
            rgb.g,
            rgb.b,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            0xFF,
            0x74,
        ],
    }
}

pub fn power_frame(on: bool) -> Result<Frame, ProtocolError> {
    encode(LedCommand::Power.code(), &[u8::from(on)])
}

pub fn brightness_frame(level: u16) -> Result<Frame, ProtocolError> {
    let level = u8::try_from(level).map_err(|_| ProtocolError::ValueOutOfRange {
        field: "brightness",
        value: level,
    })?;
    encode(LedCommand::Brightness.code(), &[level])
}

pub fn color_frame(descriptor: &ModelDescriptor, rgb: Rgb) -> Result<Frame, ProtocolError> {
    encode(LedCommand::Color.code(), &color_payload(descriptor, rgb))
}

/// The frame that puts a light into the state described by `value`.
pub fn attr_frame(descriptor: &ModelDescriptor, value: AttrValue) -> Result<Frame, ProtocolError> {
    match value {
        AttrValue::Power(on) => power_frame(on),
        AttrValue::Brightness(level) => brightness_frame(level),
        AttrValue::Rgb(rgb) => color_frame(descriptor, rgb),
    }
}

/// Parse a characteristic UUID string.
pub fn parse_uuid(uuid_str: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid UUID format {:?}: {}", uuid_str, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::{led_mode, ModelRegistry};

    #[test]
    fn test_frame_is_twenty_bytes_with_xor_checksum() {
        for len in 0..=MAX_PAYLOAD_LEN {
            let payload: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let frame = encode(0x05, &payload).unwrap();
            let bytes = frame.as_bytes();

            assert_eq!(bytes.len(), FRAME_LEN);
            assert_eq!(bytes[19], bytes[..19].iter().fold(0, |acc, b| acc ^ b));
            assert_eq!(&frame.payload()[..len], payload.as_slice());
            assert!(frame.payload()[len..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_payload_too_large() {
        let err = encode(0x05, &[0u8; 18]).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTooLarge { len: 18, max: 17 });
        assert!(encode(0x05, &[0u8; 17]).is_ok());
    }

    #[test]
    fn test_power_frame_bytes() {
        let frame = power_frame(true).unwrap();
        let mut expected = [0u8; FRAME_LEN];
        expected[0] = 0x33;
        expected[1] = 0x01;
        expected[2] = 0x01;
        expected[19] = 0x33;
        assert_eq!(frame.as_bytes(), &expected);
    }

    #[test]
    fn test_simple_color_payload() {
        let descriptor = ModelRegistry::builtin().lookup("default");
        let payload = color_payload(&descriptor, Rgb::new(10, 20, 30));
        assert_eq!(payload, vec![led_mode::MODE_2, 10, 20, 30]);
    }

    #[test]
    fn test_extended_color_payload() {
        let descriptor = ModelRegistry::builtin().lookup("H6072");
        let payload = color_payload(&descriptor, Rgb::new(1, 2, 3));
        assert_eq!(
            payload,
            vec![led_mode::MODE_1501, 0x01, 1, 2, 3, 0, 0, 0, 0, 0, 0xFF, 0x74]
        );

        let frame = color_frame(&descriptor, Rgb::new(1, 2, 3)).unwrap();
        assert_eq!(frame.command(), LedCommand::Color.code());
        assert_eq!(&frame.payload()[..12], payload.as_slice());
    }

    #[test]
    fn test_brightness_must_fit_a_byte() {
        assert!(brightness_frame(255).is_ok());
        assert!(matches!(
            brightness_frame(256),
            Err(ProtocolError::ValueOutOfRange { value: 256, .. })
        ));
    }

    #[test]
    fn test_parse_validates_frame() {
        let frame = power_frame(false).unwrap();
        assert_eq!(Frame::parse(frame.as_bytes()).unwrap(), frame);

        assert!(matches!(
            Frame::parse(&frame.as_bytes()[..19]),
            Err(ProtocolError::InvalidLength { actual: 19, .. })
        ));

        let mut bad_header = *frame.as_bytes();
        bad_header[0] = 0xAA;
        assert_eq!(
            Frame::parse(&bad_header),
            Err(ProtocolError::InvalidHeader(0xAA))
        );

        let mut bad_checksum = *frame.as_bytes();
        bad_checksum[19] ^= 0xFF;
        assert!(matches!(
            Frame::parse(&bad_checksum),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(LedCommand::from_code(0x04), Some(LedCommand::Brightness));
        assert_eq!(LedCommand::from_code(0x02), None);
    }

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid(CONTROL_CHAR_UUID).unwrap();
        assert_eq!(uuid.as_bytes()[0], 0x00);
        assert_eq!(uuid.as_bytes()[15], 0x11);
        assert!(parse_uuid("not-a-uuid").is_err());
    }
}
