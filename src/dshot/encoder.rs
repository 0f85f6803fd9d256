//! # DShot Frame Encoder
//!
//! Packs a command value and telemetry flag into a checksummed 16-bit frame.
//!
//! ```text
//! bit 15                      5    4    3      0
//!     [ command (11 bits)     ][ T ][ checksum ]
//! ```

use super::crc::dshot_checksum;
use super::protocol::*;
use crate::error::EncodeError;

/// A checksummed 16-bit DShot frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame(u16);

impl Frame {
    /// Build a frame from an already validated command
    pub fn from_command(command: ThrottleCommand, telemetry: bool) -> Self {
        let data = (command.value() << 1) | u16::from(telemetry);
        Frame((data << 4) | dshot_checksum(data))
    }

    /// Interpret a raw 16-bit value as a frame, verifying its checksum
    ///
    /// # Returns
    ///
    /// * `Option<Frame>` - Frame if the low nibble matches, `None` otherwise
    pub fn decode(raw: u16) -> Option<Self> {
        (dshot_checksum(raw >> 4) == raw & DSHOT_CHECKSUM_MASK).then_some(Frame(raw))
    }

    /// Raw 16-bit value as transmitted
    pub fn value(self) -> u16 {
        self.0
    }

    /// 11-bit command value
    pub fn command(self) -> u16 {
        self.0 >> 5
    }

    /// Whether the telemetry request flag is set
    pub fn telemetry(self) -> bool {
        self.0 & DSHOT_TELEMETRY_BIT != 0
    }

    /// 4-bit checksum
    pub fn checksum(self) -> u16 {
        self.0 & DSHOT_CHECKSUM_MASK
    }

    /// Frame bits in transmission order (most significant first)
    pub fn bits(self) -> impl Iterator<Item = bool> {
        (0..DSHOT_FRAME_BITS).rev().map(move |i| (self.0 >> i) & 1 == 1)
    }
}

impl From<Frame> for u16 {
    fn from(frame: Frame) -> u16 {
        frame.0
    }
}

/// Encode a command value and telemetry flag into a DShot frame
///
/// # Arguments
///
/// * `command` - Command value (0-2047); 48 is zero throttle
/// * `telemetry` - Request a telemetry reply from the ESC
///
/// # Returns
///
/// * `Result<Frame, EncodeError>` - Frame, or `InvalidCommandRange`
///
/// # Examples
///
/// ```
/// use dshot_gpio::dshot::encoder::encode;
///
/// let frame = encode(48, false).unwrap();
/// assert_eq!(frame.value(), 0x0606);
///
/// assert!(encode(-1, false).is_err());
/// assert!(encode(2048, false).is_err());
/// ```
pub fn encode(command: impl Into<i64>, telemetry: bool) -> Result<Frame, EncodeError> {
    let command = command.into();

    let validated = u16::try_from(command)
        .ok()
        .and_then(ThrottleCommand::new)
        .ok_or(EncodeError::InvalidCommandRange(command))?;

    Ok(Frame::from_command(validated, telemetry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_zero_throttle_fixture() {
        // 48 << 1 = 0x060, checksum 0 ^ 6 ^ 0 = 6
        let frame = encode(48, false).unwrap();
        assert_eq!(frame.value(), 0x0606);
        assert_eq!(frame.command(), 48);
        assert!(!frame.telemetry());
        assert_eq!(frame.checksum(), 0x6);
    }

    #[test]
    fn test_encode_fixtures() {
        assert_eq!(encode(0, false).unwrap().value(), 0x0000);
        assert_eq!(encode(99, false).unwrap().value(), 0x0C6A);
        assert_eq!(encode(199, false).unwrap().value(), 0x18E7);
        assert_eq!(encode(2047, false).unwrap().value(), 0xFFEE);
        assert_eq!(encode(2047, true).unwrap().value(), 0xFFFF);
    }

    #[test]
    fn test_encode_range_boundaries() {
        assert!(encode(0, false).is_ok());
        assert!(encode(2047, false).is_ok());
        assert_eq!(encode(-1, false), Err(EncodeError::InvalidCommandRange(-1)));
        assert_eq!(encode(2048, false), Err(EncodeError::InvalidCommandRange(2048)));
        assert_eq!(encode(u16::MAX, true), Err(EncodeError::InvalidCommandRange(65535)));
        assert!(encode(i64::MIN, false).is_err());
    }

    #[test]
    fn test_checksum_property_for_all_commands() {
        for command in 0..=2047u16 {
            for telemetry in [false, true] {
                let frame = encode(command, telemetry).unwrap();
                let high = frame.value() >> 4;
                let folded = (high & 0xF) ^ ((high >> 4) & 0xF) ^ ((high >> 8) & 0xF);

                assert_eq!(frame.checksum(), folded, "command {} telemetry {}", command, telemetry);
                assert_eq!(frame.command(), command);
                assert_eq!(frame.telemetry(), telemetry);
                assert_eq!(Frame::decode(frame.value()), Some(frame));
            }
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        for command in [0u16, 48, 99, 1046, 2047] {
            assert_eq!(encode(command, true), encode(command, true));
            assert_eq!(encode(command, false), encode(command, false));
        }
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let frame = encode(99, false).unwrap();
        assert_eq!(Frame::decode(frame.value() ^ 0x1), None);
        assert_eq!(Frame::decode(frame.value() ^ 0x8000), None);
    }

    #[test]
    fn test_bits_msb_first() {
        let frame = encode(48, false).unwrap();
        let bits: Vec<bool> = frame.bits().collect();

        // 0x0606 = 0000 0110 0000 0110
        let expected = [
            false, false, false, false, false, true, true, false,
            false, false, false, false, false, true, true, false,
        ];
        assert_eq!(bits, expected);
    }

    #[test]
    fn test_bits_roundtrip_value() {
        let frame = encode(1337, true).unwrap();
        let rebuilt = frame.bits().fold(0u16, |acc, bit| (acc << 1) | u16::from(bit));
        assert_eq!(rebuilt, frame.value());
    }

    #[test]
    fn test_from_throttle_matches_encode() {
        // Speed 998 -> command 1046, checksum 6 without telemetry, 7 with
        let frame = Frame::from_command(ThrottleCommand::from_throttle(998).unwrap(), false);
        assert_eq!(frame.command(), 1046);
        assert_eq!(frame.checksum(), 0x6);

        let frame = Frame::from_command(ThrottleCommand::from_throttle(998).unwrap(), true);
        assert_eq!(frame.checksum(), 0x7);
        assert_eq!(u16::from(frame), encode(1046, true).unwrap().value());
    }
}
