//! # DShot Protocol Constants and Types
//!
//! Core protocol definitions for DShot ESC communication.

use serde::Deserialize;
use std::fmt;

/// Bits per DShot frame
pub const DSHOT_FRAME_BITS: u32 = 16;

/// Command value range (11-bit: 0-2047)
pub const DSHOT_COMMAND_MIN: u16 = 0;
pub const DSHOT_COMMAND_MAX: u16 = 2047;

/// Highest value reserved for special commands
pub const DSHOT_SPECIAL_COMMAND_MAX: u16 = 47;

/// Canonical "armed, zero throttle" value
pub const DSHOT_THROTTLE_ZERO: u16 = 48;

/// Throttle speed range accepted by [`ThrottleCommand::from_throttle`] (0-1999)
pub const DSHOT_THROTTLE_SPEED_MAX: u16 = DSHOT_COMMAND_MAX - DSHOT_THROTTLE_ZERO;

/// Telemetry request flag position within the frame
pub const DSHOT_TELEMETRY_BIT: u16 = 1 << 4;

/// Checksum mask (low nibble)
pub const DSHOT_CHECKSUM_MASK: u16 = 0x000F;

/// High-time of a `1` bit, in eighths of the bit period (75%)
const ONE_HIGH_EIGHTHS: u64 = 6;

/// High-time of a `0` bit, in sixteenths of the bit period (37.5%)
const ZERO_HIGH_SIXTEENTHS: u64 = 6;

/// DShot speed class
///
/// The classes differ only in bit period. The duty cycles that distinguish a
/// `1` from a `0` are fixed fractions of the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DshotSpeed {
    /// 150 kbit/s, 6.667 µs per bit
    Dshot150,
    /// 300 kbit/s, 3.333 µs per bit
    Dshot300,
    /// 600 kbit/s, 1.667 µs per bit
    Dshot600,
    /// 1200 kbit/s, 0.833 µs per bit
    Dshot1200,
}

impl Default for DshotSpeed {
    fn default() -> Self {
        DshotSpeed::Dshot150
    }
}

impl DshotSpeed {
    /// Bit rate in kbit/s
    pub fn kbit_per_s(self) -> u32 {
        match self {
            DshotSpeed::Dshot150 => 150,
            DshotSpeed::Dshot300 => 300,
            DshotSpeed::Dshot600 => 600,
            DshotSpeed::Dshot1200 => 1200,
        }
    }

    /// Bit period T in nanoseconds, rounded to the nearest nanosecond
    pub fn bit_period_ns(self) -> u64 {
        let kbps = self.kbit_per_s() as u64;
        (1_000_000 + kbps / 2) / kbps
    }

    /// High-time of a `1` bit in nanoseconds (0.75 × T, rounded down)
    pub fn one_high_ns(self) -> u64 {
        self.bit_period_ns() * ONE_HIGH_EIGHTHS / 8
    }

    /// High-time of a `0` bit in nanoseconds (0.375 × T, rounded down)
    pub fn zero_high_ns(self) -> u64 {
        self.bit_period_ns() * ZERO_HIGH_SIXTEENTHS / 16
    }

    /// Duration of the 16 data bits in nanoseconds
    pub fn frame_ns(self) -> u64 {
        self.bit_period_ns() * DSHOT_FRAME_BITS as u64
    }
}

impl fmt::Display for DshotSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DShot{}", self.kbit_per_s())
    }
}

/// Validated 11-bit command value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThrottleCommand(pub(crate) u16);

impl ThrottleCommand {
    /// Zero throttle (value 48)
    pub const ZERO: ThrottleCommand = ThrottleCommand(DSHOT_THROTTLE_ZERO);

    /// Wrap a raw command value, rejecting anything above 2047
    pub fn new(value: u16) -> Option<Self> {
        (value <= DSHOT_COMMAND_MAX).then_some(Self(value))
    }

    /// Map a throttle speed (0-1999) onto command values 48-2047
    ///
    /// Speeds above 1999 are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use dshot_gpio::dshot::protocol::ThrottleCommand;
    ///
    /// assert_eq!(ThrottleCommand::from_throttle(0).map(ThrottleCommand::value), Some(48));
    /// assert_eq!(ThrottleCommand::from_throttle(1999).map(ThrottleCommand::value), Some(2047));
    /// assert_eq!(ThrottleCommand::from_throttle(2000), None);
    /// ```
    pub fn from_throttle(speed: u16) -> Option<Self> {
        (speed <= DSHOT_THROTTLE_SPEED_MAX).then_some(Self(speed + DSHOT_THROTTLE_ZERO))
    }

    /// Raw 11-bit value
    pub fn value(self) -> u16 {
        self.0
    }

    /// Whether this value is in the special-command range (0-47)
    pub fn is_special(self) -> bool {
        self.0 <= DSHOT_SPECIAL_COMMAND_MAX
    }
}

impl From<ThrottleCommand> for u16 {
    fn from(command: ThrottleCommand) -> u16 {
        command.0
    }
}

/// Numeric pin identifier (BCM numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pin(pub u32);

impl Pin {
    /// BCM line number
    pub fn number(self) -> u32 {
        self.0
    }
}

impl From<u32> for Pin {
    fn from(number: u32) -> Self {
        Pin(number)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}
