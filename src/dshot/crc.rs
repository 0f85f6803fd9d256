//! # DShot Checksum
//!
//! 4-bit checksum appended to every DShot frame.
//!
//! The 12 data bits (11-bit command + telemetry flag) are split into three
//! nibbles which are XOR-ed together. ESCs silently drop frames whose low
//! nibble does not match.

use super::protocol::DSHOT_CHECKSUM_MASK;

/// Calculate the DShot checksum of the 12 data bits
///
/// # Arguments
///
/// * `data` - Command and telemetry flag, `(command << 1) | telemetry`
///
/// # Returns
///
/// * `u16` - Checksum in the low nibble
///
/// # Examples
///
/// ```
/// use dshot_gpio::dshot::crc::dshot_checksum;
///
/// // Command 48, no telemetry: data = 0x060, nibbles 0 ^ 6 ^ 0
/// assert_eq!(dshot_checksum(0x060), 0x6);
/// ```
pub fn dshot_checksum(data: u16) -> u16 {
    (data ^ (data >> 4) ^ (data >> 8)) & DSHOT_CHECKSUM_MASK
}

/// Calculate the checksum one nibble at a time (slow, for verification)
#[allow(dead_code)]
fn dshot_checksum_slow(data: u16) -> u16 {
    let mut csum = 0;
    let mut remaining = data;

    for _ in 0..3 {
        csum ^= remaining & DSHOT_CHECKSUM_MASK;
        remaining >>= 4;
    }

    csum
}
