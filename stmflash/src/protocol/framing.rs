//! STM32 USART bootloader framing primitives.
//!
//! This module implements the byte-level building blocks of the AN3155
//! protocol: the command word, the XOR checksum appended to every payload
//! frame, and the small codecs (BCD version byte, hex-ASCII) the rest of
//! the driver relies on.
//!
//! ## Command word
//!
//! Every command opens with the opcode followed by its complement:
//!
//! ```text
//! +--------+-------------+
//! | opcode | opcode^0xFF |
//! +--------+-------------+
//! ```
//!
//! ## Payload frame
//!
//! Multi-byte payloads (addresses, data blocks, page lists) are followed by
//! a single XOR checksum over all preceding payload bytes:
//!
//! ```text
//! +----------------+----------+
//! | payload bytes  | XOR csum |
//! +----------------+----------+
//! ```

use crate::error::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};

/// Positive acknowledge token.
pub const ACK: u8 = 0x79;

/// Negative acknowledge token.
pub const NACK: u8 = 0x1F;

/// Autobaud synchronization byte sent to the freshly-reset bootloader.
pub const SYNC: u8 = 0x7F;

/// Largest block a single ReadMemory/WriteMemory exchange can carry.
pub const MAX_BLOCK: usize = 256;

/// Bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Get the bootloader version and the list of allowed commands.
    Get = 0x00,
    /// Get the bootloader version and the read-protection option bytes.
    GetVersion = 0x01,
    /// Get the 16-bit product ID.
    GetId = 0x02,
    /// Read up to 256 bytes of memory from a given address.
    ReadMemory = 0x11,
    /// Jump to user application code at a given address.
    Go = 0x21,
    /// Write up to 256 bytes of RAM or flash at a given address.
    WriteMemory = 0x31,
    /// Erase flash pages (single-byte page count).
    Erase = 0x43,
    /// Erase flash pages using two-byte addressing (v3.0 bootloaders and up).
    ExtendedErase = 0x44,
    /// Enable write protection for some sectors.
    WriteProtect = 0x63,
    /// Disable write protection for all sectors.
    WriteUnprotect = 0x73,
    /// Enable flash readout protection.
    ReadoutProtect = 0x82,
    /// Disable flash readout protection (triggers a mass erase).
    ReadoutUnprotect = 0x92,
}

impl Command {
    /// All opcodes this driver knows, in ascending opcode order.
    pub const ALL: [Self; 12] = [
        Self::Get,
        Self::GetVersion,
        Self::GetId,
        Self::ReadMemory,
        Self::Go,
        Self::WriteMemory,
        Self::Erase,
        Self::ExtendedErase,
        Self::WriteProtect,
        Self::WriteUnprotect,
        Self::ReadoutProtect,
        Self::ReadoutUnprotect,
    ];

    /// Get the complement byte (opcode XOR 0xFF) that closes the command
    /// word. The bootloader rejects a pair whose second byte is anything
    /// else.
    #[must_use]
    pub fn complement(self) -> u8 {
        !(self as u8)
    }

    /// Get the two-byte command word transmitted on the wire.
    #[must_use]
    pub fn pair(self) -> [u8; 2] {
        [self as u8, self.complement()]
    }

    /// Look an opcode byte up in the known command set.
    #[must_use]
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as u8 == opcode)
    }
}

/// XOR-fold checksum over a payload frame. The checksum of the empty
/// sequence is 0x00.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Build the five-byte address frame: four big-endian address bytes plus
/// their XOR checksum.
#[must_use]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn address_frame(addr: u32) -> [u8; 5] {
    let mut buf = Vec::with_capacity(5);
    buf.write_u32::<BigEndian>(addr).unwrap();
    buf.push(checksum(&buf));
    [buf[0], buf[1], buf[2], buf[3], buf[4]]
}

/// Build the two-byte count frame `(n, n ^ 0xFF)` used by ReadMemory.
#[must_use]
pub fn length_frame(n: u8) -> [u8; 2] {
    [n, n ^ 0xFF]
}

/// Decode the bootloader's two-digit BCD version byte (0x31 -> 31).
#[must_use]
pub fn bcd_to_decimal(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}

/// Encode a decimal in 0..=99 as two-digit BCD (31 -> 0x31).
#[must_use]
pub fn decimal_to_bcd(num: u8) -> u8 {
    (((num % 100) / 10) << 4) | (num % 10)
}

/// Decode a hex-ASCII string into bytes. The input must have even length
/// and contain only base-16 digits.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::MalformedHex(format!(
            "odd length {}: {hex}",
            hex.len()
        )));
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| Error::MalformedHex(format!("invalid digits at {i}: {hex}")))
        })
        .collect()
}
