//! Intel-HEX record format.
//!
//! Firmware images in `.hex` form are ASCII files of colon-framed records:
//!
//! ```text
//! :LLAAAATT<data bytes...>CC
//! ```
//!
//! `LL` is the data byte count, `AAAA` a 16-bit load offset, `TT` the
//! record type and `CC` a two's-complement checksum over everything after
//! the colon. Only data records carry flash contents; extended linear
//! address records relocate the upper 16 address bits for images larger
//! than 64 KiB.

use crate::error::{Error, Result};
use crate::protocol::framing::hex_to_bytes;

/// Intel-HEX record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Flash contents at the record's offset.
    Data,
    /// End of image.
    EndOfFile,
    /// Extended segment address (bits 4..20 of the base).
    ExtendedSegmentAddress,
    /// Start segment address (CS:IP, ignored for flashing).
    StartSegmentAddress,
    /// Extended linear address (upper 16 bits of the base).
    ExtendedLinearAddress,
    /// Start linear address (entry point, ignored for flashing).
    StartLinearAddress,
    /// Any type byte this driver does not interpret.
    Other(u8),
}

impl From<u8> for RecordKind {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x02 => Self::ExtendedSegmentAddress,
            0x03 => Self::StartSegmentAddress,
            0x04 => Self::ExtendedLinearAddress,
            0x05 => Self::StartLinearAddress,
            other => Self::Other(other),
        }
    }
}

/// One decoded Intel-HEX record.
#[derive(Debug, Clone)]
pub struct Record {
    /// 16-bit load offset from the record header.
    pub offset: u16,
    /// Record type.
    pub kind: RecordKind,
    /// Payload with the trailing checksum stripped.
    pub data: Vec<u8>,
}

impl Record {
    /// Parse one line of a `.hex` file.
    ///
    /// Returns `Ok(None)` for records that decode to fewer than the four
    /// header bytes; the programmer skips those. The trailing record
    /// checksum is verified and a mismatch is `MalformedHex`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(body) = line.strip_prefix(':') else {
            return Err(Error::MalformedHex(format!("missing ':' prefix: {line}")));
        };

        let bytes = hex_to_bytes(body)?;
        if bytes.len() < 4 {
            return Ok(None);
        }

        // Two's-complement checksum: all record bytes (checksum included)
        // sum to zero modulo 256.
        let sum = bytes
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(Error::MalformedHex(format!(
                "record checksum mismatch (sum {sum:#04X}): {line}"
            )));
        }

        Ok(Some(Self {
            offset: (u16::from(bytes[1]) << 8) | u16::from(bytes[2]),
            kind: RecordKind::from(bytes[3]),
            data: bytes[4..bytes.len() - 1].to_vec(),
        }))
    }

    /// For an extended linear address record, the base address its payload
    /// selects (upper 16 bits shifted into place).
    #[must_use]
    pub fn linear_base(&self) -> Option<u32> {
        if self.kind == RecordKind::ExtendedLinearAddress && self.data.len() == 2 {
            Some((u32::from(self.data[0]) << 24) | (u32::from(self.data[1]) << 16))
        } else {
            None
        }
    }
}
