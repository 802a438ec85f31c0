//! Error types for stmflash.

use std::io;
use thiserror::Error;

/// Result type for stmflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stmflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Device answered NACK (0x1F) before any ACK was seen.
    #[error("Device NACK")]
    Nack,

    /// Deadline elapsed waiting for an ACK or a response frame.
    ///
    /// The message carries the transmitted bytes or the command name so the
    /// failing exchange can be identified from the error alone.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Non-hex characters, odd length, or checksum mismatch in an Intel-HEX
    /// record.
    #[error("Malformed HEX record: {0}")]
    MalformedHex(String),

    /// A recognized response frame did not carry enough bytes for the fields
    /// its command requires.
    #[error("Short response frame: expected {expected} bytes, got {actual}")]
    ShortFrame {
        /// Minimum frame length the command needs.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// Post-write readback differed from the transmitted data.
    #[error("Verify mismatch at {addr:#010X}")]
    VerifyMismatch {
        /// Address of the failing block.
        addr: u32,
        /// Bytes that were written (including 0xFF padding).
        expected: Vec<u8>,
        /// Bytes the device returned.
        actual: Vec<u8>,
    },

    /// The programmer exhausted its retry budget.
    #[error("Write at {addr:#010X} failed: {cause}")]
    WriteFailed {
        /// Address of the block that kept failing.
        addr: u32,
        /// Error from the final attempt.
        cause: Box<Error>,
    },

    /// Firmware file extension is neither `.hex` nor `.bin`.
    #[error("Unsupported firmware format: {0}")]
    UnsupportedFormat(String),
}

impl Error {
    /// Whether the device rejected the exchange (as opposed to the transport
    /// failing or the device staying silent).
    #[must_use]
    pub fn is_nack(&self) -> bool {
        matches!(self, Self::Nack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_mismatch_display_uses_hex_address() {
        let err = Error::VerifyMismatch {
            addr: 0x0800_0100,
            expected: vec![0xAA],
            actual: vec![0xBB],
        };
        assert!(err.to_string().contains("0x08000100"));
    }

    #[test]
    fn test_write_failed_wraps_cause() {
        let err = Error::WriteFailed {
            addr: 0x0800_0000,
            cause: Box::new(Error::Nack),
        };
        assert!(err.to_string().contains("NACK"));
        assert!(!err.is_nack());
        assert!(Error::Nack.is_nack());
    }
}
