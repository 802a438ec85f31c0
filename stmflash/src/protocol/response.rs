//! Bootloader response recognition.
//!
//! Responses arrive as a byte stream with no out-of-band framing: the only
//! delimiters are the ACK sentinels and, for most commands, a length byte.
//! [`ResponseScanner`] accumulates raw bytes from the transport and reports
//! when a complete frame for the originating command has been seen.
//!
//! Frame shapes, keyed by command:
//!
//! ```text
//! Get:           79 <N> <version> <opcodes: N+1 bytes> 79   (N = opcodes - 1)
//! GetId:         79 <N> <payload: N+1 bytes> 79             (N = payload - 1)
//! GetVersion:    79 <version> <opt1> <opt2> 79              (fixed, N ignored)
//! ReadMemory:    79 <data: len bytes>                       (no trailing sentinel)
//! ```
//!
//! The Get length byte counts only the opcode list; the version byte that
//! precedes it is carried in addition, so a Get frame spans one byte more
//! than the other length-delimited responses.

use crate::error::{Error, Result};
use crate::protocol::framing::{ACK, Command, NACK};

/// Incremental recognizer for one bootloader response.
///
/// Feed transport bytes through [`push`](Self::push) until it yields a
/// complete frame. A fresh scanner is required for every command exchange.
#[derive(Debug)]
pub struct ResponseScanner {
    command: Command,
    expected_len: usize,
    buf: Vec<u8>,
    acked: bool,
}

impl ResponseScanner {
    /// Create a scanner for a response to `command`.
    ///
    /// `expected_len` is the fixed payload size minus one for
    /// ReadMemory-style reads, or 0 to derive the frame size from the
    /// stream itself.
    #[must_use]
    pub fn new(command: Command, expected_len: usize) -> Self {
        Self {
            command,
            expected_len,
            buf: Vec::new(),
            acked: false,
        }
    }

    /// Append freshly-read transport bytes and try to recognize a frame.
    ///
    /// Returns `Ok(Some(frame))` once a complete response (leading ACK
    /// included) has been assembled, `Ok(None)` while more bytes are
    /// needed, and `Err(Nack)` if the device rejected the command before
    /// acknowledging it. Garbage bytes around the frame are skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);

        for index in 0..self.buf.len() {
            let byte = self.buf[index];

            // A frame can only start at an ACK that has at least one byte
            // after it; a lone trailing ACK may still be a frame start once
            // more bytes arrive.
            if byte == ACK && index + 1 < self.buf.len() {
                self.acked = true;

                let end = if self.expected_len > 0 {
                    index + self.expected_len + 2
                } else if self.command == Command::GetVersion {
                    // Fixed ACK/version/opt1/opt2/ACK shape; the stream's
                    // length byte is not consulted for this command.
                    index + 5
                } else if self.command == Command::Get {
                    // The length byte counts only the opcodes; the version
                    // byte rides along on top of it.
                    index + self.buf[index + 1] as usize + 5
                } else {
                    index + self.buf[index + 1] as usize + 4
                };

                if self.buf.len() >= end {
                    let frame = &self.buf[index..end];

                    if self.command == Command::ReadMemory {
                        // Raw data follows the single leading ACK.
                        return Ok(Some(frame.to_vec()));
                    }
                    if frame[frame.len() - 1] == ACK {
                        return Ok(Some(frame.to_vec()));
                    }
                    // Trailing sentinel missing: this candidate was a
                    // stray ACK, keep scanning from the next index.
                }
            }

            if byte == NACK && !self.acked {
                return Err(Error::Nack);
            }
        }

        Ok(None)
    }
}
