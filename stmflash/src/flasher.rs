//! File programmer: streams a firmware image into flash in 256-byte
//! blocks through a [`Bootloader`].
//!
//! Raw `.bin` images are written sequentially from the base address;
//! Intel-HEX images are placed by their record offsets. Block writes that
//! fail are retried against a budget shared across the whole run, and an
//! optional read-back verify checks every block as it lands.

use crate::bootloader::Bootloader;
use crate::error::{Error, Result};
use crate::image::{ImageFormat, Record, RecordKind};
use crate::port::Port;
use crate::protocol::framing::MAX_BLOCK;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Write failures tolerated across one whole programming run. The budget
/// is cumulative over all blocks, not per block.
pub const WRITE_RETRY_BUDGET: u32 = 5;

/// Streams firmware files into device flash.
///
/// Borrows the command-layer driver for the duration of one programming
/// run; the retry budget resets with each new `Flasher`.
pub struct Flasher<'a, P: Port> {
    boot: &'a mut Bootloader<P>,
    verify: bool,
    retries: u32,
}

impl<'a, P: Port> Flasher<'a, P> {
    /// Create a programmer over an activated, synchronized driver.
    pub fn new(boot: &'a mut Bootloader<P>) -> Self {
        Self {
            boot,
            verify: false,
            retries: 0,
        }
    }

    /// Read back and compare every block after writing it.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Program `path` into flash starting at `addr`.
    ///
    /// The format is chosen by extension (`.bin` or `.hex`). `progress`
    /// receives a percentage in 0..=100 before each block attempt.
    pub fn write_file<F>(&mut self, addr: u32, path: &Path, mut progress: F) -> Result<()>
    where
        F: FnMut(f64),
    {
        info!("Programming {} at {addr:#010X}", path.display());

        match ImageFormat::from_path(path)? {
            ImageFormat::Bin => self.write_bin(addr, path, &mut progress),
            ImageFormat::Hex => self.write_hex(addr, path, &mut progress),
        }
    }

    /// Raw binary path: sequential 256-byte blocks from the base address.
    fn write_bin<F>(&mut self, addr: u32, path: &Path, progress: &mut F) -> Result<()>
    where
        F: FnMut(f64),
    {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let total_blocks = size.div_ceil(MAX_BLOCK as u64).max(1) as f64;

        let mut reader = BufReader::with_capacity(MAX_BLOCK, file);
        let mut buffer = [0u8; MAX_BLOCK];
        let mut block = 0u64;
        let mut offset = 0u32;

        loop {
            progress(block as f64 / total_blocks * 100.0);

            let n = read_chunk(&mut reader, &mut buffer)?;
            if n == 0 {
                break;
            }
            block += 1;

            self.write_block(addr + offset, &buffer[..n])?;
            // The offset advances a whole block even for the short tail;
            // the tail is always last, so the next address is never used.
            offset += MAX_BLOCK as u32;
        }

        debug!("Wrote {block} blocks from {}", path.display());
        Ok(())
    }

    /// Intel-HEX path: records place the data; extended linear address
    /// records shift the upper 16 address bits for images over 64 KiB.
    fn write_hex<F>(&mut self, addr: u32, path: &Path, progress: &mut F) -> Result<()>
    where
        F: FnMut(f64),
    {
        let contents = fs::read_to_string(path)?;
        let total = contents
            .lines()
            .filter(|l| l.starts_with(':'))
            .count()
            .max(1) as f64;

        let mut current = 0usize;
        let mut linear_base = 0u32;

        for line in contents.lines() {
            if !line.starts_with(':') {
                continue;
            }

            progress(current as f64 / total * 100.0);
            current += 1;

            let Some(record) = Record::parse(line)? else {
                // Shorter than a record header; skipped, progress kept.
                continue;
            };

            match record.kind {
                RecordKind::Data => {
                    if record.data.is_empty() {
                        continue;
                    }
                    let target = addr + linear_base + u32::from(record.offset);
                    self.write_block(target, &record.data)?;
                },
                RecordKind::EndOfFile => {
                    debug!("End-of-file record after {current} records");
                    return Ok(());
                },
                RecordKind::ExtendedLinearAddress => {
                    if let Some(base) = record.linear_base() {
                        debug!("Linear base now {base:#010X}");
                        linear_base = base;
                    }
                },
                _ => {},
            }
        }

        Ok(())
    }

    /// Write one block, drawing on the run-wide retry budget on failure.
    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        loop {
            let result = if self.verify {
                self.boot.write_memory_verified(addr, data)
            } else {
                self.boot.write_memory(addr, data).map(|_| ())
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.retries += 1;
                    if self.retries >= WRITE_RETRY_BUDGET {
                        return Err(Error::WriteFailed {
                            addr,
                            cause: Box::new(err),
                        });
                    }
                    warn!(
                        "Write at {addr:#010X} failed ({err}), retry {}/{}",
                        self.retries, WRITE_RETRY_BUDGET
                    );
                },
            }
        }
    }
}

/// Fill `buf` from the reader, stopping only at EOF or a full buffer.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::framing::{ACK, NACK};
    use std::io::Write as _;

    fn ack_everything() -> MockPort {
        MockPort::with_reply_rule(|_| vec![ACK])
    }

    fn temp_file(name: &str, contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        (dir, path)
    }

    fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_hex_ingest_single_record() {
        let (_dir, path) = temp_file(
            "app.hex",
            b":10000000284801205D030008A1010008A3010008A1\r\n:00000001FF\r\n",
        );

        let mut boot = Bootloader::new(ack_everything());
        let mut progress_log = Vec::new();
        Flasher::new(&mut boot)
            .write_file(0x0800_0000, &path, |p| progress_log.push(p))
            .unwrap();

        let expected = [
            0x31, 0xCE, // command word
            0x08, 0x00, 0x00, 0x00, 0x08, // address frame
            0x0F, // 16 bytes minus one
            0x28, 0x48, 0x01, 0x20, 0x5D, 0x03, 0x00, 0x08, 0xA1, 0x01, 0x00, 0x08, 0xA3, 0x01,
            0x00, 0x08, //
            0x1A, // count ^ data checksum
        ];
        assert_eq!(boot.port().written, expected);

        // One call per record, EOF included.
        assert_eq!(progress_log, [0.0, 50.0]);
    }

    #[test]
    fn test_hex_ingest_honors_linear_base() {
        let (_dir, path) = temp_file(
            "app.hex",
            b":020000040800F2\n:04000000DEADBEEFC4\n:00000001FF\n",
        );

        let mut boot = Bootloader::new(ack_everything());
        Flasher::new(&mut boot)
            .write_file(0, &path, |_| {})
            .unwrap();

        // Data landed at 0x08000000 despite the zero base argument.
        assert!(contains_subslice(
            &boot.port().written,
            &[0x08, 0x00, 0x00, 0x00, 0x08]
        ));
    }

    #[test]
    fn test_hex_ingest_rejects_corrupt_record() {
        let (_dir, path) = temp_file("app.hex", b":10000000284801205D030008A1010008A3010008A2\n");

        let mut boot = Bootloader::new(ack_everything());
        let err = Flasher::new(&mut boot)
            .write_file(0x0800_0000, &path, |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::MalformedHex(_)));
    }

    #[test]
    fn test_hex_ingest_skips_noise_lines() {
        // Comment lines and blank lines around a valid image.
        let (_dir, path) = temp_file(
            "app.hex",
            b"# comment\n\n:00000001FF\ntrailing garbage\n",
        );

        let mut boot = Bootloader::new(ack_everything());
        Flasher::new(&mut boot)
            .write_file(0x0800_0000, &path, |_| {})
            .unwrap();
        assert!(boot.port().written.is_empty());
    }

    #[test]
    fn test_bin_ingest_block_slicing() {
        // 300 bytes: one full block plus a 44-byte tail.
        let image: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let (_dir, path) = temp_file("app.bin", &image);

        let mut boot = Bootloader::new(ack_everything());
        let mut progress_log = Vec::new();
        Flasher::new(&mut boot)
            .write_file(0x0800_0000, &path, |p| progress_log.push(p))
            .unwrap();

        // First block at the base address...
        assert!(contains_subslice(
            &boot.port().written,
            &[0x31, 0xCE, 0x08, 0x00, 0x00, 0x00, 0x08, 0xFF]
        ));
        // ...tail at base + 256 (checksum of the address is 0x09).
        assert!(contains_subslice(
            &boot.port().written,
            &[0x31, 0xCE, 0x08, 0x00, 0x01, 0x00, 0x09, 0x2B]
        ));

        assert_eq!(progress_log, [0.0, 50.0, 100.0]);
    }

    #[test]
    fn test_bin_ingest_empty_file() {
        let (_dir, path) = temp_file("app.bin", b"");

        let mut boot = Bootloader::new(ack_everything());
        Flasher::new(&mut boot)
            .write_file(0x0800_0000, &path, |_| {})
            .unwrap();
        assert!(boot.port().written.is_empty());
    }

    #[test]
    fn test_retry_budget_is_shared_across_blocks() {
        // Data-phase replies: block one fails three times then lands;
        // block two then only has two failures left in the budget.
        let mut writes = 0;
        let mut data_replies = [NACK, NACK, NACK, ACK, NACK, NACK].into_iter();
        let port = MockPort::with_reply_rule(move |_| {
            writes += 1;
            if writes % 3 == 0 {
                vec![data_replies.next().unwrap_or(ACK)]
            } else {
                vec![ACK]
            }
        });

        let image: Vec<u8> = vec![0x55; 300];
        let (_dir, path) = temp_file("app.bin", &image);

        let mut boot = Bootloader::new(port);
        let err = Flasher::new(&mut boot)
            .write_file(0x0800_0000, &path, |_| {})
            .unwrap_err();

        match err {
            Error::WriteFailed { addr, cause } => {
                assert_eq!(addr, 0x0800_0100);
                assert!(cause.is_nack());
            },
            other => panic!("expected WriteFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_extension_fails_before_io() {
        let mut boot = Bootloader::new(MockPort::new());
        let err = Flasher::new(&mut boot)
            .write_file(0x0800_0000, Path::new("firmware.elf"), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_verified_write_round_trip() {
        // Five ACKs cover the write phases plus the read-back preamble;
        // the size frame then yields the same four bytes that were written.
        let mut writes = 0;
        let port = MockPort::with_reply_rule(move |_| {
            writes += 1;
            match writes {
                1..=5 => vec![ACK],
                _ => vec![ACK, 0xDE, 0xAD, 0xBE, 0xEF],
            }
        });

        let (_dir, path) = temp_file("app.hex", b":04000000DEADBEEFC4\n:00000001FF\n");

        let mut boot = Bootloader::new(port);
        Flasher::new(&mut boot)
            .with_verify(true)
            .write_file(0x0800_0000, &path, |_| {})
            .unwrap();
    }
}
