//! STM32 USART bootloader driver.
//!
//! [`Bootloader`] owns a serial [`Port`] and speaks the AN3155 command set
//! over it: ISP entry via the DTR/RTS lines, autobaud synchronization,
//! capability discovery, erase, memory read/write, readout protection and
//! the jump to user code.
//!
//! Every command is a strict request/acknowledge exchange:
//!
//! ```text
//! host:   <opcode> <opcode^FF>
//! device: 79 (ACK) | 1F (NACK)
//! host:   <payload> <xor checksum>        (commands with a payload phase)
//! device: 79 | 1F
//! ```
//!
//! One command is in flight at a time; the driver blocks the calling
//! thread up to the deadline of the current phase.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::framing::{self, ACK, Command, MAX_BLOCK, NACK, SYNC};
use crate::protocol::response::ResponseScanner;
use log::{debug, trace};
use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// Window for one ACK/NACK poll slice; retransmit-enabled sends resend on
/// every expired slice.
const ACK_POLL: Duration = Duration::from_millis(300);

/// Deadline for framing ACKs inside a command exchange.
const FRAME_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for assembling a complete data response.
const RESPONSE_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for the autobaud probe.
const SYNC_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for erase completion and the protection-toggle command phase.
const ERASE_DEADLINE: Duration = Duration::from_secs(60);

/// Deadline for the post-operation confirmation of a protection toggle;
/// readout unprotect mass-erases the whole flash before confirming.
const PROTECT_CONFIRM_DEADLINE: Duration = Duration::from_secs(100);

/// Hold time for each step of the DTR/RTS sequences. The MCU's reset
/// capture window is shorter than this; do not reduce it.
const LINE_SETTLE: Duration = Duration::from_millis(100);

/// Read slice requested from the port so poll loops stay responsive.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Driver for the STM32 USART system bootloader.
///
/// Generic over the port type `P` so the protocol can run against the
/// native serial backend or an in-memory test double.
pub struct Bootloader<P: Port> {
    port: P,
    supported: Vec<Command>,
}

impl<P: Port> Bootloader<P> {
    /// Create a driver bound to an opened port.
    pub fn new(mut port: P) -> Self {
        let _ = port.set_timeout(READ_SLICE);
        Self {
            port,
            supported: Vec::new(),
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the driver and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Commands the bootloader advertised in its last Get response.
    ///
    /// Empty until [`get_commands`](Self::get_commands) has run.
    pub fn supported(&self) -> &[Command] {
        &self.supported
    }

    /// Force the MCU into the system bootloader by sequencing the BOOT0
    /// and reset lines through DTR/RTS.
    ///
    /// The 100 ms holds exceed the reset capture window and are part of
    /// the contract; the device samples BOOT0 on the rising edge of reset.
    pub fn activate(&mut self) -> Result<()> {
        debug!("Entering system bootloader via DTR/RTS on {}", self.port.name());

        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;
        thread::sleep(LINE_SETTLE);

        self.port.set_dtr(false)?;
        self.port.set_rts(true)?;
        thread::sleep(LINE_SETTLE);

        self.port.set_dtr(true)?;
        self.port.set_rts(false)?;
        self.port.set_rts(true)?;
        Ok(())
    }

    /// Release the device back into its application via the reset line.
    pub fn reset(&mut self) -> Result<()> {
        debug!("Resetting device");

        self.port.set_dtr(false)?;
        self.port.set_rts(true)?;
        thread::sleep(LINE_SETTLE);
        self.port.set_rts(false)?;
        Ok(())
    }

    /// Autobaud synchronization: send 0x7F until the bootloader measures
    /// the baud rate and answers ACK.
    pub fn synchronize(&mut self) -> Result<()> {
        debug!("Sending autobaud probe");
        self.send_ack(&[SYNC], true, SYNC_DEADLINE)
    }

    /// Get (0x00): discover which commands this bootloader supports.
    ///
    /// Populates [`supported`](Self::supported) with the intersection of
    /// the advertised opcodes and the set this driver knows.
    pub fn get_commands(&mut self) -> Result<&[Command]> {
        let frame = self.command(Command::Get)?;
        // ACK, length byte, version byte, opcodes..., ACK
        if frame.len() < 4 {
            return Err(Error::ShortFrame {
                expected: 4,
                actual: frame.len(),
            });
        }

        trace!("Bootloader version byte {:#04X}", frame[2]);
        let opcodes = &frame[3..frame.len() - 1];
        self.supported = Command::ALL
            .iter()
            .copied()
            .filter(|c| opcodes.contains(&(*c as u8)))
            .collect();

        debug!("Bootloader advertises {} commands", self.supported.len());
        Ok(&self.supported)
    }

    /// GetVersion (0x01): bootloader version plus the two read-protection
    /// option bytes.
    ///
    /// The BCD version byte is surfaced as a decimal, e.g. 0x31 -> 3.1.
    pub fn get_version(&mut self) -> Result<(f64, u8, u8)> {
        let frame = self.command(Command::GetVersion)?;
        if frame.len() < 5 {
            return Err(Error::ShortFrame {
                expected: 5,
                actual: frame.len(),
            });
        }

        let version = f64::from(framing::bcd_to_decimal(frame[1])) / 10.0;
        Ok((version, frame[2], frame[3]))
    }

    /// GetId (0x02): the 16-bit product ID.
    pub fn get_id(&mut self) -> Result<u16> {
        let frame = self.command(Command::GetId)?;
        if frame.len() < 5 {
            return Err(Error::ShortFrame {
                expected: 5,
                actual: frame.len(),
            });
        }

        Ok((u16::from(frame[2]) << 8) | u16::from(frame[3]))
    }

    /// ReadoutProtect (0x82): enable flash readout protection.
    pub fn readout_protect(&mut self) -> Result<()> {
        self.protect_toggle(Command::ReadoutProtect)
    }

    /// ReadoutUnprotect (0x92): disable flash readout protection.
    ///
    /// The bootloader mass-erases the flash and resets before sending the
    /// second ACK; callers must re-run [`activate`](Self::activate) and
    /// [`synchronize`](Self::synchronize) afterwards.
    pub fn readout_unprotect(&mut self) -> Result<()> {
        self.protect_toggle(Command::ReadoutUnprotect)
    }

    /// WriteProtect (0x63): enable sector write protection.
    pub fn write_protect(&mut self) -> Result<()> {
        self.protect_toggle(Command::WriteProtect)
    }

    /// WriteUnprotect (0x73): disable sector write protection.
    pub fn write_unprotect(&mut self) -> Result<()> {
        self.protect_toggle(Command::WriteUnprotect)
    }

    /// Two-phase protection toggle: retransmit-enabled command word, then
    /// a long wait for the post-operation confirmation ACK. Duplicate
    /// command words are harmless for these opcodes.
    fn protect_toggle(&mut self, command: Command) -> Result<()> {
        debug!("{command:?}");
        self.send_ack(&command.pair(), true, ERASE_DEADLINE)?;
        self.wait_ack(PROTECT_CONFIRM_DEADLINE)
    }

    /// Erase (0x43): legacy mass erase, single-byte page addressing.
    pub fn erase_all(&mut self) -> Result<()> {
        debug!("Mass erase (legacy)");
        self.send_ack(&Command::Erase.pair(), false, FRAME_DEADLINE)?;
        // Page count 0xFF means every page; its complement doubles as the
        // frame checksum.
        self.send_ack(&framing::length_frame(0xFF), false, ERASE_DEADLINE)
    }

    /// ExtendedErase (0x44): mass erase via the 0xFFFF special code.
    pub fn extended_erase_all(&mut self) -> Result<()> {
        debug!("Mass erase (extended)");
        self.send_ack(&Command::ExtendedErase.pair(), false, FRAME_DEADLINE)?;
        self.port.write_all_bytes(&[0xFF, 0xFF])?;
        // 0x00 is the XOR checksum of the 0xFFFF special code.
        self.send_ack(&[0x00], false, ERASE_DEADLINE)
    }

    /// ReadMemory (0x11): read `len` bytes (1..=256) starting at `addr`.
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        if len == 0 || len > MAX_BLOCK {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read length must be 1..=256, got {len}"),
            )));
        }

        trace!("Reading {len} bytes at {addr:#010X}");
        let count = len - 1; // the wire carries size minus one

        self.send_ack(&Command::ReadMemory.pair(), false, FRAME_DEADLINE)?;
        self.send_ack(&framing::address_frame(addr), false, FRAME_DEADLINE)?;
        self.port
            .write_all_bytes(&framing::length_frame(count as u8))?;

        let frame = self.receive_response(Command::ReadMemory, count)?;
        Ok(frame[1..].to_vec())
    }

    /// WriteMemory (0x31): write `data` (1..=256 bytes) at `addr`.
    ///
    /// Short tails are padded with 0xFF up to a 4-byte multiple before
    /// transmission; the padded image is returned so callers can verify
    /// exactly what landed in flash.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() || data.len() > MAX_BLOCK {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write length must be 1..=256, got {}", data.len()),
            )));
        }

        trace!("Writing {} bytes at {addr:#010X}", data.len());

        self.send_ack(&Command::WriteMemory.pair(), false, FRAME_DEADLINE)?;
        self.send_ack(&framing::address_frame(addr), false, FRAME_DEADLINE)?;

        // Flash writes are word-granular: pad up with erased-state bytes.
        let mut padded = data.to_vec();
        while padded.len() % 4 != 0 {
            padded.push(0xFF);
        }

        let count = (padded.len() - 1) as u8;
        let mut frame = Vec::with_capacity(padded.len() + 2);
        frame.push(count);
        frame.extend_from_slice(&padded);
        frame.push(count ^ framing::checksum(&padded));

        // The data frame goes out atomically; no other traffic until the
        // final ACK settles it.
        self.port.write_all_bytes(&frame)?;
        self.wait_ack(FRAME_DEADLINE)?;

        Ok(padded)
    }

    /// WriteMemory followed by a read-back compare of the padded block.
    pub fn write_memory_verified(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let padded = self.write_memory(addr, data)?;
        let readback = self.read_memory(addr, padded.len())?;
        if readback != padded {
            return Err(Error::VerifyMismatch {
                addr,
                expected: padded,
                actual: readback,
            });
        }
        Ok(())
    }

    /// Go (0x21): jump to user code at `addr`.
    pub fn go(&mut self, addr: u32) -> Result<()> {
        debug!("Jumping to {addr:#010X}");
        self.send_ack(&Command::Go.pair(), false, FRAME_DEADLINE)?;
        self.send_ack(&framing::address_frame(addr), false, FRAME_DEADLINE)
    }

    /// Write `data` once (or on every expired poll slice when `retransmit`
    /// is set) and poll for the ACK/NACK token until `deadline` elapses.
    ///
    /// Retransmission is reserved for the autobaud probe and the
    /// protection toggles; every other command is sent exactly once.
    fn send_ack(&mut self, data: &[u8], retransmit: bool, deadline: Duration) -> Result<()> {
        let start = Instant::now();
        let mut transmitted = false;

        loop {
            if !transmitted || retransmit {
                trace!("TX {}", hex_bytes(data));
                self.port.write_all_bytes(data)?;
                transmitted = true;
            }

            match self.wait_ack(ACK_POLL) {
                Ok(()) => return Ok(()),
                Err(Error::Timeout(_)) => {
                    if start.elapsed() >= deadline {
                        return Err(Error::Timeout(hex_bytes(data)));
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll for a single ACK/NACK token. Bytes that are neither are
    /// skipped; deadline expiry is a timeout.
    fn wait_ack(&mut self, deadline: Duration) -> Result<()> {
        let start = Instant::now();
        let mut buf = [0u8; 8];

        while start.elapsed() < deadline {
            match self.port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    for &byte in &buf[..n] {
                        match byte {
                            ACK => return Ok(()),
                            NACK => return Err(Error::Nack),
                            other => trace!("Skipping {other:#04X} while waiting for ACK"),
                        }
                    }
                },
                Ok(_) => {},
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Timeout("ACK wait expired".into()))
    }

    /// Transmit a command word and assemble its data response.
    fn command(&mut self, command: Command) -> Result<Vec<u8>> {
        trace!("TX {}", hex_bytes(&command.pair()));
        self.port.write_all_bytes(&command.pair())?;
        self.receive_response(command, 0)
    }

    /// Collect transport bytes until the scanner recognizes a complete
    /// response for `command`, or the response deadline expires.
    fn receive_response(&mut self, command: Command, expected_len: usize) -> Result<Vec<u8>> {
        let start = Instant::now();
        let mut scanner = ResponseScanner::new(command, expected_len);
        let mut buf = [0u8; 100];

        while start.elapsed() < RESPONSE_DEADLINE {
            match self.port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    if let Some(frame) = scanner.push(&buf[..n])? {
                        trace!("RX {}", hex_bytes(&frame));
                        return Ok(frame);
                    }
                },
                Ok(_) => {},
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Timeout(format!("{command:?} response")))
    }
}

fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
