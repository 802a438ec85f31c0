//! # stmflash
//!
//! A library for programming STM32 microcontrollers through the USART
//! system bootloader (the protocol described in ST application note
//! AN3155).
//!
//! This crate provides the host side of the conversation:
//!
//! - ISP activation and reset via the DTR/RTS modem lines
//! - Autobaud synchronization and capability discovery
//! - Flash erase, memory read/write, readout protection control
//! - Firmware programming from raw binary or Intel-HEX images, with
//!   per-block retry and optional read-back verification
//!
//! ## Example
//!
//! ```rust,no_run
//! use stmflash::{Bootloader, Flasher, NativePort};
//! use std::path::Path;
//!
//! fn main() -> stmflash::Result<()> {
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 115_200)?;
//!     let mut boot = Bootloader::new(port);
//!
//!     // Bring the MCU into the bootloader and line up the baud rate.
//!     boot.activate()?;
//!     boot.synchronize()?;
//!     boot.get_commands()?;
//!
//!     boot.extended_erase_all()?;
//!
//!     // Program an application image with verification.
//!     Flasher::new(&mut boot).with_verify(true).write_file(
//!         0x0800_0000,
//!         Path::new("app.hex"),
//!         |percent| println!("{percent:.1}%"),
//!     )?;
//!
//!     boot.reset()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootloader;
pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;

// Re-exports for convenience
pub use {
    bootloader::Bootloader,
    error::{Error, Result},
    flasher::{Flasher, WRITE_RETRY_BUDGET},
    image::{ImageFormat, Record, RecordKind},
    port::{NativePort, Port, SerialConfig},
    protocol::framing::{ACK, Command, MAX_BLOCK, NACK, SYNC},
};
