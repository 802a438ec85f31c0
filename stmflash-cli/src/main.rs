//! stmflash CLI - Program STM32 microcontrollers over the USART system
//! bootloader.
//!
//! ## Features
//!
//! - Flash raw binary or Intel-HEX firmware images
//! - Mass erase, with recovery from read-protected chips
//! - Bootloader identification (version, product ID, command set)
//! - Readout protection control
//! - Shell completion generation

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use env_logger::Env;
use log::debug;
use std::io;
use std::path::PathBuf;

mod commands;

/// stmflash - program STM32 microcontrollers over the USART bootloader.
///
/// Environment variables:
///   STMFLASH_PORT   - Default serial port
///   STMFLASH_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "stmflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port the target is attached to (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, env = "STMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate for the bootloader session.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "STMFLASH_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a firmware image (.bin or .hex).
    Flash {
        /// Path to the firmware file.
        firmware: PathBuf,

        /// Base address to program at.
        #[arg(short, long, default_value = "0x08000000", value_parser = parse_hex_u32)]
        address: u32,

        /// Read each block back and compare after writing.
        #[arg(long)]
        verify: bool,

        /// Skip the mass erase before programming.
        #[arg(long)]
        no_erase: bool,

        /// If the chip is read-protected, remove the protection first
        /// (this mass-erases the flash).
        #[arg(long)]
        unlock: bool,

        /// Jump to the application instead of resetting afterwards.
        #[arg(long)]
        run: bool,
    },

    /// Mass-erase the flash.
    Erase {
        /// Remove readout protection first if the chip rejects the erase.
        #[arg(long)]
        unlock: bool,
    },

    /// Show bootloader version, product ID and supported commands.
    Info,

    /// Enable flash readout protection.
    Lock,

    /// Disable flash readout protection (mass-erases the flash).
    Unlock,

    /// Jump to the application at an address.
    Go {
        /// Entry address.
        #[arg(short, long, default_value = "0x08000000", value_parser = parse_hex_u32)]
        address: u32,
    },

    /// Reset the device via the serial control lines.
    Reset,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x0800_0000
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "stmflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match &cli.command {
        Commands::Flash {
            firmware,
            address,
            verify,
            no_erase,
            unlock,
            run,
        } => commands::flash::cmd_flash(
            &cli,
            firmware,
            *address,
            *verify,
            *no_erase,
            *unlock,
            *run,
        ),
        Commands::Erase { unlock } => commands::flash::cmd_erase(&cli, *unlock),
        Commands::Info => commands::info::cmd_info(&cli),
        Commands::Lock => commands::flash::cmd_lock(&cli),
        Commands::Unlock => commands::flash::cmd_unlock(&cli),
        Commands::Go { address } => commands::flash::cmd_go(&cli, *address),
        Commands::Reset => commands::flash::cmd_reset(&cli),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
