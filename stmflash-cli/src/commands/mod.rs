//! CLI command implementations.

pub mod flash;
pub mod info;

use crate::Cli;
use anyhow::{Context, Result};
use console::style;
use stmflash::{Bootloader, NativePort};

/// Open the serial port named on the command line.
///
/// Port discovery is deliberately not offered; the caller must name the
/// port explicitly or via `STMFLASH_PORT`.
pub fn open(cli: &Cli) -> Result<Bootloader<NativePort>> {
    let port_name = cli
        .port
        .as_deref()
        .context("no serial port given; pass --port or set STMFLASH_PORT")?;

    let port = NativePort::open_simple(port_name, cli.baud)
        .with_context(|| format!("failed to open {port_name}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(port_name).cyan(),
            cli.baud
        );
    }

    Ok(Bootloader::new(port))
}

/// Force the target into its bootloader and line up the baud rate.
pub fn connect(cli: &Cli, boot: &mut Bootloader<NativePort>) -> Result<()> {
    if !cli.quiet {
        eprintln!("{} Entering bootloader...", style("⏳").yellow());
    }

    boot.activate()
        .context("failed to drive the DTR/RTS activation sequence")?;
    boot.synchronize()
        .context("no answer to the autobaud probe; check the BOOT0 wiring and the port")?;

    if !cli.quiet {
        eprintln!("{} Connected", style("✓").green());
    }
    Ok(())
}
