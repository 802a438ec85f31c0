//! Flash, erase, protection and reset commands.

use super::{connect, open};
use crate::Cli;
use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::path::Path;
use stmflash::{Bootloader, Command, Flasher, NativePort};

/// Flash command implementation.
pub fn cmd_flash(
    cli: &Cli,
    firmware: &Path,
    address: u32,
    verify: bool,
    no_erase: bool,
    unlock: bool,
    run: bool,
) -> Result<()> {
    if !firmware.is_file() {
        bail!("firmware file not found: {}", firmware.display());
    }

    let mut boot = open(cli)?;
    connect(cli, &mut boot)?;
    boot.get_commands()
        .context("bootloader did not answer the Get command")?;

    if !no_erase {
        mass_erase(cli, &mut boot, unlock)?;
    }

    if !cli.quiet {
        eprintln!(
            "{} Programming {} at {}",
            style("📦").cyan(),
            style(firmware.display()).cyan(),
            style(format!("{address:#010X}")).yellow()
        );
    }

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    Flasher::new(&mut boot)
        .with_verify(verify)
        .write_file(address, firmware, |percent| {
            pb.set_position(percent as u64);
        })?;
    pb.finish_and_clear();

    if run {
        if !cli.quiet {
            eprintln!("{} Starting application", style("🚀").cyan());
        }
        boot.go(address)?;
    } else {
        if !cli.quiet {
            eprintln!("{} Resetting device", style("🔄").cyan());
        }
        boot.reset()?;
    }

    if !cli.quiet {
        eprintln!("\n{} Flashing completed", style("🎉").green().bold());
    }
    Ok(())
}

/// Erase command implementation.
pub fn cmd_erase(cli: &Cli, unlock: bool) -> Result<()> {
    let mut boot = open(cli)?;
    connect(cli, &mut boot)?;
    boot.get_commands()
        .context("bootloader did not answer the Get command")?;

    mass_erase(cli, &mut boot, unlock)?;

    if !cli.quiet {
        eprintln!("\n{} Flash erased", style("✓").green().bold());
    }
    Ok(())
}

/// Lock command implementation: enable readout protection.
pub fn cmd_lock(cli: &Cli) -> Result<()> {
    let mut boot = open(cli)?;
    connect(cli, &mut boot)?;

    boot.readout_protect()
        .context("failed to enable readout protection")?;

    if !cli.quiet {
        eprintln!("\n{} Readout protection enabled", style("🔒").green());
    }
    Ok(())
}

/// Unlock command implementation: disable readout protection.
pub fn cmd_unlock(cli: &Cli) -> Result<()> {
    let mut boot = open(cli)?;
    connect(cli, &mut boot)?;

    if !cli.quiet {
        eprintln!(
            "{} Removing readout protection (this mass-erases the flash)...",
            style("🔓").yellow()
        );
    }
    boot.readout_unprotect()
        .context("failed to remove readout protection")?;

    if !cli.quiet {
        eprintln!("\n{} Readout protection removed", style("✓").green().bold());
    }
    Ok(())
}

/// Go command implementation: jump to the application.
pub fn cmd_go(cli: &Cli, address: u32) -> Result<()> {
    let mut boot = open(cli)?;
    connect(cli, &mut boot)?;

    boot.go(address)
        .with_context(|| format!("failed to start code at {address:#010X}"))?;

    if !cli.quiet {
        eprintln!("{} Running from {address:#010X}", style("🚀").green());
    }
    Ok(())
}

/// Reset command implementation.
pub fn cmd_reset(cli: &Cli) -> Result<()> {
    let mut boot = open(cli)?;
    boot.reset()?;

    if !cli.quiet {
        eprintln!("{} Device reset", style("🔄").green());
    }
    Ok(())
}

/// Mass-erase the flash, recovering from readout protection if asked.
fn mass_erase(cli: &Cli, boot: &mut Bootloader<NativePort>, unlock: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!("{} Erasing flash...", style("🗑").red());
    }

    match erase_once(boot) {
        Ok(()) => Ok(()),
        Err(e) if e.is_nack() && unlock => {
            if !cli.quiet {
                eprintln!(
                    "{} Chip is read-protected; removing protection (mass erase)...",
                    style("🔓").yellow()
                );
            }
            boot.readout_unprotect()
                .context("failed to remove readout protection")?;

            // Removing the protection resets the MCU, so the session has
            // to be rebuilt from scratch.
            connect(cli, boot)?;
            erase_once(boot).context("erase still failing after unlock")?;
            Ok(())
        },
        Err(e) if e.is_nack() => {
            bail!(
                "chip appears to be read-protected; re-run with --unlock \
                 (removing the protection mass-erases the flash)"
            )
        },
        Err(e) => Err(e.into()),
    }
}

/// One erase attempt, preferring the extended command when advertised.
fn erase_once(boot: &mut Bootloader<NativePort>) -> stmflash::Result<()> {
    let supported = boot.supported();
    if supported.is_empty() || supported.contains(&Command::ExtendedErase) {
        boot.extended_erase_all()
    } else {
        debug!("ExtendedErase not advertised, using legacy erase");
        boot.erase_all()
    }
}
