//! Bootloader identification command.

use super::{connect, open};
use crate::Cli;
use anyhow::{Context, Result};
use console::style;

/// Info command implementation.
pub fn cmd_info(cli: &Cli) -> Result<()> {
    let mut boot = open(cli)?;
    connect(cli, &mut boot)?;

    let supported = boot
        .get_commands()
        .context("bootloader did not answer the Get command")?
        .to_vec();
    let (version, option1, option2) = boot
        .get_version()
        .context("bootloader did not answer the GetVersion command")?;
    let pid = boot
        .get_id()
        .context("bootloader did not answer the GetId command")?;

    eprintln!("\n{}", style("Bootloader").bold().underlined());
    eprintln!("  Version:      {version:.1}");
    eprintln!("  Product ID:   0x{pid:04X}");
    eprintln!("  Option bytes: 0x{option1:02X} 0x{option2:02X}");

    let commands: Vec<String> = supported.iter().map(|c| format!("{c:?}")).collect();
    eprintln!("  Commands:     {}", commands.join(", "));

    boot.reset()?;
    Ok(())
}
