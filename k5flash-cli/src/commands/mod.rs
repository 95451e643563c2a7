//! Command implementations.
//!
//! Each group of subcommands is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod eeprom;
pub(crate) mod flash;
pub(crate) mod image;
pub(crate) mod monitor;

use anyhow::{Context, Result};
use console::style;
use indicatif::ProgressBar;
use k5flash::{DeviceLimits, NativePort, SerialConfig, Session};

use crate::config::Config;
use crate::progress::ConsoleReporter;
use crate::{Cli, baud_rate, get_port};

/// Open the selected port.
pub(crate) fn open_port(cli: &Cli, config: &mut Config) -> Result<NativePort> {
    let port = get_port(cli, config)?;
    let baud = baud_rate(cli, config);
    NativePort::open(&SerialConfig::new(&port, baud))
        .with_context(|| format!("Failed to open {port} at {baud} baud"))
}

/// Open a session that reports to the console through `pb`.
pub(crate) fn open_session(
    cli: &Cli,
    config: &mut Config,
    pb: &ProgressBar,
    key: Option<u8>,
) -> Result<Session<NativePort>> {
    let port = open_port(cli, config)?;

    let mut limits = DeviceLimits::default();
    if let Some(addr) = config.flash.max_flash_addr {
        limits = limits.with_max_flash_addr(addr);
    }

    let session = Session::open(port)?
        .with_limits(limits)
        .with_key_number(key.or(config.flash.key_number).unwrap_or(0))
        .with_reporter(ConsoleReporter::new(pb.clone(), cli.quiet));
    Ok(session)
}

/// Closing line of every successful device command.
pub(crate) fn done() {
    println!("{}", style("Done").green().bold());
}
