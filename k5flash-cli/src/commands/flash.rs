//! Bootloader flash commands.

use anyhow::{Context, Result};
use console::style;
use k5flash::FirmwareImage;
use k5flash::session::flash_usage;
use std::fs;
use std::path::{Path, PathBuf};

use super::{done, open_session};
use crate::config::Config;
use crate::progress::block_bar;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Resolve `[VERSION] FILE`.
pub(crate) fn split_raw_args(args: &[String]) -> Result<(Option<&str>, PathBuf), CliError> {
    match args {
        [file] => Ok((None, PathBuf::from(file))),
        [version, file] => Ok((Some(version.as_str()), PathBuf::from(file))),
        _ => Err(CliError::Usage("invalid arguments".to_string())),
    }
}

fn flash(
    cli: &Cli,
    config: &mut Config,
    version: Option<&str>,
    data: &[u8],
    key: Option<u8>,
) -> Result<()> {
    ensure_not_interrupted()?;

    let pb = block_bar(cli.quiet, use_fancy_output());
    let mut session = open_session(cli, config, &pb, key)?;
    if !cli.quiet {
        eprintln!(
            "{} Turn the radio on with PTT held to enter the bootloader",
            style("ℹ").blue()
        );
    }
    session.write_flash(version, data)?;

    if !cli.quiet {
        eprintln!(
            "\n{} Flashed 0x{:04x} bytes ({} of flash)",
            style("✓").green().bold(),
            data.len(),
            flash_usage(data.len())
        );
    }
    done();
    Ok(())
}

/// Flash a packed image, sending the version it carries.
pub(crate) fn cmd_write_flash(
    cli: &Cli,
    config: &mut Config,
    file: &Path,
    key: Option<u8>,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Read packed FLASH image from {}...",
            style("→").cyan(),
            file.display()
        );
    }
    let image = FirmwareImage::from_file(file)
        .with_context(|| format!("Failed to load firmware image {}", file.display()))?;
    if !cli.quiet {
        eprintln!("   Version: {}", image.version());
    }

    flash(cli, config, Some(image.version()), image.data(), key)
}

/// Flash a raw blob.
pub(crate) fn cmd_write_flash_raw(
    cli: &Cli,
    config: &mut Config,
    version: Option<&str>,
    file: &Path,
    key: Option<u8>,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Read unpacked FLASH image from {}...",
            style("→").cyan(),
            file.display()
        );
    }
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    flash(cli, config, version, &data, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_raw_args() {
        let one = vec!["fw.raw".to_string()];
        assert_eq!(split_raw_args(&one).unwrap(), (None, PathBuf::from("fw.raw")));

        let two = vec!["5.00.05".to_string(), "fw.raw".to_string()];
        assert_eq!(
            split_raw_args(&two).unwrap(),
            (Some("5.00.05"), PathBuf::from("fw.raw"))
        );

        assert!(matches!(split_raw_args(&[]), Err(CliError::Usage(_))));
    }
}
