//! EEPROM read/write commands.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::PathBuf;

use super::{done, open_session};
use crate::config::Config;
use crate::progress::block_bar;
use crate::{Cli, CliError, parse_number, use_fancy_output};

/// Whole EEPROM size read by default.
pub(crate) const DEFAULT_READ_SIZE: usize = 0x2000;

fn number(arg: &str) -> Result<usize, CliError> {
    parse_number(arg).map_err(CliError::Usage)
}

/// Arguments of `read-eeprom`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ReadRequest {
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) file: PathBuf,
}

impl ReadRequest {
    /// Resolve `[OFFSET SIZE] [FILE]`.
    pub(crate) fn from_args(args: &[String]) -> Result<Self, CliError> {
        let (offset, size, file) = match args {
            [] => (0, DEFAULT_READ_SIZE, None),
            [file] => (0, DEFAULT_READ_SIZE, Some(file)),
            [offset, size] => (number(offset)?, number(size)?, None),
            [offset, size, file] => (number(offset)?, number(size)?, Some(file)),
            _ => return Err(CliError::Usage("invalid arguments".to_string())),
        };
        let file = file.map_or_else(
            || PathBuf::from(format!("eeprom-{offset:04x}-{size:04x}.raw")),
            PathBuf::from,
        );
        Ok(Self { offset, size, file })
    }
}

/// Arguments of `write-eeprom`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct WriteRequest {
    pub(crate) offset: usize,
    pub(crate) file: PathBuf,
}

impl WriteRequest {
    /// Resolve `[OFFSET] FILE`.
    pub(crate) fn from_args(args: &[String]) -> Result<Self, CliError> {
        match args {
            [file] => Ok(Self {
                offset: 0,
                file: PathBuf::from(file),
            }),
            [offset, file] => Ok(Self {
                offset: number(offset)?,
                file: PathBuf::from(file),
            }),
            _ => Err(CliError::Usage("invalid arguments".to_string())),
        }
    }
}

/// Read EEPROM into a file.
pub(crate) fn cmd_read_eeprom(cli: &Cli, config: &mut Config, request: &ReadRequest) -> Result<()> {
    let pb = block_bar(cli.quiet, use_fancy_output());
    let mut session = open_session(cli, config, &pb, None)?;
    session.handshake()?;

    if !cli.quiet {
        eprintln!(
            "{} Read EEPROM offset=0x{:04x}, size=0x{:04x} to {}",
            style("→").cyan(),
            request.offset,
            request.size,
            request.file.display()
        );
    }
    let data = session.read_eeprom(request.offset, request.size)?;
    fs::write(&request.file, &data)
        .with_context(|| format!("Failed to write {}", request.file.display()))?;

    done();
    Ok(())
}

/// Write a file into EEPROM.
pub(crate) fn cmd_write_eeprom(cli: &Cli, config: &mut Config, request: &WriteRequest) -> Result<()> {
    let data = fs::read(&request.file)
        .with_context(|| format!("Failed to read {}", request.file.display()))?;

    let pb = block_bar(cli.quiet, use_fancy_output());
    let mut session = open_session(cli, config, &pb, None)?;
    session.handshake()?;

    if !cli.quiet {
        eprintln!(
            "{} Write EEPROM offset=0x{:04x}, size=0x{:04x} from {}",
            style("→").cyan(),
            request.offset,
            data.len(),
            request.file.display()
        );
    }
    session.write_eeprom(request.offset, &data)?;

    done();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_read_request_defaults() {
        let request = ReadRequest::from_args(&[]).unwrap();
        assert_eq!(
            request,
            ReadRequest {
                offset: 0,
                size: 0x2000,
                file: PathBuf::from("eeprom-0000-2000.raw"),
            }
        );
    }

    #[test]
    fn test_read_request_single_arg_is_file() {
        let request = ReadRequest::from_args(&args(&["backup.raw"])).unwrap();
        assert_eq!(request.offset, 0);
        assert_eq!(request.size, 0x2000);
        assert_eq!(request.file, PathBuf::from("backup.raw"));
    }

    #[test]
    fn test_read_request_range_names_file() {
        let request = ReadRequest::from_args(&args(&["0x0e70", "96"])).unwrap();
        assert_eq!(request.offset, 0x0e70);
        assert_eq!(request.size, 0x60);
        assert_eq!(request.file, PathBuf::from("eeprom-0e70-0060.raw"));

        let request = ReadRequest::from_args(&args(&["0x1e00", "0x200", "cal.raw"])).unwrap();
        assert_eq!(request.file, PathBuf::from("cal.raw"));
    }

    #[test]
    fn test_read_request_bad_number_is_usage_error() {
        assert!(matches!(
            ReadRequest::from_args(&args(&["zz", "0x10"])),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_write_request_forms() {
        let request = WriteRequest::from_args(&args(&["eeprom.raw"])).unwrap();
        assert_eq!(request.offset, 0);
        let request = WriteRequest::from_args(&args(&["0x1e00", "cal.raw"])).unwrap();
        assert_eq!(request.offset, 0x1e00);
        assert_eq!(request.file, PathBuf::from("cal.raw"));
        assert!(WriteRequest::from_args(&[]).is_err());
    }
}
