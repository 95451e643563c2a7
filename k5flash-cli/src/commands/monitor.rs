//! Line monitoring commands: packet sniffer and bootloader emulator.

use anyhow::{Context, Result};
use console::style;
use k5flash::{Emulator, EmulatorEvent, FirmwareImage, Generation, Monitor, is_interrupted_requested};
use log::error;
use std::fs;
use std::path::{Path, PathBuf};

use super::{done, open_port};
use crate::Cli;
use crate::config::Config;

/// Print every packet on the line until Ctrl-C.
pub(crate) fn cmd_sniffer(cli: &Cli, config: &mut Config) -> Result<()> {
    let port = open_port(cli, config)?;
    let mut monitor = Monitor::open(port)?;

    if !cli.quiet {
        eprintln!("{}", style("Sniffing, press Ctrl+C to exit").dim());
    }
    monitor.run(
        is_interrupted_requested,
        |packet| println!("{packet}"),
        |err| eprintln!("{} {err}", style("ERROR:").red()),
    );

    done();
    Ok(())
}

/// Where a received image is stored.
pub(crate) fn image_path(dir: &Path, version: &str) -> PathBuf {
    let safe: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("firmware-{safe}.raw"))
}

fn save_image(dir: &Path, image: &FirmwareImage) -> Result<PathBuf> {
    let path = image_path(dir, image.version());
    fs::write(&path, image.data()).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn print_event(event: &EmulatorEvent, output_dir: &Path) {
    match event {
        EmulatorEvent::Version(version) => println!("flashVersion: {version}"),
        EmulatorEvent::Chunk {
            number,
            count,
            length,
            result,
        } => {
            println!(
                "flash chunkNumber=0x{number:04x}, size=0x{length:04x}, chunkCount=0x{count:04x}"
            );
            if *result != 0 {
                println!("   rejected with code {result}");
            }
        },
        EmulatorEvent::Image(image) => match save_image(output_dir, image) {
            Ok(path) => println!("Write {}", path.display()),
            Err(e) => error!("{e:#}"),
        },
    }
}

/// Act as a bootloader until Ctrl-C.
pub(crate) fn cmd_emulate(
    cli: &Cli,
    config: &mut Config,
    generation: Generation,
    output_dir: &Path,
) -> Result<()> {
    let port = open_port(cli, config)?;
    let mut emulator = Emulator::open(port, generation)?;

    if !cli.quiet {
        eprintln!(
            "{} Emulating a {generation:?} bootloader, press Ctrl+C to exit",
            style("ℹ").blue()
        );
    }
    emulator.run(is_interrupted_requested, |event| print_event(event, output_dir))?;

    done();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_path_sanitises_version() {
        let dir = Path::new("out");
        assert_eq!(image_path(dir, "2.01.26"), dir.join("firmware-2.01.26.raw"));
        assert_eq!(image_path(dir, "a/b c*"), dir.join("firmware-a_b_c_.raw"));
    }

    #[test]
    fn test_save_image_writes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let image = FirmwareImage::new(vec![1, 2, 3], "5.00.05").unwrap();
        let path = save_image(dir.path(), &image).unwrap();
        assert_eq!(fs::read(path).unwrap(), vec![1, 2, 3]);
    }
}
