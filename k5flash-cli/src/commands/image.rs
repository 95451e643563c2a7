//! Offline commands: firmware image packing and frame decoding.

use anyhow::{Context, Result};
use console::style;
use k5flash::{Decoded, FirmwareImage, Packet, envelope, pack};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// File name stem without directory or extension.
fn stem(file: &Path) -> String {
    file.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Default output of `pack`: `{stem}.bin` in the working directory.
pub(crate) fn packed_name(file: &Path) -> PathBuf {
    PathBuf::from(format!("{}.bin", stem(file)))
}

/// Default output of `unpack`: `{stem}-{version}.raw` in the working directory.
pub(crate) fn unpacked_name(file: &Path, version: &str) -> PathBuf {
    PathBuf::from(format!("{}-{version}.raw", stem(file)))
}

/// Pack a raw blob.
pub(crate) fn cmd_pack(version: &str, file: &Path, output: Option<&Path>) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let packed = pack(&data, version)?;

    let output = output.map_or_else(|| packed_name(file), Path::to_path_buf);
    println!("Write {}...", output.display());
    fs::write(&output, packed).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Done");
    Ok(())
}

/// Unpack a packed image.
pub(crate) fn cmd_unpack(file: &Path, output: Option<&Path>) -> Result<()> {
    let image = FirmwareImage::from_file(file)
        .with_context(|| format!("Failed to unpack {}", file.display()))?;
    println!("   Version: {}", image.version());

    let output = output.map_or_else(|| unpacked_name(file, image.version()), Path::to_path_buf);
    println!("Write {}...", output.display());
    fs::write(&output, image.data())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Done");
    Ok(())
}

/// Join hex arguments, ignoring whitespace.
pub(crate) fn decode_hex(args: &[String]) -> Result<Vec<u8>, CliError> {
    let text: String = args
        .iter()
        .flat_map(|a| a.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(&text).map_err(|e| CliError::Usage(format!("Invalid hex data: {e}")))
}

fn print_decoded(plain: &[u8]) -> Result<Packet> {
    println!("plain: {}", hex::encode(plain));
    let Decoded { packet, warnings } = Packet::decode(plain)?;
    for warning in &warnings {
        eprintln!("{} {warning}", style("WARN:").yellow());
    }
    println!("{packet}");
    Ok(packet)
}

/// Decode an enveloped frame.
pub(crate) fn cmd_parse(args: &[String]) -> Result<()> {
    let data = decode_hex(args)?;
    println!("{} bytes", data.len());
    println!("raw: {}", hex::encode(&data));
    let plain = envelope::decode(&data)?;
    print_decoded(&plain)?;
    println!("Done");
    Ok(())
}

/// Decode a plain packet.
pub(crate) fn cmd_parse_plain(args: &[String]) -> Result<()> {
    let data = decode_hex(args)?;
    println!("{} bytes", data.len());
    print_decoded(&data)?;
    println!("Done");
    Ok(())
}
