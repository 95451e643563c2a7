//! Firmware-mode device commands and port listing.

use anyhow::Result;
use console::style;
use k5flash::{DetectedPort, HelloInfo, detect_ports, select_port};

use super::{done, open_session};
use crate::config::Config;
use crate::progress::block_bar;
use crate::{Cli, use_fancy_output};

fn print_hello(info: &HelloInfo) {
    println!("   Firmware:         \"{}\"", info.firmware_version);
    println!("   HasCustomAesKey:  {}", info.has_custom_aes_key);
    println!("   IsPasswordLocked: {}", info.is_password_locked);
}

/// Greet the radio.
pub(crate) fn cmd_hello(cli: &Cli, config: &mut Config) -> Result<()> {
    let pb = block_bar(cli.quiet, use_fancy_output());
    let mut session = open_session(cli, config, &pb, None)?;
    print_hello(&session.handshake()?);
    done();
    Ok(())
}

/// Reboot into the bootloader.
pub(crate) fn cmd_reboot(cli: &Cli, config: &mut Config) -> Result<()> {
    let pb = block_bar(cli.quiet, use_fancy_output());
    let mut session = open_session(cli, config, &pb, None)?;
    print_hello(&session.handshake()?);
    let version = session.reboot()?;
    if cli.quiet {
        println!("{version}");
    }
    done();
    Ok(())
}

/// Read battery ADC values.
pub(crate) fn cmd_read_adc(cli: &Cli, config: &mut Config) -> Result<()> {
    let pb = block_bar(cli.quiet, use_fancy_output());
    let mut session = open_session(cli, config, &pb, None)?;
    session.handshake()?;
    let ack = session.read_adc()?;
    println!("   Voltage:          {}", ack.voltage());
    println!("   Current:          {}", ack.current());
    done();
    Ok(())
}

/// Read signal indicators.
pub(crate) fn cmd_read_rssi(cli: &Cli, config: &mut Config) -> Result<()> {
    let pb = block_bar(cli.quiet, use_fancy_output());
    let mut session = open_session(cli, config, &pb, None)?;
    session.handshake()?;
    let ack = session.read_rssi()?;
    println!("   RSSI:             {}", ack.rssi());
    println!("   ExNoiseIndicator: {}", ack.ex_noise_indicator());
    println!("   GlitchIndicator:  {}", ack.glitch_indicator());
    done();
    Ok(())
}

fn ports_json(detected: &[DetectedPort]) -> serde_json::Value {
    detected
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "device": p.device.name(),
                "known": p.device.is_known(),
                "vid": p.vid,
                "pid": p.pid,
                "manufacturer": p.manufacturer,
                "product": p.product,
                "serial": p.serial,
            })
        })
        .collect()
}

/// List serial ports.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) {
    let detected = detect_ports(&config.usb_pairs());

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports_json(&detected)).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            device_type,
            vid_pid,
            product
        );
    }

    if let Some(default) = select_port(&detected) {
        eprintln!(
            "\n{} Default port: {}",
            style("→").green().bold(),
            style(&default.name).cyan().bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k5flash::PortInfo;

    #[test]
    fn test_ports_json_shape() {
        let ports = vec![DetectedPort::from(PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x067B),
            pid: Some(0x2303),
            manufacturer: Some("Prolific".to_string()),
            product: None,
            serial_number: None,
        })];
        let value = ports_json(&ports);
        let entry = &value.as_array().unwrap()[0];
        assert_eq!(entry["name"], "/dev/ttyUSB0");
        assert_eq!(entry["device"], "PL2303");
        assert_eq!(entry["known"], true);
        assert_eq!(entry["vid"], 0x067B);
        assert!(entry["product"].is_null());
    }

    #[test]
    fn test_ports_json_empty_is_array() {
        assert_eq!(ports_json(&[]), serde_json::json!([]));
    }
}
