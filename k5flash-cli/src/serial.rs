//! Serial port selection.
//!
//! An explicit `--port` or a configured port wins. Otherwise the detected
//! endpoints are offered, with recognised programming cables first:
//! - a single known cable is picked without asking
//! - several candidates open a dialoguer prompt on a terminal
//! - without a terminal, or with `--non-interactive`, the default pick is used

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    k5flash::{DetectedPort, DeviceKind, detect_ports, select_port},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Never prompt.
    pub non_interactive: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured cable.
    pub is_known: bool,
    /// Whether the user picked it from a prompt.
    pub prompted: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn selected(port: DetectedPort, prompted: bool) -> SelectedPort {
    SelectedPort {
        is_known: port.is_likely_cable(),
        port,
        prompted,
    }
}

/// Deterministic pick used when no prompt may be shown.
fn select_default_port(ports: &[DetectedPort]) -> Result<SelectedPort> {
    let port = select_port(ports).ok_or_else(|| usage_err("No serial ports found"))?;
    info!("Using port: {}", port.name);
    Ok(selected(port.clone(), false))
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, config));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, config));
    }

    let ports = detect_ports(&config.usb_pairs());
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    let cables: Vec<&DetectedPort> = ports.iter().filter(|p| p.is_likely_cable()).collect();
    if let [cable] = cables.as_slice() {
        info!("Auto-selected port: {} [{}]", cable.name, cable.device.name());
        return Ok(selected((*cable).clone(), false));
    }

    if options.non_interactive || ports.len() == 1 || !interactive_terminal() {
        return select_default_port(&ports);
    }

    select_port_interactive(ports)
}

fn interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Find a port by name, keeping its metadata when it is enumerated.
fn find_port_by_name(name: &str, config: &Config) -> SelectedPort {
    let ports = detect_ports(&config.usb_pairs());

    if let Some(port) = ports
        .iter()
        .find(|p| p.name == name || p.name.eq_ignore_ascii_case(name))
    {
        return selected(port.clone(), false);
    }

    // Not enumerated (pty, remote tty, ...) but explicitly requested
    SelectedPort {
        port: DetectedPort {
            name: name.to_string(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        },
        is_known: false,
        prompted: false,
    }
}

/// Prompt label for one port.
fn port_label(port: &DetectedPort) -> String {
    let name = if port.is_likely_cable() {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(mut ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let default_name = select_port(&ports).map(|p| p.name.clone());
    ports.sort_by_key(|p| !p.is_likely_cable());
    let default_index = default_name
        .and_then(|name| ports.iter().position(|p| p.name == name))
        .unwrap_or(0);

    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the radio's programming cable")
        .items(&labels)
        .default(default_index)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(selected(port, true))
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Offer to remember a prompted USB port as a programming cable.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.port.usb_device.iter().any(|d| d.matches(vid, pid)) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Remember {vid:04X}:{pid:04X} as a programming cable?"
        ))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, console::strip_ansi_codes, k5flash::PortInfo};

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort::from(PortInfo {
            name: name.to_string(),
            vid,
            pid,
            manufacturer: None,
            product: Some("USB Serial".to_string()),
            serial_number: None,
        })
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.non_interactive);
    }

    #[test]
    fn test_default_port_without_candidates_is_usage_error() {
        let err = select_default_port(&[]).err().unwrap();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_default_port_follows_selection_rules() {
        let ports = vec![
            port("/dev/ttyUSB0", None, None),
            port("/dev/ttyS0", None, None),
        ];
        let chosen = select_default_port(&ports).unwrap();
        assert_eq!(chosen.port.name, "/dev/ttyUSB0");
        assert!(!chosen.is_known);
        assert!(!chosen.prompted);
    }

    #[test]
    fn test_unlisted_port_is_used_as_given() {
        let chosen = find_port_by_name("/dev/pts/does-not-exist-42", &Config::default());
        assert_eq!(chosen.port.name, "/dev/pts/does-not-exist-42");
        assert_eq!(chosen.port.device, DeviceKind::Unknown);
        assert!(!chosen.is_known);
    }

    #[test]
    fn test_port_label_shows_cable_and_ids() {
        let cable = strip_ansi_codes(&port_label(&port("/dev/ttyUSB0", Some(0x067B), Some(0x2303))))
            .into_owned();
        assert_eq!(cable, "/dev/ttyUSB0 [PL2303] - USB Serial");

        let other = strip_ansi_codes(&port_label(&port("COM9", Some(0x1234), Some(0xABCD))))
            .into_owned();
        assert_eq!(other, "COM9 (1234:ABCD) - USB Serial");
    }
}
