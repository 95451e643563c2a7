//! Serial endpoint discovery and programming-cable classification.
//!
//! The radio is programmed through a USB-to-UART cable plugged into its
//! speaker/mic jack. Cables built around common bridge chips are recognised by
//! VID/PID and preferred when no port is given explicitly.

use crate::error::{Error, Result};
use crate::port::PortInfo;

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB bridge chips found in programming cables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232 family USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter (the stock K5 cable).
    Prolific,
    /// Anything else.
    Unknown,
}

/// Known USB VID/PID pairs for common USB-to-UART bridges.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        Self::from_vid_pid_with(vid, pid, &[])
    }

    /// Classify a VID/PID pair, treating `extra` pairs as known cables.
    ///
    /// Extra pairs come from user configuration and classify as the chip
    /// matching their vendor, or [`DeviceKind::Prolific`] for unknown vendors.
    #[must_use]
    pub fn from_vid_pid_with(vid: u16, pid: u16, extra: &[(u16, u16)]) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && pids.contains(&pid) {
                return *device;
            }
        }
        if extra.contains(&(vid, pid)) {
            return KNOWN_USB_DEVICES
                .iter()
                .find(|(known_vid, _, _)| *known_vid == vid)
                .map_or(Self::Prolific, |(_, _, device)| *device);
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified bridge chip.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Classify an enumerated port, with extra user-supplied VID/PID pairs.
    pub fn classify(info: PortInfo, extra: &[(u16, u16)]) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid_with(vid, pid, extra),
            _ => DeviceKind::Unknown,
        };
        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }

    /// Whether this endpoint looks like a programming cable.
    pub fn is_likely_cable(&self) -> bool {
        self.device.is_known()
    }
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        Self::classify(info, &[])
    }
}

/// Pick the default endpoint.
///
/// A recognised cable wins. Otherwise, when names are Linux-style
/// (`/dev/tty*`), the last `ttyUSB*`-like name wins. Otherwise the last port
/// listed.
pub fn select_port(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    if let Some(port) = ports.iter().find(|p| p.is_likely_cable()) {
        return Some(port);
    }
    let linux_style = ports.iter().any(|p| p.name.starts_with("/dev/tty"));
    if linux_style {
        if let Some(port) = ports
            .iter()
            .rev()
            .find(|p| p.name.to_ascii_uppercase().contains("USB"))
        {
            return Some(port);
        }
    }
    ports.last()
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports(extra: &[(u16, u16)]) -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                let detected = DetectedPort::classify(info, extra);
                trace!(
                    "Found port: {} (VID: {:04X?}, PID: {:04X?}, Device: {:?})",
                    detected.name, detected.vid, detected.pid, detected.device
                );
                detected
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect all available endpoints (always empty without native support).
#[cfg(not(feature = "native"))]
pub fn detect_ports(_extra: &[(u16, u16)]) -> Vec<DetectedPort> {
    Vec::new()
}

/// Auto-detect a single endpoint.
#[cfg(feature = "native")]
pub fn auto_detect_port(extra: &[(u16, u16)]) -> Result<DetectedPort> {
    let ports = detect_ports(extra);
    let port = select_port(&ports).ok_or(Error::DeviceNotFound)?;
    if port.is_likely_cable() {
        info!("Auto-detected {} cable: {}", port.device.name(), port.name);
    } else {
        info!("Using port: {}", port.name);
    }
    Ok(port.clone())
}

/// Auto-detect a single endpoint (not supported without native support).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port(_extra: &[(u16, u16)]) -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "port discovery needs the native feature".to_string(),
    ))
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };
            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort::from(PortInfo {
            name: name.to_string(),
            vid,
            pid,
            manufacturer: None,
            product: None,
            serial_number: None,
        })
    }

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x067B, 0x2303), DeviceKind::Prolific);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_extra_pairs_from_config() {
        assert_eq!(
            DeviceKind::from_vid_pid_with(0x1A86, 0x1234, &[(0x1A86, 0x1234)]),
            DeviceKind::Ch340
        );
        assert_eq!(
            DeviceKind::from_vid_pid_with(0xBEEF, 0x0001, &[(0xBEEF, 0x0001)]),
            DeviceKind::Prolific
        );
        assert_eq!(DeviceKind::from_vid_pid_with(0xBEEF, 0x0002, &[(0xBEEF, 0x0001)]), DeviceKind::Unknown);
    }

    #[test]
    fn test_select_prefers_known_cable() {
        let ports = vec![
            port("/dev/ttyS0", None, None),
            port("/dev/ttyUSB0", Some(0x067B), Some(0x2303)),
            port("/dev/ttyUSB1", Some(0x1234), Some(0x5678)),
        ];
        assert_eq!(select_port(&ports).unwrap().name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_select_prefers_usb_names_on_linux() {
        let ports = vec![
            port("/dev/ttyUSB0", None, None),
            port("/dev/ttyS0", None, None),
            port("/dev/ttyS1", None, None),
        ];
        assert_eq!(select_port(&ports).unwrap().name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_select_falls_back_to_last_port() {
        let ports = vec![port("COM1", None, None), port("COM7", None, None)];
        assert_eq!(select_port(&ports).unwrap().name, "COM7");
        assert!(select_port(&[]).is_none());
    }

    #[test]
    fn test_format_port_list() {
        let mut cable = port("/dev/ttyUSB0", Some(0x1A86), Some(0x7523));
        cable.product = Some("USB-Serial".to_string());
        let ports = vec![cable, port("/dev/ttyUSB1", Some(0x1234), Some(0x5678))];

        let formatted = format_port_list(&ports);
        assert_eq!(formatted[0], "/dev/ttyUSB0 [CH340/CH341] - USB-Serial");
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:1234 PID:5678]");
    }
}
