//! USB modem port discovery.
//!
//! Enumerates the system's serial ports, recognises cellular modems by
//! USB VID/PID, and picks out the AT command interface among a modem's
//! composite ports.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use serialport::{SerialPortType, UsbPortInfo};

use crate::at::error::{AtError, AtResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Known cellular modems
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Well-known USB VID/PID pairs for cellular modems, with the
/// interface number their AT command port enumerates on.
#[derive(Debug, Clone)]
pub struct KnownModem {
    pub vid: u16,
    pub pid: u16,
    pub vendor: &'static str,
    pub model: &'static str,
    /// USB interface number of the AT command port. These modules
    /// enumerate several UART functions (diagnostics, NMEA, AT,
    /// modem); only this interface speaks the command set.
    pub at_interface: u8,
}

/// Registry of recognised modem modules.
pub fn known_modems() -> Vec<KnownModem> {
    vec![
        // SIMCom (SimTech)
        KnownModem { vid: 0x1E0E, pid: 0x9206, vendor: "SIMCom", model: "SIM7080", at_interface: 2 },
        KnownModem { vid: 0x1E0E, pid: 0x9011, vendor: "SIMCom", model: "SIM7000", at_interface: 2 },
        KnownModem { vid: 0x1E0E, pid: 0x9001, vendor: "SIMCom", model: "SIM7600", at_interface: 2 },
        // Quectel
        KnownModem { vid: 0x2C7C, pid: 0x0125, vendor: "Quectel", model: "EC25", at_interface: 2 },
    ]
}

/// Look up a known modem by VID/PID.
pub fn lookup_modem(vid: u16, pid: u16) -> Option<KnownModem> {
    known_modems()
        .into_iter()
        .find(|m| m.vid == vid && m.pid == pid)
}

/// Build a VID/PID lookup map for fast access.
pub fn modem_lookup_map() -> HashMap<(u16, u16), KnownModem> {
    known_modems().into_iter().map(|m| ((m.vid, m.pid), m)).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port scanner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scanner options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
    /// Filter by port name substring (e.g. "ttyUSB").
    #[serde(default)]
    pub name_filter: Option<String>,

    /// Filter by USB VID.
    #[serde(default)]
    pub vid_filter: Option<u16>,

    /// Filter by USB PID.
    #[serde(default)]
    pub pid_filter: Option<u16>,

    /// Drop ports whose VID/PID is not in the modem registry.
    #[serde(default = "default_true")]
    pub known_only: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            name_filter: None,
            vid_filter: None,
            pid_filter: None,
            known_only: true,
        }
    }
}

/// One discovered USB serial port, annotated with modem registry data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemPortInfo {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    /// USB interface number, where the platform exposes it.
    pub interface: Option<u8>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    /// Registry model name, when the VID/PID is recognised.
    pub model: Option<String>,
    /// True when this interface is the modem's AT command port.
    pub is_at_port: bool,
    pub display_name: String,
}

/// Generate a display name for a discovered port.
pub fn generate_display_name(port: &ModemPortInfo) -> String {
    if let Some(modem) = lookup_modem(port.vid, port.pid) {
        let suffix = if port.is_at_port { " (AT port)" } else { "" };
        return format!(
            "{} - {} {}{}",
            port.port_name, modem.vendor, modem.model, suffix
        );
    }
    if let Some(ref product) = port.product {
        if !product.is_empty() {
            return format!("{} - {}", port.port_name, product);
        }
    }
    port.port_name.clone()
}

/// Create a `ModemPortInfo` from a USB port listing entry.
pub fn build_port_info(port_name: &str, usb: &UsbPortInfo) -> ModemPortInfo {
    let modem = lookup_modem(usb.vid, usb.pid);
    let is_at_port = match (&modem, usb.interface) {
        (Some(m), Some(iface)) => iface == m.at_interface,
        _ => false,
    };

    let mut info = ModemPortInfo {
        port_name: port_name.to_string(),
        vid: usb.vid,
        pid: usb.pid,
        interface: usb.interface,
        manufacturer: usb.manufacturer.clone(),
        product: usb.product.clone(),
        serial_number: usb.serial_number.clone(),
        model: modem.as_ref().map(|m| m.model.to_string()),
        is_at_port,
        display_name: String::new(),
    };
    info.display_name = generate_display_name(&info);
    info
}

/// Apply scan filters to a list of ports.
pub fn apply_filters(ports: Vec<ModemPortInfo>, options: &ScanOptions) -> Vec<ModemPortInfo> {
    ports.into_iter().filter(|p| {
        if let Some(ref filter) = options.name_filter {
            if !p.port_name.to_lowercase().contains(&filter.to_lowercase()) {
                return false;
            }
        }
        if let Some(vid) = options.vid_filter {
            if p.vid != vid {
                return false;
            }
        }
        if let Some(pid) = options.pid_filter {
            if p.pid != pid {
                return false;
            }
        }
        if options.known_only && p.model.is_none() {
            return false;
        }
        true
    }).collect()
}

/// Turn a raw port listing into annotated modem ports. Non-USB ports
/// are skipped; a cellular module always enumerates over USB.
pub fn collect_modem_ports(
    listing: Vec<serialport::SerialPortInfo>,
    options: &ScanOptions,
) -> Vec<ModemPortInfo> {
    let mut ports: Vec<ModemPortInfo> = listing
        .iter()
        .filter_map(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) => Some(build_port_info(&p.port_name, usb)),
            _ => None,
        })
        .collect();
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    apply_filters(ports, options)
}

/// Enumerate USB serial ports and annotate them with modem registry
/// data. The listing itself is a blocking syscall.
pub async fn scan_modem_ports(options: &ScanOptions) -> AtResult<Vec<ModemPortInfo>> {
    let listing = tokio::task::spawn_blocking(serialport::available_ports)
        .await
        .map_err(|e| AtError::transport(format!("port listing task failed: {e}")))?
        .map_err(|e| AtError::transport(format!("port listing failed: {e}")))?;

    let ports = collect_modem_ports(listing, options);
    log::debug!("scan found {} candidate port(s)", ports.len());
    Ok(ports)
}

/// Find the first AT command port of a recognised modem.
pub async fn find_at_port(options: &ScanOptions) -> AtResult<ModemPortInfo> {
    let ports = scan_modem_ports(options).await?;
    ports
        .into_iter()
        .find(|p| p.is_at_port)
        .ok_or_else(|| AtError::transport("no modem AT port found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(vid: u16, pid: u16, interface: Option<u8>) -> UsbPortInfo {
        UsbPortInfo {
            vid,
            pid,
            serial_number: None,
            manufacturer: None,
            product: None,
            interface,
        }
    }

    fn listed(name: &str, usb: UsbPortInfo) -> serialport::SerialPortInfo {
        serialport::SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(usb),
        }
    }

    #[test]
    fn test_known_modems_not_empty() {
        let modems = known_modems();
        assert!(modems.len() >= 4);
    }

    #[test]
    fn test_lookup_sim7080() {
        let modem = lookup_modem(0x1E0E, 0x9206).unwrap();
        assert_eq!(modem.vendor, "SIMCom");
        assert_eq!(modem.model, "SIM7080");
        assert_eq!(modem.at_interface, 2);
    }

    #[test]
    fn test_lookup_quectel() {
        let modem = lookup_modem(0x2C7C, 0x0125).unwrap();
        assert_eq!(modem.vendor, "Quectel");
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(lookup_modem(0xFFFF, 0xFFFF).is_none());
    }

    #[test]
    fn test_modem_lookup_map() {
        let map = modem_lookup_map();
        assert!(map.contains_key(&(0x1E0E, 0x9206)));
        assert!(!map.contains_key(&(0xFFFF, 0xFFFF)));
    }

    #[test]
    fn test_build_port_info_at_interface() {
        let info = build_port_info("/dev/ttyUSB2", &usb(0x1E0E, 0x9206, Some(2)));
        assert!(info.is_at_port);
        assert_eq!(info.model.as_deref(), Some("SIM7080"));
        assert!(info.display_name.contains("SIMCom"));
        assert!(info.display_name.contains("AT port"));
    }

    #[test]
    fn test_build_port_info_other_interface() {
        let info = build_port_info("/dev/ttyUSB1", &usb(0x1E0E, 0x9206, Some(1)));
        assert!(!info.is_at_port);
        assert_eq!(info.model.as_deref(), Some("SIM7080"));
        assert!(!info.display_name.contains("AT port"));
    }

    #[test]
    fn test_build_port_info_missing_interface() {
        let info = build_port_info("/dev/ttyUSB0", &usb(0x1E0E, 0x9206, None));
        assert!(!info.is_at_port);
    }

    #[test]
    fn test_build_port_info_unknown_device() {
        let mut raw = usb(0x0403, 0x6001, Some(0));
        raw.product = Some("FT232R".to_string());
        let info = build_port_info("/dev/ttyUSB0", &raw);
        assert!(info.model.is_none());
        assert!(!info.is_at_port);
        assert_eq!(info.display_name, "/dev/ttyUSB0 - FT232R");
    }

    #[test]
    fn test_apply_filters_known_only() {
        let ports = vec![
            build_port_info("/dev/ttyUSB0", &usb(0x0403, 0x6001, Some(0))),
            build_port_info("/dev/ttyUSB2", &usb(0x1E0E, 0x9206, Some(2))),
        ];
        let filtered = apply_filters(ports, &ScanOptions::default());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].port_name, "/dev/ttyUSB2");
    }

    #[test]
    fn test_apply_filters_name() {
        let ports = vec![
            build_port_info("/dev/ttyUSB2", &usb(0x1E0E, 0x9206, Some(2))),
            build_port_info("/dev/ttyACM0", &usb(0x1E0E, 0x9206, Some(2))),
        ];
        let opts = ScanOptions {
            name_filter: Some("ttyUSB".to_string()),
            ..Default::default()
        };
        let filtered = apply_filters(ports, &opts);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].port_name, "/dev/ttyUSB2");
    }

    #[test]
    fn test_apply_filters_vid_pid() {
        let ports = vec![
            build_port_info("/dev/ttyUSB2", &usb(0x1E0E, 0x9206, Some(2))),
            build_port_info("/dev/ttyUSB6", &usb(0x2C7C, 0x0125, Some(2))),
        ];
        let opts = ScanOptions {
            vid_filter: Some(0x2C7C),
            pid_filter: Some(0x0125),
            ..Default::default()
        };
        let filtered = apply_filters(ports, &opts);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].model.as_deref(), Some("EC25"));
    }

    #[test]
    fn test_collect_modem_ports_skips_non_usb() {
        let listing = vec![
            serialport::SerialPortInfo {
                port_name: "/dev/ttyS0".to_string(),
                port_type: SerialPortType::Unknown,
            },
            listed("/dev/ttyUSB2", usb(0x1E0E, 0x9206, Some(2))),
        ];
        let ports = collect_modem_ports(listing, &ScanOptions::default());
        assert_eq!(ports.len(), 1);
        assert!(ports[0].is_at_port);
    }

    #[test]
    fn test_collect_modem_ports_sorted() {
        let listing = vec![
            listed("/dev/ttyUSB4", usb(0x1E0E, 0x9206, Some(4))),
            listed("/dev/ttyUSB0", usb(0x1E0E, 0x9206, Some(0))),
            listed("/dev/ttyUSB2", usb(0x1E0E, 0x9206, Some(2))),
        ];
        let ports = collect_modem_ports(listing, &ScanOptions::default());
        let names: Vec<&str> = ports.iter().map(|p| p.port_name.as_str()).collect();
        assert_eq!(names, vec!["/dev/ttyUSB0", "/dev/ttyUSB2", "/dev/ttyUSB4"]);
        assert!(ports[1].is_at_port);
    }

    #[test]
    fn test_scan_options_default() {
        let opts = ScanOptions::default();
        assert!(opts.known_only);
        assert!(opts.name_filter.is_none());
        assert!(opts.vid_filter.is_none());
    }
}
