//! USB bridge classification for enumerated ports.
//!
//! Only used to annotate port listings. Candidate ordering never depends on
//! it; that is the job of [`crate::select`].

use crate::port::PortInfo;

/// USB bridges commonly found on ESP development boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Espressif built-in USB-Serial/JTAG or USB-OTG CDC.
    Espressif,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// CH340/CH341/CH343/CH9102 USB-to-Serial converter.
    Ch340,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches every product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x303A, &[], DeviceKind::Espressif),
    (0x10C4, &[0xEA60, 0xEA70], DeviceKind::Cp210x),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x55D3, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Classify an enumerated port.
    #[must_use]
    pub fn of(port: &PortInfo) -> Self {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => Self::from_vid_pid(vid, pid),
            _ => Self::Unknown,
        }
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Espressif => "Espressif USB",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH34x",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Format one port for display: `name [bridge] - product`.
pub fn describe_port(port: &PortInfo) -> String {
    let kind = DeviceKind::of(port);
    let device_info = if kind.is_known() {
        format!(" [{}]", kind.name())
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            ..PortInfo::default()
        }
    }

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x303A, 0x1001), DeviceKind::Espressif);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x55D4), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0x0001), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_non_usb_port_is_unknown() {
        let port = PortInfo {
            name: "/dev/ttyS0".to_string(),
            ..PortInfo::default()
        };
        assert_eq!(DeviceKind::of(&port), DeviceKind::Unknown);
        assert!(!DeviceKind::of(&port).is_known());
    }

    #[test]
    fn test_describe_port() {
        let mut known = usb("/dev/ttyUSB0", 0x10C4, 0xEA60);
        known.product = Some("CP2102 USB to UART Bridge Controller".to_string());
        assert_eq!(
            describe_port(&known),
            "/dev/ttyUSB0 [CP210x] - CP2102 USB to UART Bridge Controller"
        );

        let unknown = usb("/dev/ttyACM0", 0x2341, 0x0043);
        assert_eq!(describe_port(&unknown), "/dev/ttyACM0 [VID:2341 PID:0043]");

        let bare = PortInfo {
            name: "COM1".to_string(),
            ..PortInfo::default()
        };
        assert_eq!(describe_port(&bare), "COM1");
    }
}
