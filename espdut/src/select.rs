//! Candidate port ordering.
//!
//! Turns the raw list of enumerated serial ports plus an optional hint
//! (usually `$ESPPORT`) into the order in which ports should be probed.
//!
//! ```rust
//! use espdut::select::{Platform, select_ports};
//!
//! let ports = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()];
//! let ordered = select_ports(&ports, Some("/dev/ttyUSB1"), Platform::Posix);
//! assert_eq!(ordered, ["/dev/ttyUSB1", "/dev/ttyUSB0"]);
//! ```

use std::sync::LazyLock;

use log::{debug, trace};
use regex::Regex;

/// Environment variable holding the preferred port.
pub const PORT_HINT_ENV: &str = "ESPPORT";

/// Ports that show up as serial devices but never are a DUT.
///
/// `/dev/ttyAMA0` is listed on Raspberry Pi, `/dev/tty.Bluetooth-Incoming-Port`
/// on macOS.
static INVALID_PORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AMA|Bluetooth").expect("Invalid port filter regex"));

/// Host platform, as far as port naming is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux, BSD and other POSIX hosts.
    Posix,
    /// macOS, where each device has both a `tty.` and a `cu.` node.
    MacOs,
    /// Anything else (Windows).
    Other,
}

impl Platform {
    /// Platform this binary was built for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(unix) {
            Self::Posix
        } else {
            Self::Other
        }
    }
}

/// Check whether a port name is a known false positive.
pub fn is_invalid_port(name: &str) -> bool {
    INVALID_PORT_PATTERN.is_match(name)
}

/// Order candidate ports.
///
/// Without a hint, known-invalid ports are dropped and the rest keep their
/// enumeration order. With a hint that names one of `all_ports` (directly, or
/// through the macOS `tty.` → `cu.` translation) that port moves to the
/// front. A hint that matches nothing returns `all_ports` untouched: the user
/// asked for something specific, so nothing is filtered.
pub fn select_ports(all_ports: &[String], hint: Option<&str>, platform: Platform) -> Vec<String> {
    let Some(hint) = hint.filter(|h| !h.is_empty()) else {
        return all_ports
            .iter()
            .filter(|p| {
                let invalid = is_invalid_port(p);
                if invalid {
                    trace!("Skipping invalid port {p}");
                }
                !invalid
            })
            .cloned()
            .collect();
    };

    match resolve_hint(all_ports, hint, platform) {
        Some(port) => promote(all_ports, port),
        None => {
            debug!("Port hint {hint} matches no enumerated port");
            all_ports.to_vec()
        },
    }
}

/// Find the enumerated port a hint refers to.
///
/// Either the hint itself or, on macOS, its `cu.` twin when the hint names
/// the `tty.` node.
pub fn resolve_hint<'a>(all_ports: &'a [String], hint: &str, platform: Platform) -> Option<&'a str> {
    if let Some(port) = all_ports.iter().find(|p| *p == hint) {
        return Some(port.as_str());
    }

    // pyserial-style enumeration on macOS only lists the /dev/cu.* node
    if platform == Platform::MacOs && hint.contains("tty.") {
        let alt = hint.replace("tty.", "cu.");
        if let Some(port) = all_ports.iter().find(|p| **p == alt) {
            debug!("Port hint {hint} translated to {alt}");
            return Some(port.as_str());
        }
    }

    None
}

fn promote(all_ports: &[String], wanted: &str) -> Vec<String> {
    let mut ordered = Vec::with_capacity(all_ports.len());
    ordered.push(wanted.to_string());
    ordered.extend(all_ports.iter().filter(|p| *p != wanted).cloned());
    ordered
}

/// Read the port hint from `$ESPPORT`.
pub fn port_hint_from_env() -> Option<String> {
    std::env::var(PORT_HINT_ENV)
        .ok()
        .filter(|h| !h.is_empty())
}

/// Enumerate ports and order them using `$ESPPORT` and the host platform.
#[cfg(feature = "native")]
pub fn list_available_ports() -> crate::Result<Vec<String>> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    let names: Vec<String> = NativePortEnumerator::list_ports()?
        .into_iter()
        .map(|p| p.name)
        .collect();
    let hint = port_hint_from_env();
    Ok(select_ports(&names, hint.as_deref(), Platform::current()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn test_no_hint_filters_invalid_ports() {
        let all = ports(&["/dev/ttyUSB0", "/dev/ttyAMA0"]);
        assert_eq!(select_ports(&all, None, Platform::Posix), ["/dev/ttyUSB0"]);
    }

    #[test]
    fn test_empty_hint_behaves_like_no_hint() {
        let all = ports(&["/dev/tty.Bluetooth-Incoming-Port", "/dev/cu.usbserial-1"]);
        assert_eq!(
            select_ports(&all, Some(""), Platform::MacOs),
            ["/dev/cu.usbserial-1"]
        );
    }

    #[test]
    fn test_no_hint_keeps_every_valid_port_in_order() {
        let all = ports(&[
            "/dev/ttyUSB2",
            "/dev/ttyAMA0",
            "/dev/ttyUSB0",
            "/dev/ttyACM1",
            "/dev/tty.Bluetooth-Incoming-Port",
        ]);
        let result = select_ports(&all, None, Platform::Posix);
        assert_eq!(result, ["/dev/ttyUSB2", "/dev/ttyUSB0", "/dev/ttyACM1"]);
        assert!(result.iter().all(|p| !is_invalid_port(p)));
    }

    #[test]
    fn test_hint_moves_to_front() {
        let all = ports(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        assert_eq!(
            select_ports(&all, Some("/dev/ttyUSB1"), Platform::Posix),
            ["/dev/ttyUSB1", "/dev/ttyUSB0"]
        );
    }

    #[test]
    fn test_hint_result_is_permutation() {
        let all = ports(&["COM7", "COM3", "COM4", "COM1"]);
        for hint in &all {
            let result = select_ports(&all, Some(hint.as_str()), Platform::Other);
            assert_eq!(&result[0], hint);
            assert_eq!(sorted(result), sorted(all.clone()));
        }
    }

    #[test]
    fn test_matching_hint_does_not_filter() {
        let all = ports(&["/dev/ttyAMA0", "/dev/ttyUSB0"]);
        assert_eq!(
            select_ports(&all, Some("/dev/ttyUSB0"), Platform::Posix),
            ["/dev/ttyUSB0", "/dev/ttyAMA0"]
        );
    }

    #[test]
    fn test_mac_tty_hint_translated_to_cu() {
        let all = ports(&["/dev/cu.SLAB_USBtoUART"]);
        assert_eq!(
            select_ports(&all, Some("/dev/tty.SLAB_USBtoUART"), Platform::MacOs),
            ["/dev/cu.SLAB_USBtoUART"]
        );
    }

    #[test]
    fn test_mac_translation_keeps_remaining_ports() {
        let all = ports(&[
            "/dev/cu.Bluetooth-Incoming-Port",
            "/dev/cu.usbserial-0001",
            "/dev/cu.SLAB_USBtoUART",
        ]);
        assert_eq!(
            select_ports(&all, Some("/dev/tty.SLAB_USBtoUART"), Platform::MacOs),
            [
                "/dev/cu.SLAB_USBtoUART",
                "/dev/cu.Bluetooth-Incoming-Port",
                "/dev/cu.usbserial-0001",
            ]
        );
    }

    #[test]
    fn test_tty_hint_not_translated_off_mac() {
        let all = ports(&["/dev/cu.SLAB_USBtoUART", "/dev/ttyAMA0"]);
        assert_eq!(
            select_ports(&all, Some("/dev/tty.SLAB_USBtoUART"), Platform::Posix),
            all
        );
    }

    #[test]
    fn test_unmatched_hint_returns_raw_list() {
        let all = ports(&["/dev/ttyUSB0", "/dev/ttyAMA0"]);
        assert_eq!(
            select_ports(&all, Some("/dev/ttyUSB9"), Platform::Posix),
            all
        );
    }

    #[test]
    fn test_empty_port_list() {
        assert!(select_ports(&[], None, Platform::Posix).is_empty());
        assert!(select_ports(&[], Some("/dev/ttyUSB0"), Platform::MacOs).is_empty());
    }

    #[test]
    fn test_resolve_hint() {
        let all = ports(&["/dev/cu.SLAB_USBtoUART", "/dev/ttyUSB0"]);
        assert_eq!(
            resolve_hint(&all, "/dev/ttyUSB0", Platform::Posix),
            Some("/dev/ttyUSB0")
        );
        assert_eq!(
            resolve_hint(&all, "/dev/tty.SLAB_USBtoUART", Platform::MacOs),
            Some("/dev/cu.SLAB_USBtoUART")
        );
        assert_eq!(resolve_hint(&all, "/dev/tty.SLAB_USBtoUART", Platform::Posix), None);
        assert_eq!(resolve_hint(&all, "/dev/ttyUSB9", Platform::MacOs), None);
    }

    #[test]
    fn test_invalid_port_pattern() {
        assert!(is_invalid_port("/dev/ttyAMA0"));
        assert!(is_invalid_port("/dev/tty.Bluetooth-Incoming-Port"));
        assert!(!is_invalid_port("/dev/ttyUSB0"));
        assert!(!is_invalid_port("COM3"));
    }

    #[test]
    fn test_platform_current_matches_target() {
        let platform = Platform::current();
        if cfg!(target_os = "macos") {
            assert_eq!(platform, Platform::MacOs);
        } else if cfg!(unix) {
            assert_eq!(platform, Platform::Posix);
        } else {
            assert_eq!(platform, Platform::Other);
        }
    }
}
