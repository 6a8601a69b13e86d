//! Serial port held by a DUT session.
//!
//! The session keeps the DUT's serial port open to read its console, but
//! esptool needs exclusive access while it runs. The [`Port`] trait is the
//! surface the session needs for that: release the device, and acquire it
//! again afterwards.
//!
//! ```text
//!   session read path          esptool process
//!          |                          |
//!   close()  ------------------->  owns port
//!          |                          |
//!   reopen() <-------------------  exits
//! ```
//!
//! Enumeration is separate ([`PortEnumerator`]) since it does not need an
//! open port.

#[cfg(feature = "native")]
pub mod native;

use std::io::Read;
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Console baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information from enumeration.
#[derive(Debug, Clone, Default)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// A serial connection that can be released and re-acquired.
pub trait Port: Read + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Whether the device is currently held.
    fn is_open(&self) -> bool;

    /// Release the device. Closing an already closed port is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Acquire the device again with the original settings.
    fn reopen(&mut self) -> Result<()>;
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports, in enumeration order.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
