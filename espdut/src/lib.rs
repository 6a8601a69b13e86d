//! # espdut
//!
//! Drive ESP32-family boards under test through `esptool`.
//!
//! This crate provides the host side of a hardware test rig:
//!
//! - Serial port selection honouring the `ESPPORT` hint
//! - Flashing with baud-rate fallback
//! - Sessions that release the serial port around every `esptool` run
//! - Partition tables (ESP-IDF CSV and binary) and app descriptors built
//!   from `flasher_args.json`
//!
//! ## Features
//!
//! - `native` (default): serial port access via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use espdut::{AppDescriptor, DutSession, Esptool, ProcessRunner, StartOptions};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = AppDescriptor::from_build_dir(Path::new("build"))?;
//!     let mut esptool = Esptool::new(ProcessRunner::python_script("esptool.py"));
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let candidates = espdut::select::list_available_ports()?;
//!         let (port, chip) = espdut::find_dut(&mut esptool, &candidates)?;
//!         println!("Found {chip} on {port}");
//!
//!         let port = espdut::NativePort::open_simple(&port, 115200)?;
//!         let mut dut = DutSession::new(port, app, esptool);
//!         dut.start_app(&StartOptions::default())?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod device;
pub mod error;
pub mod esptool;
pub mod partition;
pub mod port;
pub mod retry;
pub mod select;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    app::AppDescriptor,
    device::{DeviceKind, describe_port},
    error::{Error, Result},
    esptool::{Esptool, ProcessRunner, ToolCommand, ToolRunner},
    partition::{PartitionEntry, PartitionTable},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    retry::{DEFAULT_BAUD_RATES, flash_with_retry},
    select::{Platform, select_ports},
    session::{DumpTarget, DutSession, PortRelease, StartOptions, find_dut},
};
