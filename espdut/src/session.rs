//! DUT session.
//!
//! A [`DutSession`] owns the serial port of one board together with the
//! application it runs. Every esptool operation is bracketed by
//! [`PortRelease`]: the port is closed before esptool starts and reopened on
//! every exit path, so the session can keep reading the console between
//! operations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use espdut::app::AppDescriptor;
//! use espdut::esptool::{Esptool, ProcessRunner};
//! use espdut::port::NativePort;
//! use espdut::session::{DutSession, StartOptions};
//! use std::path::Path;
//!
//! fn main() -> espdut::Result<()> {
//!     let app = AppDescriptor::from_build_dir(Path::new("build"))?;
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!     let esptool = Esptool::new(ProcessRunner::python_script("esptool.py"));
//!
//!     let mut dut = DutSession::new(port, app, esptool);
//!     dut.start_app(&StartOptions::default())?;
//!     Ok(())
//! }
//! ```

use std::io::Write;
use std::path::Path;

use log::{debug, error, info, warn};
use tempfile::NamedTempFile;

use crate::app::AppDescriptor;
use crate::error::{Error, Result};
use crate::esptool::{Esptool, ProcessRunner, ToolRunner, hex};
use crate::partition::{NVS_PARTITION, PartitionTable};
use crate::port::Port;
use crate::retry::{DEFAULT_BAUD_RATES, flash_with_retry};

/// Options for [`DutSession::start_app`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    /// Overwrite the `nvs` partition with a blank image while flashing.
    pub erase_nvs: bool,
    /// Baud rates to try, fastest first.
    pub baud_rates: Vec<u32>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            erase_nvs: true,
            baud_rates: DEFAULT_BAUD_RATES.to_vec(),
        }
    }
}

/// Flash region to read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpTarget {
    /// A partition of the app's partition table, by name.
    Partition(String),
    /// An explicit byte range.
    Range {
        /// Start address.
        address: u32,
        /// Length in bytes.
        size: u32,
    },
}

impl DumpTarget {
    /// Build a target from optional user input.
    ///
    /// A partition name wins over an address range. Without a partition both
    /// `address` and `size` are required.
    pub fn from_parts(partition: Option<&str>, address: Option<u32>, size: Option<u32>) -> Result<Self> {
        match (partition, address, size) {
            (Some(name), _, _) => Ok(Self::Partition(name.to_string())),
            (None, Some(address), Some(size)) => Ok(Self::Range { address, size }),
            _ => Err(Error::Config(
                "dump target needs a partition name, or both address and size".into(),
            )),
        }
    }

    /// Resolve to `(address, size)`.
    pub fn resolve(&self, table: &PartitionTable) -> Result<(u32, u32)> {
        match self {
            Self::Partition(name) => {
                let entry = table.require(name)?;
                Ok((entry.offset, entry.size))
            },
            Self::Range { address, size } => Ok((*address, *size)),
        }
    }
}

/// Scoped release of a port.
///
/// Closes the port on creation and reopens it in [`PortRelease::finish`].
/// If the guard is dropped without `finish` (early return or panic), `Drop`
/// reopens the port and logs a failure instead of returning it.
pub struct PortRelease<'a, P: Port + ?Sized> {
    port: &'a mut P,
    released: bool,
}

impl<'a, P: Port + ?Sized> PortRelease<'a, P> {
    /// Close `port`.
    pub fn new(port: &'a mut P) -> Result<Self> {
        port.close()?;
        debug!("Released {}", port.name());
        Ok(Self {
            port,
            released: true,
        })
    }

    /// Reopen the port, returning the reopen error if any.
    pub fn finish(mut self) -> Result<()> {
        self.released = false;
        self.port.reopen()?;
        debug!("Reacquired {}", self.port.name());
        Ok(())
    }
}

impl<P: Port + ?Sized> Drop for PortRelease<'_, P> {
    fn drop(&mut self) {
        if !self.released {
            return;
        }
        if let Err(e) = self.port.reopen() {
            error!("Failed to reopen {}: {e}", self.port.name());
        }
    }
}

/// A board under test: its serial port, its app, and the esptool used on it.
pub struct DutSession<P: Port, R: ToolRunner = ProcessRunner> {
    port: P,
    app: AppDescriptor,
    esptool: Esptool<R>,
}

impl<P: Port, R: ToolRunner> DutSession<P, R> {
    /// Create a session over an open port.
    pub fn new(port: P, app: AppDescriptor, esptool: Esptool<R>) -> Self {
        Self { port, app, esptool }
    }

    /// Get a reference to the port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the port, e.g. to read the console.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// The application descriptor.
    pub fn app(&self) -> &AppDescriptor {
        &self.app
    }

    /// Get a reference to the esptool front end.
    pub fn esptool(&self) -> &Esptool<R> {
        &self.esptool
    }

    /// Take the session apart.
    pub fn into_parts(self) -> (P, AppDescriptor, Esptool<R>) {
        (self.port, self.app, self.esptool)
    }

    /// Flash the app, falling back through `options.baud_rates`.
    ///
    /// With `erase_nvs` set, a blank image covering the `nvs` partition is
    /// flashed along with the app. The image lives in a temporary file that
    /// is removed once flashing is over.
    pub fn start_app(&mut self, options: &StartOptions) -> Result<()> {
        let mut download_config = self.app.download_config().to_vec();

        let _nvs_image = if options.erase_nvs {
            let nvs = self.app.partition_table().require(NVS_PARTITION)?;
            let image = blank_image(nvs.size)?;
            debug!(
                "Blank NVS image ({} bytes at {}) in {}",
                nvs.size,
                hex(nvs.offset),
                image.path().display()
            );
            download_config.push(hex(nvs.offset));
            download_config.push(image.path().display().to_string());
            Some(image)
        } else {
            None
        };

        info!("Flashing app to {}", self.port.name());
        let baud_rates = options.baud_rates.as_slice();
        self.with_port_released(|esptool, port| {
            flash_with_retry(baud_rates, |baud| {
                esptool.write_flash(port, baud, &download_config)
            })
        })
    }

    /// Reset the board into its app.
    pub fn reset(&mut self) -> Result<()> {
        info!("Resetting {}", self.port.name());
        self.with_port_released(|esptool, port| esptool.run_app(port))
    }

    /// Erase the named partition.
    pub fn erase_partition(&mut self, name: &str) -> Result<()> {
        let entry = self.app.partition_table().require(name)?;
        let (offset, size) = (entry.offset, entry.size);
        info!(
            "Erasing partition '{name}' ({} bytes at {})",
            size,
            hex(offset)
        );
        self.with_port_released(|esptool, port| esptool.erase_region(port, offset, size))
    }

    /// Read a flash region into `output`.
    pub fn dump_flash(&mut self, output: &Path, target: &DumpTarget) -> Result<()> {
        let (address, size) = target.resolve(self.app.partition_table())?;
        info!(
            "Dumping {} bytes at {} to {}",
            size,
            hex(address),
            output.display()
        );
        self.with_port_released(|esptool, port| esptool.read_flash(port, address, size, output))
    }

    /// Ask esptool which chip is on this port.
    pub fn detect_chip(&mut self) -> Result<Option<String>> {
        self.with_port_released(|esptool, port| esptool.detect_chip(port))
    }

    /// Run `op` with the port closed, then reopen it.
    ///
    /// A reopen failure is returned even when `op` failed too; the
    /// operation error is logged in that case.
    fn with_port_released<T>(&mut self, op: impl FnOnce(&mut Esptool<R>, &str) -> Result<T>) -> Result<T> {
        let port_name = self.port.name().to_string();
        let release = PortRelease::new(&mut self.port)?;
        let result = op(&mut self.esptool, &port_name);
        let reopened = release.finish();

        match (result, reopened) {
            (result, Ok(())) => result,
            (Ok(_), Err(reopen)) => Err(reopen),
            (Err(e), Err(reopen)) => {
                error!("Operation on {port_name} failed: {e}");
                Err(reopen)
            },
        }
    }
}

fn blank_image(size: u32) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("espdut-nvs-")
        .suffix(".bin")
        .tempfile()?;
    let len = usize::try_from(size).map_err(|_| Error::Config(format!("partition size {size} too large")))?;
    file.write_all(&vec![0xFF; len])?;
    file.flush()?;
    Ok(file)
}

/// Probe `candidates` in order and return the first port with a chip.
///
/// Ports where esptool finds nothing are skipped. Returns
/// `(port, chip)`, or [`Error::DeviceNotFound`] when no candidate answers.
pub fn find_dut<R: ToolRunner>(esptool: &mut Esptool<R>, candidates: &[String]) -> Result<(String, String)> {
    for port in candidates {
        debug!("Probing {port}");
        match esptool.detect_chip(port)? {
            Some(chip) => {
                info!("Found {chip} on {port}");
                return Ok((port.clone(), chip));
            },
            None => warn!("No chip detected on {port}"),
        }
    }
    Err(Error::DeviceNotFound)
}
