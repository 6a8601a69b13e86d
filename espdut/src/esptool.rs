//! esptool invocation.
//!
//! All flashing, resetting and reading is done by the external `esptool`
//! program. This module builds its argument lists and runs it through the
//! [`ToolRunner`] trait, which keeps the session logic testable without a
//! board or a Python installation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use espdut::esptool::{Esptool, ProcessRunner};
//!
//! fn main() -> espdut::Result<()> {
//!     let mut esptool = Esptool::new(ProcessRunner::python_script("esptool.py"));
//!     if let Some(chip) = esptool.detect_chip("/dev/ttyUSB0")? {
//!         println!("Found {chip}");
//!     }
//!     esptool.run_app("/dev/ttyUSB0")?;
//!     Ok(())
//! }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use log::{debug, trace};
use regex::Regex;

/// Baud rate used for reading flash back.
pub const DUMP_BAUD: u32 = 921_600;

static CHIP_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Detecting chip type[.:\s]+(.+)").expect("Invalid chip type regex")
});

/// A single esptool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// esptool command name (`write_flash`, `run`, ...), used in errors.
    pub name: &'static str,
    /// Full argument list passed after the program (and its prefix arguments).
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Build `--port PORT [--baud BAUD] <extra...>`.
    fn new(name: &'static str, port: &str, baud: Option<u32>) -> Self {
        let mut args = vec!["--port".to_string(), port.to_string()];
        if let Some(baud) = baud {
            args.push("--baud".to_string());
            args.push(baud.to_string());
        }
        Self { name, args }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Flash images: `--port P --baud B <download_config...>`.
    ///
    /// `download_config` already starts with `write_flash` and holds the
    /// address/image pairs.
    pub fn write_flash(port: &str, baud: u32, download_config: &[String]) -> Self {
        Self::new("write_flash", port, Some(baud)).args(download_config.iter().cloned())
    }

    /// Leave the bootloader and start the application: `--port P run`.
    pub fn run(port: &str) -> Self {
        Self::new("run", port, None).arg("run")
    }

    /// Read the chip ID (and, on the way, the chip type): `--port P chip_id`.
    pub fn chip_id(port: &str) -> Self {
        Self::new("chip_id", port, None).arg("chip_id")
    }

    /// Erase a flash range: `--port P erase_region OFFSET SIZE`.
    pub fn erase_region(port: &str, offset: u32, size: u32) -> Self {
        Self::new("erase_region", port, None)
            .arg("erase_region")
            .arg(hex(offset))
            .arg(hex(size))
    }

    /// Dump a flash range to a file.
    pub fn read_flash(port: &str, address: u32, size: u32, output: &Path) -> Self {
        Self::new("read_flash", port, Some(DUMP_BAUD))
            .args(["--before", "default_reset", "--after", "hard_reset"])
            .arg("read_flash")
            .arg(hex(address))
            .arg(hex(size))
            .arg(output.display().to_string())
    }
}

/// Format an address or length the way esptool accepts it.
pub fn hex(value: u32) -> String {
    format!("{value:#x}")
}

/// Runs esptool commands.
pub trait ToolRunner {
    /// Run `command`, returning its captured output when it exits with status 0.
    ///
    /// A non-zero exit must be reported as [`Error::ToolInvocation`].
    fn run(&mut self, command: &ToolCommand) -> Result<String>;
}

/// Runs esptool as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: OsString,
    prefix_args: Vec<OsString>,
}

impl ProcessRunner {
    /// Run an executable directly (e.g. `esptool.py` on `PATH`).
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Run the esptool script through `python`.
    pub fn python_script(script: impl Into<PathBuf>) -> Self {
        Self::with_interpreter("python", script)
    }

    /// Run the esptool script through a specific interpreter.
    pub fn with_interpreter(interpreter: impl Into<OsString>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: interpreter.into(),
            prefix_args: vec![script.into().into_os_string()],
        }
    }

    /// Program that is executed.
    pub fn program(&self) -> &OsString {
        &self.program
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&mut self, command: &ToolCommand) -> Result<String> {
        trace!(
            "Running {} {:?} {:?}",
            self.program.to_string_lossy(),
            self.prefix_args,
            command.args
        );

        let output = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(&command.args)
            .output()?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!("{} output:\n{}", command.name, text.trim_end());

        if output.status.success() {
            Ok(text)
        } else {
            Err(Error::ToolInvocation {
                command: command.name.to_string(),
                status: output.status.to_string(),
                output: text,
            })
        }
    }
}

/// Extract the chip type from `esptool` output.
pub fn parse_chip_type(output: &str) -> Option<String> {
    CHIP_TYPE_PATTERN
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|chip| !chip.is_empty())
}

/// esptool front end.
#[derive(Debug, Clone)]
pub struct Esptool<R: ToolRunner = ProcessRunner> {
    runner: R,
}

impl<R: ToolRunner> Esptool<R> {
    /// Wrap a runner.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Get a reference to the runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Get a mutable reference to the runner.
    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    /// Flash the images in `download_config` at `baud`.
    pub fn write_flash(&mut self, port: &str, baud: u32, download_config: &[String]) -> Result<()> {
        self.runner
            .run(&ToolCommand::write_flash(port, baud, download_config))
            .map(drop)
    }

    /// Reset into the application.
    pub fn run_app(&mut self, port: &str) -> Result<()> {
        self.runner.run(&ToolCommand::run(port)).map(drop)
    }

    /// Erase `size` bytes at `offset`.
    pub fn erase_region(&mut self, port: &str, offset: u32, size: u32) -> Result<()> {
        self.runner
            .run(&ToolCommand::erase_region(port, offset, size))
            .map(drop)
    }

    /// Read `size` bytes at `address` into `output`.
    pub fn read_flash(&mut self, port: &str, address: u32, size: u32, output: &Path) -> Result<()> {
        self.runner
            .run(&ToolCommand::read_flash(port, address, size, output))
            .map(drop)
    }

    /// Probe `port` for a chip.
    ///
    /// Returns `Ok(None)` when esptool ran but found no chip; failing to run
    /// esptool at all is still an error.
    pub fn detect_chip(&mut self, port: &str) -> Result<Option<String>> {
        match self.runner.run(&ToolCommand::chip_id(port)) {
            Ok(output) => Ok(parse_chip_type(&output)),
            Err(Error::ToolInvocation { status, .. }) => {
                debug!("No chip answered on {port} ({status})");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }
}
