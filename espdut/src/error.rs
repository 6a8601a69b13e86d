//! Error types for espdut.

use std::io;
use thiserror::Error;

/// Result type for espdut operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for espdut operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (temporary images, descriptor files, process spawning).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid or missing parameters.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external flashing tool exited with a non-zero status.
    #[error("{command} failed ({status}):\n{output}")]
    ToolInvocation {
        /// Tool command that was run (e.g. `write_flash`, `run`).
        command: String,
        /// Exit status reported by the process (e.g. `exit status: 2`).
        status: String,
        /// Captured stdout followed by stderr.
        output: String,
    },

    /// Every baud rate was tried and the flash still failed.
    #[error("Flashing failed at {baud} baud after trying all baud rates")]
    Flash {
        /// Last baud rate attempted.
        baud: u32,
        /// Failure of the last attempt.
        #[source]
        source: Box<Error>,
    },

    /// No candidate port answered as a device.
    #[error("Device not found on any candidate port")]
    DeviceNotFound,

    /// Malformed partition table.
    #[error("Invalid partition table: {0}")]
    PartitionTable(String),

    /// Malformed application descriptor.
    #[error("Invalid flasher arguments: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Captured tool output, if this error (or the failure it wraps) came
    /// from a tool invocation.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::ToolInvocation { output, .. } => Some(output),
            Self::Flash { source, .. } => source.tool_output(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("baud rate list is empty".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: baud rate list is empty"
        );
    }

    #[test]
    fn test_partition_table_error_display() {
        let err = Error::PartitionTable("line 3: missing size".into());
        assert_eq!(
            err.to_string(),
            "Invalid partition table: line 3: missing size"
        );
    }

    #[test]
    fn test_tool_output_only_for_tool_errors() {
        assert!(Error::DeviceNotFound.tool_output().is_none());
        let flash = Error::Flash {
            baud: 115200,
            source: Box::new(Error::Config("x".into())),
        };
        assert!(flash.tool_output().is_none());
    }

    #[test]
    fn test_tool_output_through_flash_error() {
        let tool = Error::ToolInvocation {
            command: "write_flash".into(),
            status: "exit status: 2".into(),
            output: "A fatal error occurred: Timed out".into(),
        };
        let flash = Error::Flash {
            baud: 115200,
            source: Box::new(tool),
        };
        assert_eq!(
            flash.tool_output(),
            Some("A fatal error occurred: Timed out")
        );
        assert!(flash.to_string().contains("115200"));
    }
}
