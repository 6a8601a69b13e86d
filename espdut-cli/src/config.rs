//! Configuration file support for espdut.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ESPPORT, ESPTOOL, ESPDUT_*)
//! 3. Local config file (./espdut.toml)
//! 4. Global config file (~/.config/espdut/config.toml)
//!
//! ```toml
//! [port]
//! serial = "/dev/ttyUSB0"
//!
//! [flash]
//! baud_rates = [921600, 115200]
//! erase_nvs = true
//!
//! [tool]
//! program = "python3"
//! esptool = "/opt/esp-idf/components/esptool_py/esptool/esptool.py"
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "espdut.toml";

/// Port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port, used as the port hint.
    pub serial: Option<String>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Baud rates to try, fastest first.
    pub baud_rates: Option<Vec<u32>>,
    /// Blank the `nvs` partition when flashing.
    pub erase_nvs: Option<bool>,
}

/// esptool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Interpreter used to run the esptool script.
    pub program: Option<String>,
    /// Path of the esptool script.
    pub esptool: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Tool configuration.
    #[serde(default)]
    pub tool: ToolConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    ///
    /// Unreadable or malformed files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a file the user named explicitly must exist
    /// and parse.
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = toml::from_str(&content)
            .map_err(|e| CliError::Config(format!("invalid TOML in {}: {e}", path.display())))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "espdut").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set fields of `other` win.
    fn merge(&mut self, other: Self) {
        if other.port.serial.is_some() {
            self.port.serial = other.port.serial;
        }

        if other.flash.baud_rates.is_some() {
            self.flash.baud_rates = other.flash.baud_rates;
        }
        if other.flash.erase_nvs.is_some() {
            self.flash.erase_nvs = other.flash.erase_nvs;
        }

        if other.tool.program.is_some() {
            self.tool.program = other.tool.program;
        }
        if other.tool.esptool.is_some() {
            self.tool.esptool = other.tool.esptool;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.serial.is_none());
        assert!(config.flash.baud_rates.is_none());
        assert!(config.flash.erase_nvs.is_none());
        assert!(config.tool.program.is_none());
        assert!(config.tool.esptool.is_none());
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.port.serial = Some("/dev/ttyUSB0".to_string());
        base.flash.baud_rates = Some(vec![921600, 115200]);

        let mut other = Config::default();
        other.port.serial = Some("/dev/ttyUSB1".to_string());
        other.flash.erase_nvs = Some(false);
        other.tool.esptool = Some(PathBuf::from("/opt/esptool.py"));

        base.merge(other);

        assert_eq!(base.port.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(base.flash.baud_rates, Some(vec![921600, 115200]));
        assert_eq!(base.flash.erase_nvs, Some(false));
        assert_eq!(base.tool.esptool, Some(PathBuf::from("/opt/esptool.py")));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.port.serial = Some("/dev/ttyUSB0".to_string());
        base.flash.erase_nvs = Some(true);
        base.tool.program = Some("python3".to_string());

        base.merge(Config::default());

        assert_eq!(base.port.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.flash.erase_nvs, Some(true));
        assert_eq!(base.tool.program.as_deref(), Some("python3"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port]
serial = "/dev/cu.usbserial-1410"

[flash]
baud_rates = [460800, 115200]
erase_nvs = false

[tool]
program = "python3"
esptool = "/opt/esp/esptool.py"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.serial.as_deref(), Some("/dev/cu.usbserial-1410"));
        assert_eq!(config.flash.baud_rates, Some(vec![460800, 115200]));
        assert_eq!(config.flash.erase_nvs, Some(false));
        assert_eq!(config.tool.program.as_deref(), Some("python3"));
        assert_eq!(config.tool.esptool, Some(PathBuf::from("/opt/esp/esptool.py")));
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[flash]\nerase_nvs = true\n").unwrap();
        assert!(config.port.serial.is_none());
        assert_eq!(config.flash.erase_nvs, Some(true));
        assert!(config.flash.baud_rates.is_none());
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rig.toml");
        fs::write(&path, "[port]\nserial = \"COM7\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.port.serial.as_deref(), Some("COM7"));
    }

    #[test]
    fn test_load_from_path_invalid_toml_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rig.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, CliError::Config(msg) if msg.contains("invalid TOML")));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let err = Config::load_from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_load_from_file_skips_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCAL_CONFIG_FILE);
        fs::write(&path, "[flash\n").unwrap();
        assert!(Config::load_from_file(&path).is_none());
        assert!(Config::load_from_file(&dir.path().join("missing.toml")).is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let s = p.to_string_lossy();
            assert!(s.contains("espdut"));
            assert!(s.ends_with("config.toml"));
        }
    }
}
