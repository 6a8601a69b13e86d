//! Application descriptor.
//!
//! Everything a session needs to know about the firmware under test: the
//! `write_flash` arguments that put it on the board and the partition
//! table that names its flash regions. Both come from an ESP-IDF build
//! directory (`flasher_args.json`), or can be supplied directly.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::partition::{PartitionTable, parse_size};

/// File written by the ESP-IDF build describing how to flash the app.
pub const FLASHER_ARGS_FILE: &str = "flasher_args.json";

#[derive(Debug, Deserialize)]
struct FlasherArgs {
    #[serde(default)]
    write_flash_args: Vec<String>,
    #[serde(default)]
    flash_files: BTreeMap<String, String>,
    #[serde(default, rename = "partition-table")]
    partition_table: Option<FlashFile>,
    #[serde(default)]
    extra_esptool_args: Option<ExtraEsptoolArgs>,
}

#[derive(Debug, Deserialize)]
struct FlashFile {
    file: String,
}

#[derive(Debug, Deserialize)]
struct ExtraEsptoolArgs {
    chip: Option<String>,
    before: Option<String>,
    after: Option<String>,
}

/// Firmware to flash plus its partition table.
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    download_config: Vec<String>,
    partition_table: Arc<PartitionTable>,
    chip: Option<String>,
}

impl AppDescriptor {
    /// Create a descriptor from an explicit download config.
    ///
    /// `download_config` is everything esptool gets after `--port`/`--baud`,
    /// starting with its global options (if any) and `write_flash`.
    pub fn new(download_config: Vec<String>, partition_table: Arc<PartitionTable>) -> Self {
        Self {
            download_config,
            partition_table,
            chip: None,
        }
    }

    /// Load `flasher_args.json` and the partition table from a build directory.
    pub fn from_build_dir(build_dir: &Path) -> Result<Self> {
        let args_path = build_dir.join(FLASHER_ARGS_FILE);
        let content = fs::read_to_string(&args_path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", args_path.display()))
        })?;
        let args: FlasherArgs = serde_json::from_str(&content)?;

        let table_file = args
            .partition_table
            .as_ref()
            .map(|f| f.file.clone())
            .or_else(|| {
                args.flash_files
                    .values()
                    .find(|file| file.contains("partition"))
                    .cloned()
            });

        let partition_table = match table_file {
            Some(file) => PartitionTable::from_file(&build_dir.join(file))?,
            None => {
                warn!(
                    "{} names no partition table; partition operations will fail",
                    args_path.display()
                );
                PartitionTable::default()
            },
        };

        let chip = args
            .extra_esptool_args
            .as_ref()
            .and_then(|extra| extra.chip.clone());
        let download_config = build_download_config(&args, build_dir)?;
        debug!("Download config: {download_config:?}");

        Ok(Self {
            download_config,
            partition_table: Arc::new(partition_table),
            chip,
        })
    }

    /// Replace the partition table (e.g. with one parsed from the project CSV).
    #[must_use]
    pub fn with_partition_table(mut self, partition_table: Arc<PartitionTable>) -> Self {
        self.partition_table = partition_table;
        self
    }

    /// Arguments for flashing the app.
    pub fn download_config(&self) -> &[String] {
        &self.download_config
    }

    /// Partition table of the app.
    pub fn partition_table(&self) -> &Arc<PartitionTable> {
        &self.partition_table
    }

    /// Chip the app was built for, when the build recorded it.
    pub fn chip(&self) -> Option<&str> {
        self.chip.as_deref()
    }
}

fn build_download_config(args: &FlasherArgs, build_dir: &Path) -> Result<Vec<String>> {
    let mut config = Vec::new();

    if let Some(extra) = &args.extra_esptool_args {
        for (flag, value) in [
            ("--chip", &extra.chip),
            ("--before", &extra.before),
            ("--after", &extra.after),
        ] {
            if let Some(value) = value {
                config.push(flag.to_string());
                config.push(value.clone());
            }
        }
    }

    config.push("write_flash".to_string());
    config.extend(args.write_flash_args.iter().cloned());

    let mut files: Vec<(u32, &String, PathBuf)> = Vec::with_capacity(args.flash_files.len());
    for (offset, file) in &args.flash_files {
        if offset.is_empty() {
            continue;
        }
        let address = parse_size(offset).ok_or_else(|| {
            Error::Config(format!("invalid flash address '{offset}' for {file}"))
        })?;
        files.push((address, offset, build_dir.join(file)));
    }
    files.sort_by_key(|(address, _, _)| *address);

    if files.is_empty() {
        return Err(Error::Config("no flash files to download".into()));
    }

    for (_, offset, path) in files {
        config.push(offset.clone());
        config.push(path.display().to_string());
    }

    Ok(config)
}
