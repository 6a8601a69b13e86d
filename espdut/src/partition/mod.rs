//! Partition table lookup.
//!
//! The table maps partition names to flash byte ranges. It is produced by
//! the firmware build (ESP-IDF partition CSV) and only read afterwards, which
//! is why sessions share it behind an `Arc` instead of copying it.
//!
//! ## CSV format
//!
//! ```text
//! # Name,   Type, SubType, Offset,  Size, Flags
//! nvs,      data, nvs,     0x9000,  0x6000,
//! phy_init, data, phy,     0xf000,  0x1000,
//! factory,  app,  factory, 0x10000, 1M,
//! ```
//!
//! Offsets may be left empty, in which case the partition is placed right
//! after the previous one (aligned to 4 KiB, or 64 KiB for `app` entries).

mod binary;

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use log::debug;

/// First usable offset after the bootloader and the partition table itself.
pub const DEFAULT_FIRST_OFFSET: u32 = 0x9000;

/// Name of the non-volatile storage partition.
pub const NVS_PARTITION: &str = "nvs";

const DATA_ALIGNMENT: u32 = 0x1000;
const APP_ALIGNMENT: u32 = 0x10000;

/// One partition table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Partition name (unique within a table).
    pub name: String,
    /// Partition type (`app`, `data`, or a numeric type).
    pub kind: String,
    /// Partition subtype (`nvs`, `factory`, `ota_0`, ...).
    pub subtype: String,
    /// Start address in flash.
    pub offset: u32,
    /// Length in bytes.
    pub size: u32,
}

impl PartitionEntry {
    /// Create an entry with only the fields used for range lookups.
    pub fn new(name: impl Into<String>, offset: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            kind: String::new(),
            subtype: String::new(),
            offset,
            size,
        }
    }

    /// First address past the end of the partition.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }
}

/// Named map of flash regions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Build a table from entries, rejecting duplicate names and overlapping
    /// ranges.
    pub fn new(entries: Vec<PartitionEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(Error::Config(format!(
                    "duplicate partition name '{}'",
                    entry.name
                )));
            }
            if let Some(other) = overlapping(&entries[..i], entry) {
                return Err(Error::Config(format!(
                    "partition '{}' overlaps '{}'",
                    entry.name, other.name
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Load a partition table file.
    ///
    /// Files ending in `.csv` are parsed as CSV, anything else as the binary
    /// table image written to flash (`partition-table.bin`).
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Parsing partition table {}", path.display());
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv {
            Self::from_csv(&fs::read_to_string(path)?)
        } else {
            Self::from_binary(&fs::read(path)?)
        }
    }

    /// Parse ESP-IDF partition CSV text.
    pub fn from_csv(content: &str) -> Result<Self> {
        let mut entries: Vec<PartitionEntry> = Vec::new();
        let mut next_offset = DEFAULT_FIRST_OFFSET;

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 5 {
                return Err(csv_error(
                    line_no,
                    format!("expected at least 5 columns, found {}", fields.len()),
                ));
            }

            let name = fields[0];
            if name.is_empty() {
                return Err(csv_error(line_no, "empty partition name"));
            }
            let kind = fields[1].to_string();
            let subtype = fields[2].to_string();

            let alignment = if kind == "app" {
                APP_ALIGNMENT
            } else {
                DATA_ALIGNMENT
            };

            let offset = if fields[3].is_empty() {
                align_up(next_offset, alignment)
                    .ok_or_else(|| csv_error(line_no, "partition extends past 4 GiB"))?
            } else {
                parse_size(fields[3])
                    .ok_or_else(|| csv_error(line_no, format!("invalid offset '{}'", fields[3])))?
            };

            let size = parse_size(fields[4])
                .ok_or_else(|| csv_error(line_no, format!("invalid size '{}'", fields[4])))?;

            if entries.iter().any(|e| e.name == name) {
                return Err(csv_error(
                    line_no,
                    format!("duplicate partition name '{name}'"),
                ));
            }

            next_offset = offset
                .checked_add(size)
                .ok_or_else(|| csv_error(line_no, "partition extends past 4 GiB"))?;

            let entry = PartitionEntry {
                name: name.to_string(),
                kind,
                subtype,
                offset,
                size,
            };
            if let Some(other) = overlapping(&entries, &entry) {
                return Err(csv_error(
                    line_no,
                    format!("partition '{name}' overlaps '{}'", other.name),
                ));
            }
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Look up a partition by name.
    pub fn get(&self, name: &str) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Look up a partition by name, failing with a configuration error.
    pub fn require(&self, name: &str) -> Result<&PartitionEntry> {
        self.get(name)
            .ok_or_else(|| Error::Config(format!("no partition named '{name}'")))
    }

    /// All entries in table order.
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no partitions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn csv_error(line: usize, message: impl std::fmt::Display) -> Error {
    Error::PartitionTable(format!("line {line}: {message}"))
}

fn align_up(value: u32, alignment: u32) -> Option<u32> {
    value.div_ceil(alignment).checked_mul(alignment)
}

fn overlapping<'a>(entries: &'a [PartitionEntry], entry: &PartitionEntry) -> Option<&'a PartitionEntry> {
    entries
        .iter()
        .find(|e| e.offset < entry.end() && entry.offset < e.end())
}

/// Parse a size or offset: `0x1000`, `4096`, `24K`, `1M`.
pub fn parse_size(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    let (digits, multiplier) = if let Some(d) = s.strip_suffix(['K', 'k']) {
        (d, 1024)
    } else if let Some(d) = s.strip_suffix(['M', 'm']) {
        (d, 1024 * 1024)
    } else {
        (s, 1)
    };
    digits.trim().parse::<u32>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_APP: &str = "\
# Name,   Type, SubType, Offset,  Size, Flags
# Note: if you change the phy_init or app partition offset, make sure to change the offset in Kconfig.projbuild
nvs,      data, nvs,     0x9000,  0x6000,
phy_init, data, phy,     0xf000,  0x1000,
factory,  app,  factory, 0x10000, 1M,
";

    #[test]
    fn test_parse_single_app_table() {
        let table = PartitionTable::from_csv(SINGLE_APP).unwrap();
        assert_eq!(table.len(), 3);

        let nvs = table.get("nvs").unwrap();
        assert_eq!(nvs.offset, 0x9000);
        assert_eq!(nvs.size, 0x6000);
        assert_eq!(nvs.kind, "data");
        assert_eq!(nvs.subtype, "nvs");

        let factory = table.get("factory").unwrap();
        assert_eq!(factory.offset, 0x10000);
        assert_eq!(factory.size, 0x100000);
        assert_eq!(factory.end(), 0x110000);
    }

    #[test]
    fn test_empty_offsets_are_packed_and_aligned() {
        let csv = "\
nvs,      data, nvs,     ,        0x4000,
otadata,  data, ota,     ,        0x2000,
phy_init, data, phy,     ,        0x1000,
factory,  app,  factory, ,        1M,
";
        let table = PartitionTable::from_csv(csv).unwrap();
        assert_eq!(table.get("nvs").unwrap().offset, 0x9000);
        assert_eq!(table.get("otadata").unwrap().offset, 0xD000);
        assert_eq!(table.get("phy_init").unwrap().offset, 0xF000);
        assert_eq!(table.get("factory").unwrap().offset, 0x10000);
    }

    #[test]
    fn test_missing_columns_reports_line() {
        let err = PartitionTable::from_csv("# header\nnvs, data, nvs\n").unwrap_err();
        assert!(matches!(err, Error::PartitionTable(msg) if msg.starts_with("line 2:")));
    }

    #[test]
    fn test_invalid_size_rejected() {
        let err = PartitionTable::from_csv("nvs, data, nvs, 0x9000, lots,\n").unwrap_err();
        assert!(matches!(err, Error::PartitionTable(msg) if msg.starts_with("line 1:")));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let csv = "nvs, data, nvs, 0x9000, 0x1000,\nnvs, data, nvs, 0xA000, 0x1000,\n";
        assert!(PartitionTable::from_csv(csv).is_err());

        let entries = vec![
            PartitionEntry::new("nvs", 0x9000, 0x1000),
            PartitionEntry::new("nvs", 0xA000, 0x1000),
        ];
        assert!(matches!(PartitionTable::new(entries), Err(Error::Config(_))));
    }

    #[test]
    fn test_require_unknown_partition() {
        let table = PartitionTable::from_csv(SINGLE_APP).unwrap();
        assert!(table.require("factory").is_ok());
        assert!(matches!(table.require("storage"), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_size_forms() {
        assert_eq!(parse_size("0x1000"), Some(0x1000));
        assert_eq!(parse_size("0X1f"), Some(0x1F));
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("24K"), Some(24 * 1024));
        assert_eq!(parse_size("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("8192M"), None);
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("0xZZ"), None);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0x9000, 0x1000), Some(0x9000));
        assert_eq!(align_up(0x9001, 0x1000), Some(0xA000));
        assert_eq!(align_up(0x10000, 0x10000), Some(0x10000));
        assert_eq!(align_up(0x11000, 0x10000), Some(0x20000));
        assert_eq!(align_up(0xFFFF_FFFF, 0x1000), None);
    }

    #[test]
    fn test_auto_offset_past_4gib_rejected() {
        let csv = "a, data, nvs, 0xFFFFF000, 0xFFF,\nb, data, nvs, , 0x1000,\n";
        let err = PartitionTable::from_csv(csv).unwrap_err();
        assert!(matches!(
            err,
            Error::PartitionTable(msg) if msg == "line 2: partition extends past 4 GiB"
        ));
    }

    #[test]
    fn test_overlapping_partitions_rejected() {
        let csv = "nvs, data, nvs, 0x9000, 0x6000,\nb, data, phy, 0xA000, 0x1000,\n";
        let err = PartitionTable::from_csv(csv).unwrap_err();
        assert!(matches!(
            err,
            Error::PartitionTable(msg) if msg.starts_with("line 2:") && msg.contains("overlaps 'nvs'")
        ));

        let entries = vec![
            PartitionEntry::new("factory", 0x10000, 0x100000),
            PartitionEntry::new("ota_0", 0x80000, 0x10000),
        ];
        assert!(matches!(PartitionTable::new(entries), Err(Error::Config(_))));
    }

    #[test]
    fn test_adjacent_partitions_accepted() {
        let csv = "nvs, data, nvs, 0x9000, 0x6000,\nphy_init, data, phy, 0xF000, 0x1000,\n";
        assert_eq!(PartitionTable::from_csv(csv).unwrap().len(), 2);
    }
}
