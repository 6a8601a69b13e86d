//! Binary partition table image (`partition-table.bin`).
//!
//! ```text
//! +-------+------+---------+--------+------+-----------+-------+
//! | magic | type | subtype | offset | size | label[16] | flags |
//! |  2B   |  1B  |   1B    |   4B   |  4B  |    16B    |  4B   |
//! +-------+------+---------+--------+------+-----------+-------+
//! ```
//!
//! Entries are 32 bytes, little-endian. The list ends at an all-`0xFF`
//! entry; an entry with magic `0xEBEB` carries the MD5 of the preceding
//! entries and is skipped.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::trace;

use super::{PartitionEntry, PartitionTable};
use crate::error::{Error, Result};

const ENTRY_SIZE: usize = 32;
const LABEL_SIZE: usize = 16;
const ENTRY_MAGIC: u16 = 0x50AA;
const MD5_MAGIC: u16 = 0xEBEB;
const END_MAGIC: u16 = 0xFFFF;

/// Largest table the bootloader accepts.
const MAX_TABLE_SIZE: usize = 0xC00;

impl PartitionTable {
    /// Parse a binary partition table image.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let data = &data[..data.len().min(MAX_TABLE_SIZE)];
        let mut entries = Vec::new();

        for (index, chunk) in data.chunks(ENTRY_SIZE).enumerate() {
            if chunk.len() < ENTRY_SIZE {
                return Err(Error::PartitionTable(format!(
                    "entry {index}: truncated ({} bytes)",
                    chunk.len()
                )));
            }

            let mut reader = Cursor::new(chunk);
            let magic = reader.read_u16::<LittleEndian>()?;
            match magic {
                END_MAGIC => {
                    return PartitionTable::new(entries);
                },
                MD5_MAGIC => {
                    trace!("Skipping MD5 entry {index}");
                    continue;
                },
                ENTRY_MAGIC => {},
                other => {
                    return Err(Error::PartitionTable(format!(
                        "entry {index}: bad magic {other:#06x}"
                    )));
                },
            }

            let kind = reader.read_u8()?;
            let subtype = reader.read_u8()?;
            let offset = reader.read_u32::<LittleEndian>()?;
            let size = reader.read_u32::<LittleEndian>()?;

            let mut label = [0u8; LABEL_SIZE];
            reader.read_exact(&mut label)?;
            let label_end = label
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(LABEL_SIZE);
            let name = String::from_utf8_lossy(&label[..label_end]).to_string();

            let _flags = reader.read_u32::<LittleEndian>()?;

            entries.push(PartitionEntry {
                name,
                kind: kind_name(kind),
                subtype: subtype_name(kind, subtype),
                offset,
                size,
            });
        }

        Err(Error::PartitionTable(
            "missing end-of-table marker".to_string(),
        ))
    }
}

fn kind_name(kind: u8) -> String {
    match kind {
        0x00 => "app".to_string(),
        0x01 => "data".to_string(),
        other => format!("{other:#04x}"),
    }
}

fn subtype_name(kind: u8, subtype: u8) -> String {
    let known = match (kind, subtype) {
        (0x00, 0x00) => Some("factory"),
        (0x00, 0x20) => Some("test"),
        (0x00, n @ 0x10..=0x1F) => return format!("ota_{}", n - 0x10),
        (0x01, 0x00) => Some("ota"),
        (0x01, 0x01) => Some("phy"),
        (0x01, 0x02) => Some("nvs"),
        (0x01, 0x03) => Some("coredump"),
        (0x01, 0x04) => Some("nvs_keys"),
        (0x01, 0x05) => Some("efuse"),
        (0x01, 0x80) => Some("esphttpd"),
        (0x01, 0x81) => Some("fat"),
        (0x01, 0x82) => Some("spiffs"),
        _ => None,
    };
    known.map_or_else(|| format!("{subtype:#04x}"), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: u8, subtype: u8, offset: u32, size: u32, label: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENTRY_SIZE);
        out.extend_from_slice(&ENTRY_MAGIC.to_le_bytes());
        out.push(kind);
        out.push(subtype);
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        let mut name = [0u8; LABEL_SIZE];
        name[..label.len()].copy_from_slice(label.as_bytes());
        out.extend_from_slice(&name);
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    fn md5_entry() -> Vec<u8> {
        let mut out = vec![0xEB, 0xEB];
        out.extend_from_slice(&[0xFF; 14]);
        out.extend_from_slice(&[0x5A; 16]);
        out
    }

    #[test]
    fn test_parse_binary_table() {
        let mut image = Vec::new();
        image.extend(entry(0x01, 0x02, 0x9000, 0x6000, "nvs"));
        image.extend(entry(0x01, 0x01, 0xF000, 0x1000, "phy_init"));
        image.extend(entry(0x00, 0x00, 0x10000, 0x100000, "factory"));
        image.extend(entry(0x00, 0x11, 0x110000, 0x100000, "ota_1"));
        image.extend(md5_entry());
        image.extend([0xFF; ENTRY_SIZE]);

        let table = PartitionTable::from_binary(&image).unwrap();
        assert_eq!(table.len(), 4);

        let nvs = table.get("nvs").unwrap();
        assert_eq!((nvs.offset, nvs.size), (0x9000, 0x6000));
        assert_eq!(nvs.kind, "data");
        assert_eq!(nvs.subtype, "nvs");

        assert_eq!(table.get("factory").unwrap().subtype, "factory");
        assert_eq!(table.get("ota_1").unwrap().subtype, "ota_1");
    }

    #[test]
    fn test_trailing_flash_padding_is_ignored() {
        let mut image = entry(0x01, 0x02, 0x9000, 0x6000, "nvs");
        image.extend(vec![0xFF; 0x1000 - ENTRY_SIZE]);
        let table = PartitionTable::from_binary(&image).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut image = entry(0x01, 0x02, 0x9000, 0x6000, "nvs");
        image[0] = 0x00;
        let err = PartitionTable::from_binary(&image).unwrap_err();
        assert!(matches!(err, Error::PartitionTable(msg) if msg.contains("magic")));
    }

    #[test]
    fn test_missing_end_marker_rejected() {
        let image = entry(0x01, 0x02, 0x9000, 0x6000, "nvs");
        assert!(PartitionTable::from_binary(&image).is_err());
    }

    #[test]
    fn test_truncated_entry_rejected() {
        let image = entry(0x01, 0x02, 0x9000, 0x6000, "nvs");
        assert!(PartitionTable::from_binary(&image[..20]).is_err());
    }

    #[test]
    fn test_unknown_types_rendered_as_hex() {
        assert_eq!(kind_name(0x40), "0x40");
        assert_eq!(subtype_name(0x40, 0x01), "0x01");
        assert_eq!(subtype_name(0x01, 0x99), "0x99");
    }
}
