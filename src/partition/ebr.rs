//! DOS extended partitions: a linked chain of Extended Boot Records.
//!
//! Each EBR is a 512-byte MBR-like sector that uses only its first two table
//! entries:
//! - Entry 0: the logical partition (start LBA relative to this EBR)
//! - Entry 1: link to the next EBR (start LBA relative to the extended container)
//!
//! A zero link ends the chain.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Read, Seek};

use super::mbr::{
    MbrPartitionEntry, MBR_SIGNATURE, PARTITION_ENTRY_SIZE, PARTITION_TABLE_OFFSET, SECTOR_SIZE,
};
use super::{read_for_detection, Partition};
use crate::config::ReaderConfig;
use crate::error::{HfsError, Result};

/// One record of the chain with its absolute position.
#[derive(Debug, Clone, Serialize)]
pub struct ExtendedBootRecord {
    pub offset: u64,
    pub logical: MbrPartitionEntry,
    pub link: MbrPartitionEntry,
}

impl ExtendedBootRecord {
    fn parse(data: &[u8; 512], offset: u64) -> Result<Self> {
        let signature = LittleEndian::read_u16(&data[510..512]);
        if signature != MBR_SIGNATURE {
            return Err(HfsError::InvalidEbr(format!(
                "EBR at offset {offset} has signature {signature:#06X}"
            )));
        }
        let e1 = PARTITION_TABLE_OFFSET + PARTITION_ENTRY_SIZE;
        let logical = MbrPartitionEntry::parse(&data[PARTITION_TABLE_OFFSET..e1]);
        let link = MbrPartitionEntry::parse(&data[e1..e1 + PARTITION_ENTRY_SIZE]);
        Ok(Self {
            offset,
            logical,
            link,
        })
    }

    fn has_link(&self) -> bool {
        self.link.start_lba != 0 || self.link.total_sectors != 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DosExtended {
    pub container_offset: u64,
    pub container_length: u64,
    pub records: Vec<ExtendedBootRecord>,
}

impl DosExtended {
    /// The first EBR carries the boot signature, legal status bytes and
    /// nothing in table slots 2 and 3.
    pub fn detect<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64) -> Result<bool> {
        let mut data = [0u8; 512];
        if !read_for_detection(reader, offset, &mut data)? {
            return Ok(false);
        }
        if LittleEndian::read_u16(&data[510..512]) != MBR_SIGNATURE {
            return Ok(false);
        }
        let entries: Vec<MbrPartitionEntry> = (0..4)
            .map(|i| {
                let off = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
                MbrPartitionEntry::parse(&data[off..off + PARTITION_ENTRY_SIZE])
            })
            .collect();
        Ok(entries.iter().all(|e| e.has_valid_status())
            && entries[2].is_empty()
            && entries[3].is_empty())
    }

    /// Walk the chain of the extended container at `[offset, offset + length)`.
    ///
    /// Revisiting an EBR, pointing outside the container, an unreadable
    /// sector and a bad signature all fail the whole chain.
    pub fn load<R: Read + Seek + ?Sized>(
        reader: &mut R,
        offset: u64,
        length: u64,
        config: &ReaderConfig,
    ) -> Result<Self> {
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut current = offset;
        let end = offset.saturating_add(length);

        loop {
            if records.len() >= config.max_logical_partitions {
                return Err(HfsError::InvalidEbr(format!(
                    "more than {} logical partitions",
                    config.max_logical_partitions
                )));
            }
            if !visited.insert(current) {
                return Err(HfsError::InvalidEbr(format!(
                    "EBR chain loops back to offset {current}"
                )));
            }
            if current < offset || current + SECTOR_SIZE > end {
                return Err(HfsError::InvalidEbr(format!(
                    "EBR at offset {current} lies outside container [{offset}, {end})"
                )));
            }

            let mut data = [0u8; 512];
            crate::io::read_exact_at(reader, current, &mut data).map_err(|e| {
                HfsError::InvalidEbr(format!("cannot read EBR at offset {current}: {e}"))
            })?;
            let ebr = ExtendedBootRecord::parse(&data, current)?;
            debug!(
                "EBR at {current}: logical type {:#04X} start {} sectors {}",
                ebr.logical.partition_type, ebr.logical.start_lba, ebr.logical.total_sectors
            );

            let next = ebr
                .has_link()
                .then(|| offset + ebr.link.start_lba as u64 * SECTOR_SIZE);
            records.push(ebr);
            match next {
                Some(next) => current = next,
                None => break,
            }
        }

        Ok(Self {
            container_offset: offset,
            container_length: length,
            records,
        })
    }

    /// Logical partitions with absolute offsets. Indices continue after the
    /// four primary MBR slots.
    pub fn partitions(&self) -> Vec<Partition> {
        self.records
            .iter()
            .filter(|r| !r.logical.is_empty())
            .enumerate()
            .map(|(i, r)| Partition {
                index: 4 + i,
                start_offset: r.offset + r.logical.start_bytes(),
                length: r.logical.size_bytes(),
                kind: r.logical.kind(),
                name: String::new(),
                type_label: r.logical.partition_type_name().to_string(),
            })
            .collect()
    }
}
