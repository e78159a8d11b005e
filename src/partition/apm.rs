use byteorder::{BigEndian, ByteOrder};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};

use super::{read_for_detection, Partition, PartitionKind};
use crate::config::ReaderConfig;
use crate::error::{HfsError, Result};
use crate::io::decode::c_string;

const DDR_SIGNATURE: u16 = 0x4552; // "ER"
const APM_ENTRY_SIGNATURE: u16 = 0x504D; // "PM"
const APM_OLD_ENTRY_SIGNATURE: u16 = 0x5453; // "TS"
const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Driver Descriptor Record, block 0 of an APM disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverDescriptorRecord {
    pub signature: u16,
    pub block_size: u16,
    pub block_count: u32,
    pub driver_count: u16,
}

impl DriverDescriptorRecord {
    fn parse(data: &[u8]) -> Option<Self> {
        let signature = BigEndian::read_u16(&data[0..2]);
        if signature != DDR_SIGNATURE {
            return None;
        }
        Some(DriverDescriptorRecord {
            signature,
            block_size: BigEndian::read_u16(&data[2..4]),
            block_count: BigEndian::read_u32(&data[4..8]),
            driver_count: BigEndian::read_u16(&data[16..18]),
        })
    }

    /// Block size used for the map and partition offsets; 0 means 512.
    pub fn effective_block_size(&self) -> u32 {
        if self.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size as u32
        }
    }
}

fn is_entry_signature(sig: u16) -> bool {
    sig == APM_ENTRY_SIGNATURE || sig == APM_OLD_ENTRY_SIGNATURE
}

/// A single Apple Partition Map entry (one per block, starting at block 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApmPartitionEntry {
    pub signature: u16,
    pub map_entries: u32,
    pub start_block: u32,
    pub block_count: u32,
    pub name: String,
    pub partition_type: String,
    pub data_start: u32,
    pub data_count: u32,
    pub status: u32,
    pub boot_start: u32,
    pub boot_size: u32,
    pub boot_load: u64,
    pub boot_entry: u64,
    pub boot_checksum: u32,
    pub processor: String,
}

impl ApmPartitionEntry {
    /// Parse a single APM entry from the first 512 bytes of a map block.
    fn parse(data: &[u8]) -> Result<Self> {
        let sig = BigEndian::read_u16(&data[0..2]);
        if !is_entry_signature(sig) {
            return Err(HfsError::InvalidApm(format!(
                "bad partition entry signature: 0x{sig:04X}"
            )));
        }

        Ok(ApmPartitionEntry {
            signature: sig,
            map_entries: BigEndian::read_u32(&data[4..8]),
            start_block: BigEndian::read_u32(&data[8..12]),
            block_count: BigEndian::read_u32(&data[12..16]),
            name: c_string(&data[16..48]),
            partition_type: c_string(&data[48..80]),
            data_start: BigEndian::read_u32(&data[80..84]),
            data_count: BigEndian::read_u32(&data[84..88]),
            status: BigEndian::read_u32(&data[88..92]),
            boot_start: BigEndian::read_u32(&data[92..96]),
            boot_size: BigEndian::read_u32(&data[96..100]),
            boot_load: BigEndian::read_u64(&data[100..108]),
            boot_entry: BigEndian::read_u64(&data[108..116]),
            boot_checksum: BigEndian::read_u32(&data[116..120]),
            processor: c_string(&data[120..136]),
        })
    }

    pub fn kind(&self) -> PartitionKind {
        match self.partition_type.as_str() {
            "Apple_HFS" => PartitionKind::HfsContainer,
            "Apple_HFSX" => PartitionKind::Hfsx,
            "Apple_partition_map" => PartitionKind::PartitionMap,
            "Apple_Free" => PartitionKind::Free,
            "Apple_Void" | "Apple_Scratch" => PartitionKind::Empty,
            t if t.starts_with("Apple_Driver") => PartitionKind::Driver,
            "Apple_Patches" | "Apple_FWDriver" => PartitionKind::Driver,
            _ => PartitionKind::Unknown,
        }
    }

    /// True if this is a "data" partition (not the partition map itself, not free space, not drivers).
    pub fn is_data_partition(&self) -> bool {
        !matches!(
            self.kind(),
            PartitionKind::PartitionMap
                | PartitionKind::Free
                | PartitionKind::Driver
                | PartitionKind::Empty
        )
    }

    /// True if the bootable status flag (bit 3) is set.
    pub fn is_bootable(&self) -> bool {
        self.status & 0x08 != 0
    }

    /// Data area in blocks: `(start_block + data_start, data_count)`. Entries
    /// that leave `data_count` at zero cover the whole partition.
    fn data_area(&self) -> (u64, u64) {
        let count = if self.data_count == 0 {
            self.block_count
        } else {
            self.data_count
        };
        (
            self.start_block as u64 + self.data_start as u64,
            count as u64,
        )
    }
}

/// Top-level Apple Partition Map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apm {
    pub base_offset: u64,
    pub ddr: DriverDescriptorRecord,
    pub entries: Vec<ApmPartitionEntry>,
    pub map_entry_count: u32,
}

impl Apm {
    /// DDR signature at block 0 and a map entry signature in block 1.
    pub fn detect<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64) -> Result<bool> {
        let mut block = [0u8; 512];
        if !read_for_detection(reader, offset, &mut block)? {
            return Ok(false);
        }
        let Some(ddr) = DriverDescriptorRecord::parse(&block) else {
            return Ok(false);
        };
        let entry_pos = offset + ddr.effective_block_size() as u64;
        if !read_for_detection(reader, entry_pos, &mut block)? {
            return Ok(false);
        }
        Ok(is_entry_signature(BigEndian::read_u16(&block[0..2])))
    }

    /// Load the map at `offset`. Every entry must carry a map signature and
    /// agree with the first entry on the number of map entries.
    pub fn load<R: Read + Seek + ?Sized>(
        reader: &mut R,
        offset: u64,
        config: &ReaderConfig,
    ) -> Result<Self> {
        let mut block = [0u8; 512];
        crate::io::read_exact_at(reader, offset, &mut block)
            .map_err(|e| HfsError::InvalidApm(format!("cannot read DDR: {e}")))?;
        let ddr = DriverDescriptorRecord::parse(&block).ok_or_else(|| {
            HfsError::InvalidApm(format!(
                "bad DDR signature: 0x{:04X}",
                BigEndian::read_u16(&block[0..2])
            ))
        })?;
        let block_size = ddr.effective_block_size() as u64;
        if block_size < 512 {
            return Err(HfsError::InvalidApm(format!(
                "DDR block size {block_size} is smaller than a map entry"
            )));
        }

        let read_entry = |reader: &mut R, i: u64, block: &mut [u8; 512]| -> Result<ApmPartitionEntry> {
            crate::io::read_exact_at(reader, offset + (1 + i) * block_size, block).map_err(|e| {
                HfsError::InvalidApm(format!("cannot read APM entry {}: {e}", i + 1))
            })?;
            ApmPartitionEntry::parse(&block[..])
        };

        let first_entry = read_entry(reader, 0, &mut block)?;
        let map_entry_count = first_entry.map_entries;
        if map_entry_count == 0 || map_entry_count > config.max_apm_entries {
            return Err(HfsError::InvalidApm(format!(
                "invalid map entry count: {map_entry_count}"
            )));
        }

        let mut entries = vec![first_entry];
        for i in 1..map_entry_count as u64 {
            let entry = read_entry(reader, i, &mut block)?;
            if entry.map_entries != map_entry_count {
                return Err(HfsError::InvalidApm(format!(
                    "entry {} claims {} map entries, first entry claims {map_entry_count}",
                    i + 1,
                    entry.map_entries
                )));
            }
            entries.push(entry);
        }
        debug!(
            "APM at {offset}: block size {block_size}, {} entries",
            entries.len()
        );

        Ok(Apm {
            base_offset: offset,
            ddr,
            entries,
            map_entry_count,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.ddr.effective_block_size() as u64
    }

    pub fn partitions(&self) -> Vec<Partition> {
        let bs = self.block_size();
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let (start, count) = e.data_area();
                Partition {
                    index: i,
                    start_offset: self.base_offset + start * bs,
                    length: count * bs,
                    kind: e.kind(),
                    name: e.name.clone(),
                    type_label: e.partition_type.clone(),
                }
            })
            .collect()
    }
}
