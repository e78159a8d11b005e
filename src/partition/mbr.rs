use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::io::{Read, Seek};

use super::{read_for_detection, Partition, PartitionKind, PartitionSystemType};
use crate::error::{HfsError, Result};

pub(crate) const MBR_SIGNATURE: u16 = 0xAA55;
pub(crate) const PARTITION_TABLE_OFFSET: usize = 446;
pub(crate) const PARTITION_ENTRY_SIZE: usize = 16;
pub(crate) const SECTOR_SIZE: u64 = 512;

/// CHS (Cylinder-Head-Sector) address extracted from MBR partition entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChsAddress {
    pub head: u8,
    pub sector: u8,    // bits 0-5 only (6 bits)
    pub cylinder: u16, // 10 bits: 2 high bits from sector byte + 8 bits from cylinder byte
}

impl ChsAddress {
    fn parse(bytes: &[u8]) -> Self {
        let head = bytes[0];
        let sector = bytes[1] & 0x3F;
        let cylinder = ((bytes[1] as u16 & 0xC0) << 2) | bytes[2] as u16;
        Self {
            head,
            sector,
            cylinder,
        }
    }
}

/// A single MBR partition table entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MbrPartitionEntry {
    pub status: u8,
    pub partition_type: u8,
    pub start_lba: u32,
    pub total_sectors: u32,
    pub chs_start: ChsAddress,
    pub chs_end: ChsAddress,
}

impl MbrPartitionEntry {
    pub(crate) fn parse(data: &[u8]) -> Self {
        Self {
            status: data[0],
            chs_start: ChsAddress::parse(&data[1..4]),
            partition_type: data[4],
            chs_end: ChsAddress::parse(&data[5..8]),
            start_lba: LittleEndian::read_u32(&data[8..12]),
            total_sectors: LittleEndian::read_u32(&data[12..16]),
        }
    }

    pub fn is_bootable(&self) -> bool {
        self.status == 0x80
    }

    /// Status byte is one of the two values a partition table may hold.
    pub fn has_valid_status(&self) -> bool {
        self.status == 0x00 || self.status == 0x80
    }

    pub fn is_empty(&self) -> bool {
        self.partition_type == 0x00 && self.start_lba == 0 && self.total_sectors == 0
    }

    /// Check if this entry is an extended partition container (CHS, LBA, or Linux).
    pub fn is_extended(&self) -> bool {
        matches!(self.partition_type, 0x05 | 0x0F | 0x85)
    }

    pub fn start_bytes(&self) -> u64 {
        self.start_lba as u64 * SECTOR_SIZE
    }

    pub fn size_bytes(&self) -> u64 {
        self.total_sectors as u64 * SECTOR_SIZE
    }

    pub fn kind(&self) -> PartitionKind {
        match self.partition_type {
            0x00 => PartitionKind::Empty,
            0xAF => PartitionKind::HfsContainer,
            0xEE => PartitionKind::PartitionSystem(PartitionSystemType::Gpt),
            0x05 | 0x0F | 0x85 => PartitionKind::PartitionSystem(PartitionSystemType::DosExtended),
            _ => PartitionKind::Unknown,
        }
    }

    pub fn partition_type_name(&self) -> &'static str {
        match self.partition_type {
            0x00 => "Empty",
            0x01 => "FAT12",
            0x04 => "FAT16 (<32MB)",
            0x05 => "Extended",
            0x06 => "FAT16 (>32MB)",
            0x07 => "NTFS/HPFS/exFAT",
            0x0B => "FAT32 (CHS)",
            0x0C => "FAT32 (LBA)",
            0x0E => "FAT16 (LBA)",
            0x0F => "Extended (LBA)",
            0x82 => "Linux swap",
            0x83 => "Linux",
            0x85 => "Linux Extended",
            0x8E => "Linux LVM",
            0xA5 => "FreeBSD",
            0xA6 => "OpenBSD",
            0xA8 => "Darwin UFS",
            0xAB => "Darwin Boot",
            0xAF => "HFS/HFS+",
            0xEE => "GPT Protective",
            0xEF => "EFI System",
            0xFD => "Linux RAID",
            _ => "Unknown",
        }
    }
}

/// Parsed MBR (Master Boot Record).
#[derive(Debug, Clone, Serialize)]
pub struct Mbr {
    /// Byte offset of the MBR sector in the stream it was loaded from.
    pub base_offset: u64,
    pub disk_signature: u32,
    pub entries: [MbrPartitionEntry; 4],
}

impl Mbr {
    /// Parse an MBR from exactly 512 bytes.
    pub fn parse(data: &[u8; 512]) -> Result<Self> {
        let signature = LittleEndian::read_u16(&data[510..512]);
        if signature != MBR_SIGNATURE {
            return Err(HfsError::InvalidMbr(format!(
                "invalid boot signature: expected 0xAA55, got {signature:#06X}"
            )));
        }

        let disk_signature = LittleEndian::read_u32(&data[440..444]);
        let entries: [MbrPartitionEntry; 4] = std::array::from_fn(|i| {
            let offset = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            MbrPartitionEntry::parse(&data[offset..offset + PARTITION_ENTRY_SIZE])
        });

        if let Some(bad) = entries.iter().position(|e| !e.has_valid_status()) {
            return Err(HfsError::InvalidMbr(format!(
                "entry {bad} has invalid status byte {:#04X}",
                entries[bad].status
            )));
        }

        Ok(Self {
            base_offset: 0,
            disk_signature,
            entries,
        })
    }

    /// True when the sector at `offset` carries the boot signature and
    /// every entry has a legal status byte. Volume boot sectors also end in
    /// 0xAA55 but carry code where the table sits, which fails the status check.
    pub fn detect<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64) -> Result<bool> {
        let mut data = [0u8; 512];
        if !read_for_detection(reader, offset, &mut data)? {
            return Ok(false);
        }
        Ok(Self::parse(&data).is_ok())
    }

    pub fn load<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64) -> Result<Self> {
        let mut data = [0u8; 512];
        crate::io::read_exact_at(reader, offset, &mut data)
            .map_err(|e| HfsError::InvalidMbr(format!("cannot read sector at {offset}: {e}")))?;
        let mut mbr = Self::parse(&data)?;
        mbr.base_offset = offset;
        Ok(mbr)
    }

    /// Check if this MBR is a GPT protective MBR.
    pub fn is_protective_gpt(&self) -> bool {
        let non_empty: Vec<_> = self.entries.iter().filter(|e| !e.is_empty()).collect();
        non_empty.len() == 1 && non_empty[0].partition_type == 0xEE
    }

    /// Return only non-empty partition entries.
    pub fn active_entries(&self) -> Vec<&MbrPartitionEntry> {
        self.entries.iter().filter(|e| !e.is_empty()).collect()
    }

    pub fn partitions(&self) -> Vec<Partition> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_empty())
            .map(|(i, e)| Partition {
                index: i,
                start_offset: self.base_offset + e.start_bytes(),
                length: e.size_bytes(),
                kind: e.kind(),
                name: String::new(),
                type_label: e.partition_type_name().to_string(),
            })
            .collect()
    }
}
