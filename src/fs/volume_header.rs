//! Volume headers: the classic HFS Master Directory Block and the HFS+/HFSX
//! volume header, both 512 bytes at volume offset 1024.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{Read, Seek};

use super::extents::ForkData;
use super::hfs_timestamp;
use super::mac_roman::mac_roman_to_utf8;
use crate::error::{HfsError, Result};
use crate::io::decode::pascal_bytes;

pub const VOLUME_HEADER_OFFSET: u64 = 1024;
pub const HFS_SIGNATURE: u16 = 0x4244; // "BD"
pub const HFS_PLUS_SIGNATURE: u16 = 0x482B; // "H+"
pub const HFSX_SIGNATURE: u16 = 0x4858; // "HX"

const ATTR_UNMOUNTED: u32 = 1 << 8;
const ATTR_INCONSISTENT: u32 = 1 << 11;
const ATTR_JOURNALED: u32 = 1 << 13;

/// On-disk format found at a volume offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolumeFormat {
    Hfs,
    HfsPlus,
    Hfsx,
    /// Classic HFS wrapper whose MDB points at an embedded HFS+ volume.
    WrappedHfsPlus,
}

impl VolumeFormat {
    pub fn name(self) -> &'static str {
        match self {
            VolumeFormat::Hfs => "HFS",
            VolumeFormat::HfsPlus => "HFS+",
            VolumeFormat::Hfsx => "HFSX",
            VolumeFormat::WrappedHfsPlus => "HFS+ (wrapped)",
        }
    }
}

/// Read the signature at `offset + 1024`. `None` when no HFS family
/// signature is present or the stream is too short.
pub fn detect_volume_format<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
) -> Result<Option<VolumeFormat>> {
    let mut sector = [0u8; 512];
    match crate::io::read_exact_at(reader, offset + VOLUME_HEADER_OFFSET, &mut sector) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    Ok(match BigEndian::read_u16(&sector[0..2]) {
        HFS_SIGNATURE => {
            if BigEndian::read_u16(&sector[124..126]) == HFS_PLUS_SIGNATURE {
                Some(VolumeFormat::WrappedHfsPlus)
            } else {
                Some(VolumeFormat::Hfs)
            }
        }
        HFS_PLUS_SIGNATURE => Some(VolumeFormat::HfsPlus),
        HFSX_SIGNATURE => Some(VolumeFormat::Hfsx),
        _ => None,
    })
}

/// HFS Master Directory Block (MDB).
#[derive(Debug, Clone, Serialize)]
pub struct HfsMasterDirectoryBlock {
    pub signature: u16,
    pub create_date: u32,
    pub modify_date: u32,
    pub attributes: u16,
    pub root_file_count: u16,
    /// First block of the volume bitmap, in physical sectors (`drVBMSt`).
    pub volume_bitmap_block: u16,
    pub next_allocation: u16,
    pub total_blocks: u16,
    pub block_size: u32,
    pub clump_size: u32,
    /// First allocation block's offset in physical sectors from volume start.
    pub first_alloc_block: u16,
    pub next_catalog_id: u32,
    pub free_blocks: u16,
    pub volume_name: String,
    #[serde(skip)]
    pub volume_name_raw: Vec<u8>,
    pub backup_date: u32,
    pub write_count: u32,
    pub extents_clump_size: u32,
    pub catalog_clump_size: u32,
    pub root_dir_count: u16,
    pub file_count: u32,
    pub dir_count: u32,
    pub finder_info: [u32; 8],
    pub embedded_signature: u16,
    pub embedded_start_block: u16,
    pub embedded_block_count: u16,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
}

impl HfsMasterDirectoryBlock {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 162 {
            return Err(HfsError::InvalidVolumeHeader("MDB too short".into()));
        }
        let sig = BigEndian::read_u16(&data[0..2]);
        if sig != HFS_SIGNATURE {
            return Err(HfsError::InvalidVolumeHeader(format!(
                "bad MDB signature: 0x{sig:04X}"
            )));
        }

        // Volume name: Pascal string at offset 36 (length byte + up to 27 chars)
        let name_raw = pascal_bytes(&data[36..64], 27).to_vec();
        let block_size = BigEndian::read_u32(&data[20..24]);
        let extents_clump_size = BigEndian::read_u32(&data[74..78]);
        let catalog_clump_size = BigEndian::read_u32(&data[78..82]);

        let mut finder_info = [0u32; 8];
        for (i, v) in finder_info.iter_mut().enumerate() {
            *v = BigEndian::read_u32(&data[92 + i * 4..96 + i * 4]);
        }

        Ok(HfsMasterDirectoryBlock {
            signature: sig,
            create_date: BigEndian::read_u32(&data[2..6]),
            modify_date: BigEndian::read_u32(&data[6..10]),
            attributes: BigEndian::read_u16(&data[10..12]),
            root_file_count: BigEndian::read_u16(&data[12..14]),
            volume_bitmap_block: BigEndian::read_u16(&data[14..16]),
            next_allocation: BigEndian::read_u16(&data[16..18]),
            total_blocks: BigEndian::read_u16(&data[18..20]),
            block_size,
            clump_size: BigEndian::read_u32(&data[24..28]),
            first_alloc_block: BigEndian::read_u16(&data[28..30]),
            next_catalog_id: BigEndian::read_u32(&data[30..34]),
            free_blocks: BigEndian::read_u16(&data[34..36]),
            volume_name: mac_roman_to_utf8(&name_raw),
            volume_name_raw: name_raw,
            backup_date: BigEndian::read_u32(&data[64..68]),
            write_count: BigEndian::read_u32(&data[70..74]),
            extents_clump_size,
            catalog_clump_size,
            root_dir_count: BigEndian::read_u16(&data[82..84]),
            file_count: BigEndian::read_u32(&data[84..88]),
            dir_count: BigEndian::read_u32(&data[88..92]),
            finder_info,
            embedded_signature: BigEndian::read_u16(&data[124..126]),
            embedded_start_block: BigEndian::read_u16(&data[126..128]),
            embedded_block_count: BigEndian::read_u16(&data[128..130]),
            extents_file: ForkData::from_hfs(
                BigEndian::read_u32(&data[130..134]) as u64,
                extents_clump_size,
                &data[134..146],
            ),
            catalog_file: ForkData::from_hfs(
                BigEndian::read_u32(&data[146..150]) as u64,
                catalog_clump_size,
                &data[150..162],
            ),
        })
    }

    /// True if this MDB wraps an embedded HFS+ volume.
    pub fn has_embedded_hfs_plus(&self) -> bool {
        self.embedded_signature == HFS_PLUS_SIGNATURE
    }

    /// Byte offset of the embedded volume relative to the wrapper's start.
    pub fn embedded_volume_offset(&self, sector_size: u32) -> u64 {
        self.first_alloc_block as u64 * sector_size as u64
            + self.embedded_start_block as u64 * self.block_size as u64
    }

    pub fn embedded_volume_length(&self) -> u64 {
        self.embedded_block_count as u64 * self.block_size as u64
    }

    /// Byte offset of the volume bitmap relative to the volume start.
    pub fn bitmap_offset(&self, sector_size: u32) -> u64 {
        self.volume_bitmap_block as u64 * sector_size as u64
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        hfs_timestamp(self.create_date)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        hfs_timestamp(self.modify_date)
    }
}

/// HFS+ / HFSX volume header.
#[derive(Debug, Clone, Serialize)]
pub struct HfsPlusVolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub last_mounted_version: u32,
    pub journal_info_block: u32,
    pub create_date: u32,
    pub modify_date: u32,
    pub backup_date: u32,
    pub checked_date: u32,
    pub file_count: u32,
    pub folder_count: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub next_allocation: u32,
    pub rsrc_clump_size: u32,
    pub data_clump_size: u32,
    pub next_catalog_id: u32,
    pub write_count: u32,
    pub encodings_bitmap: u64,
    pub finder_info: [u32; 8],
    pub allocation_file: ForkData,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
    pub attributes_file: ForkData,
    pub startup_file: ForkData,
}

impl HfsPlusVolumeHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 512 {
            return Err(HfsError::InvalidVolumeHeader(
                "volume header too short".into(),
            ));
        }
        let sig = BigEndian::read_u16(&data[0..2]);
        if sig != HFS_PLUS_SIGNATURE && sig != HFSX_SIGNATURE {
            return Err(HfsError::InvalidVolumeHeader(format!(
                "bad HFS+ volume header signature: 0x{sig:04X}"
            )));
        }

        let mut finder_info = [0u32; 8];
        for (i, v) in finder_info.iter_mut().enumerate() {
            *v = BigEndian::read_u32(&data[80 + i * 4..84 + i * 4]);
        }

        Ok(HfsPlusVolumeHeader {
            signature: sig,
            version: BigEndian::read_u16(&data[2..4]),
            attributes: BigEndian::read_u32(&data[4..8]),
            last_mounted_version: BigEndian::read_u32(&data[8..12]),
            journal_info_block: BigEndian::read_u32(&data[12..16]),
            create_date: BigEndian::read_u32(&data[16..20]),
            modify_date: BigEndian::read_u32(&data[20..24]),
            backup_date: BigEndian::read_u32(&data[24..28]),
            checked_date: BigEndian::read_u32(&data[28..32]),
            file_count: BigEndian::read_u32(&data[32..36]),
            folder_count: BigEndian::read_u32(&data[36..40]),
            block_size: BigEndian::read_u32(&data[40..44]),
            total_blocks: BigEndian::read_u32(&data[44..48]),
            free_blocks: BigEndian::read_u32(&data[48..52]),
            next_allocation: BigEndian::read_u32(&data[52..56]),
            rsrc_clump_size: BigEndian::read_u32(&data[56..60]),
            data_clump_size: BigEndian::read_u32(&data[60..64]),
            next_catalog_id: BigEndian::read_u32(&data[64..68]),
            write_count: BigEndian::read_u32(&data[68..72]),
            encodings_bitmap: BigEndian::read_u64(&data[72..80]),
            finder_info,
            allocation_file: ForkData::parse_hfsplus(&data[112..192]),
            extents_file: ForkData::parse_hfsplus(&data[192..272]),
            catalog_file: ForkData::parse_hfsplus(&data[272..352]),
            attributes_file: ForkData::parse_hfsplus(&data[352..432]),
            startup_file: ForkData::parse_hfsplus(&data[432..512]),
        })
    }

    pub fn is_hfsx(&self) -> bool {
        self.signature == HFSX_SIGNATURE
    }

    pub fn is_journaled(&self) -> bool {
        self.attributes & ATTR_JOURNALED != 0
    }

    pub fn was_cleanly_unmounted(&self) -> bool {
        self.attributes & ATTR_UNMOUNTED != 0
    }

    pub fn is_inconsistent(&self) -> bool {
        self.attributes & ATTR_INCONSISTENT != 0
    }

    /// Creation date is stored in local time; the others in UTC.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        hfs_timestamp(self.create_date)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        hfs_timestamp(self.modify_date)
    }

    pub fn checked(&self) -> Option<DateTime<Utc>> {
        hfs_timestamp(self.checked_date)
    }
}

/// Either header, with the accessors the rest of the engine needs.
#[derive(Debug, Clone, Serialize)]
pub enum VolumeHeader {
    Hfs(HfsMasterDirectoryBlock),
    HfsPlus(HfsPlusVolumeHeader),
}

impl VolumeHeader {
    /// Read and decode the header of the volume starting at `offset`.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64) -> Result<Self> {
        let mut sector = [0u8; 512];
        crate::io::read_exact_at(reader, offset + VOLUME_HEADER_OFFSET, &mut sector)?;
        match BigEndian::read_u16(&sector[0..2]) {
            HFS_SIGNATURE => Ok(VolumeHeader::Hfs(HfsMasterDirectoryBlock::parse(&sector)?)),
            HFS_PLUS_SIGNATURE | HFSX_SIGNATURE => Ok(VolumeHeader::HfsPlus(
                HfsPlusVolumeHeader::parse(&sector)?,
            )),
            sig => Err(HfsError::InvalidVolumeHeader(format!(
                "no HFS signature at offset {}: 0x{sig:04X}",
                offset + VOLUME_HEADER_OFFSET
            ))),
        }
    }

    pub fn format(&self) -> VolumeFormat {
        match self {
            VolumeHeader::Hfs(mdb) if mdb.has_embedded_hfs_plus() => VolumeFormat::WrappedHfsPlus,
            VolumeHeader::Hfs(_) => VolumeFormat::Hfs,
            VolumeHeader::HfsPlus(h) if h.is_hfsx() => VolumeFormat::Hfsx,
            VolumeHeader::HfsPlus(_) => VolumeFormat::HfsPlus,
        }
    }

    pub fn is_hfs_plus(&self) -> bool {
        matches!(self, VolumeHeader::HfsPlus(_))
    }

    pub fn allocation_block_size(&self) -> u32 {
        match self {
            VolumeHeader::Hfs(mdb) => mdb.block_size,
            VolumeHeader::HfsPlus(h) => h.block_size,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        match self {
            VolumeHeader::Hfs(mdb) => mdb.total_blocks as u32,
            VolumeHeader::HfsPlus(h) => h.total_blocks,
        }
    }

    pub fn free_blocks(&self) -> u32 {
        match self {
            VolumeHeader::Hfs(mdb) => mdb.free_blocks as u32,
            VolumeHeader::HfsPlus(h) => h.free_blocks,
        }
    }

    /// Start of allocation block 0, in physical sectors.
    pub fn allocation_block_start(&self) -> u64 {
        match self {
            VolumeHeader::Hfs(mdb) => mdb.first_alloc_block as u64,
            VolumeHeader::HfsPlus(_) => 0,
        }
    }

    pub fn catalog_file(&self) -> &ForkData {
        match self {
            VolumeHeader::Hfs(mdb) => &mdb.catalog_file,
            VolumeHeader::HfsPlus(h) => &h.catalog_file,
        }
    }

    pub fn extents_file(&self) -> &ForkData {
        match self {
            VolumeHeader::Hfs(mdb) => &mdb.extents_file,
            VolumeHeader::HfsPlus(h) => &h.extents_file,
        }
    }

    pub fn attributes_file(&self) -> Option<&ForkData> {
        match self {
            VolumeHeader::HfsPlus(h) if h.attributes_file.logical_size > 0 => {
                Some(&h.attributes_file)
            }
            _ => None,
        }
    }

    pub fn allocation_file(&self) -> Option<&ForkData> {
        match self {
            VolumeHeader::HfsPlus(h) => Some(&h.allocation_file),
            VolumeHeader::Hfs(_) => None,
        }
    }

    pub fn journal_info_block(&self) -> Option<u32> {
        match self {
            VolumeHeader::HfsPlus(h) if h.is_journaled() => Some(h.journal_info_block),
            _ => None,
        }
    }

    pub fn is_journaled(&self) -> bool {
        self.journal_info_block().is_some()
    }

    /// Classic HFS keeps the name in the MDB; HFS+ keeps it only in the
    /// root folder's thread record.
    pub fn volume_name(&self) -> Option<&str> {
        match self {
            VolumeHeader::Hfs(mdb) => Some(&mdb.volume_name),
            VolumeHeader::HfsPlus(_) => None,
        }
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        match self {
            VolumeHeader::Hfs(mdb) => mdb.modified(),
            VolumeHeader::HfsPlus(h) => h.modified(),
        }
    }

    /// Structural checks that do not need the rest of the volume.
    ///
    /// `stream_len` is the byte length available to the volume, when known.
    pub fn validate(&self, stream_len: Option<u64>, sector_size: u32) -> Result<()> {
        let bs = self.allocation_block_size();
        match self {
            VolumeHeader::HfsPlus(_) => {
                if bs < 512 || !bs.is_power_of_two() {
                    return Err(HfsError::InvalidVolumeHeader(format!(
                        "block size {bs} is not a power of two of at least 512"
                    )));
                }
            }
            VolumeHeader::Hfs(_) => {
                if bs == 0 || bs % 512 != 0 {
                    return Err(HfsError::InvalidVolumeHeader(format!(
                        "allocation block size {bs} is not a multiple of 512"
                    )));
                }
            }
        }
        if self.free_blocks() > self.total_blocks() {
            return Err(HfsError::InvalidVolumeHeader(format!(
                "{} free blocks exceed {} total blocks",
                self.free_blocks(),
                self.total_blocks()
            )));
        }
        if let Some(len) = stream_len {
            let needed = self.allocation_block_start() * sector_size as u64
                + bs as u64 * self.total_blocks() as u64;
            if needed > len {
                return Err(HfsError::InvalidVolumeHeader(format!(
                    "volume needs {needed} bytes but the stream holds {len}"
                )));
            }
        }
        Ok(())
    }
}
