use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use serde::Serialize;
use std::io::{Read, Seek};

use super::{read_for_detection, Partition, PartitionKind};
use crate::error::{HfsError, Result};
use crate::io::decode::utf16le_string;

const GPT_SIGNATURE: u64 = 0x5452415020494645; // "EFI PART"
const GPT_HEADER_LBA: u64 = 1;
const SECTOR_SIZE: u64 = 512;
const MIN_HEADER_SIZE: u32 = 92;
const MIN_ENTRY_SIZE: u32 = 128;
/// Upper bound on the partition entry array read into memory.
const MAX_ARRAY_BYTES: u64 = 4 * 1024 * 1024;

/// A 128-bit GUID stored as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// Format as standard GUID string (mixed-endian, as UEFI lays it out).
    pub fn to_string_formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            d[3], d[2], d[1], d[0], // time_low (LE)
            d[5], d[4],             // time_mid (LE)
            d[7], d[6],             // time_hi (LE)
            d[8], d[9],             // clock_seq (BE)
            d[10], d[11], d[12], d[13], d[14], d[15] // node (BE)
        )
    }

    /// Look up a well-known partition type name from GUID.
    pub fn partition_type_name(&self) -> &'static str {
        match self.to_string_formatted().as_str() {
            "00000000-0000-0000-0000-000000000000" => "Unused",
            "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI System",
            "21686148-6449-6E6F-7468-656564454649" => "BIOS Boot",
            "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Microsoft Basic Data",
            "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux Filesystem",
            "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux Swap",
            HFS_PLUS_GUID => "Apple HFS/HFS+",
            "7C3457EF-0000-11AA-AA11-00306543ECAC" => "Apple APFS",
            "55465300-0000-11AA-AA11-00306543ECAC" => "Apple UFS",
            "426F6F74-0000-11AA-AA11-00306543ECAC" => "Apple Boot",
            "52414944-0000-11AA-AA11-00306543ECAC" => "Apple RAID",
            "52414944-5F4F-11AA-AA11-00306543ECAC" => "Apple RAID (offline)",
            "4C616265-6C00-11AA-AA11-00306543ECAC" => "Apple Label",
            "5265636F-7665-11AA-AA11-00306543ECAC" => "Apple TV Recovery",
            "53746F72-6167-11AA-AA11-00306543ECAC" => "Apple Core Storage",
            "516E7CB4-6ECF-11D6-8FF8-00022D09712B" => "FreeBSD Data",
            _ => "Unknown",
        }
    }

    pub fn kind(&self) -> PartitionKind {
        if self.is_zero() {
            PartitionKind::Empty
        } else if self.to_string_formatted() == HFS_PLUS_GUID {
            PartitionKind::HfsContainer
        } else {
            PartitionKind::Unknown
        }
    }
}

const HFS_PLUS_GUID: &str = "48465300-0000-11AA-AA11-00306543ECAC";

impl Serialize for Guid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_formatted())
    }
}

/// GPT header (primary at LBA 1, backup at the last LBA).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GptHeader {
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub my_lba: u64,
    pub alternate_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Guid,
    pub partition_entry_lba: u64,
    pub num_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_array_crc32: u32,
}

impl GptHeader {
    /// Decode a header from its sector. Only the signature and size fields
    /// are checked here; the CRC is checked by [`GptHeader::crc_matches`].
    pub fn parse(sector: &[u8; 512]) -> Result<Self> {
        let signature = LittleEndian::read_u64(&sector[0..8]);
        if signature != GPT_SIGNATURE {
            return Err(HfsError::InvalidGpt(format!(
                "invalid GPT signature: expected 0x{GPT_SIGNATURE:016X}, got 0x{signature:016X}"
            )));
        }
        let header_size = LittleEndian::read_u32(&sector[12..16]);
        if !(MIN_HEADER_SIZE..=SECTOR_SIZE as u32).contains(&header_size) {
            return Err(HfsError::InvalidGpt(format!(
                "header size {header_size} outside 92..=512"
            )));
        }
        let mut disk_guid = [0u8; 16];
        disk_guid.copy_from_slice(&sector[56..72]);

        Ok(GptHeader {
            revision: LittleEndian::read_u32(&sector[8..12]),
            header_size,
            header_crc32: LittleEndian::read_u32(&sector[16..20]),
            my_lba: LittleEndian::read_u64(&sector[24..32]),
            alternate_lba: LittleEndian::read_u64(&sector[32..40]),
            first_usable_lba: LittleEndian::read_u64(&sector[40..48]),
            last_usable_lba: LittleEndian::read_u64(&sector[48..56]),
            disk_guid: Guid(disk_guid),
            partition_entry_lba: LittleEndian::read_u64(&sector[72..80]),
            num_partition_entries: LittleEndian::read_u32(&sector[80..84]),
            partition_entry_size: LittleEndian::read_u32(&sector[84..88]),
            partition_array_crc32: LittleEndian::read_u32(&sector[88..92]),
        })
    }

    /// CRC32 over `header_size` bytes with the CRC field zeroed.
    pub fn compute_crc(sector: &[u8; 512], header_size: u32) -> u32 {
        let mut copy = sector[..header_size as usize].to_vec();
        copy[16..20].fill(0);
        crc32fast::hash(&copy)
    }

    pub fn crc_matches(&self, sector: &[u8; 512]) -> bool {
        Self::compute_crc(sector, self.header_size) == self.header_crc32
    }

    fn array_len(&self) -> Result<u64> {
        if self.partition_entry_size < MIN_ENTRY_SIZE {
            return Err(HfsError::InvalidGpt(format!(
                "partition entry size {} below 128",
                self.partition_entry_size
            )));
        }
        let len = self.num_partition_entries as u64 * self.partition_entry_size as u64;
        if len > MAX_ARRAY_BYTES {
            return Err(HfsError::InvalidGpt(format!(
                "partition entry array of {len} bytes is too large"
            )));
        }
        Ok(len)
    }

    /// Every field except the ones that legitimately differ between the
    /// primary and backup copies.
    fn mirrors(&self, other: &GptHeader) -> bool {
        self.revision == other.revision
            && self.header_size == other.header_size
            && self.my_lba == other.alternate_lba
            && self.alternate_lba == other.my_lba
            && self.first_usable_lba == other.first_usable_lba
            && self.last_usable_lba == other.last_usable_lba
            && self.disk_guid == other.disk_guid
            && self.num_partition_entries == other.num_partition_entries
            && self.partition_entry_size == other.partition_entry_size
            && self.partition_array_crc32 == other.partition_array_crc32
    }
}

/// A single GPT partition entry.
#[derive(Debug, Clone, Serialize)]
pub struct GptPartitionEntry {
    /// Slot in the entry array.
    pub slot: usize,
    pub type_guid: Guid,
    pub unique_guid: Guid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl GptPartitionEntry {
    fn parse(slot: usize, data: &[u8]) -> Self {
        let mut type_guid = [0u8; 16];
        let mut unique_guid = [0u8; 16];
        type_guid.copy_from_slice(&data[0..16]);
        unique_guid.copy_from_slice(&data[16..32]);
        GptPartitionEntry {
            slot,
            type_guid: Guid(type_guid),
            unique_guid: Guid(unique_guid),
            first_lba: LittleEndian::read_u64(&data[32..40]),
            last_lba: LittleEndian::read_u64(&data[40..48]),
            attributes: LittleEndian::read_u64(&data[48..56]),
            // Name is UTF-16LE, up to 72 bytes (36 UTF-16 code units)
            name: utf16le_string(&data[56..128]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.type_guid.is_zero()
    }

    /// Length in bytes, `None` when it does not fit in a `u64`.
    pub fn size_bytes(&self) -> Option<u64> {
        if self.is_empty() || self.last_lba < self.first_lba {
            return Some(0);
        }
        (self.last_lba - self.first_lba)
            .checked_add(1)?
            .checked_mul(SECTOR_SIZE)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_guid.partition_type_name()
    }
}

/// The backup copy read from the alternate LBA.
#[derive(Debug, Clone)]
struct BackupCopy {
    header: GptHeader,
    header_crc_ok: bool,
    array: Vec<u8>,
}

/// Parsed GPT (GUID Partition Table).
#[derive(Debug, Clone, Serialize)]
pub struct Gpt {
    /// Byte offset of LBA 0 in the stream the table was loaded from.
    pub base_offset: u64,
    /// The table was found with its header at byte 0 of the stream: LBA 0
    /// is missing and every LBA maps one sector early.
    pub in_hole: bool,
    /// Stream length the table was loaded against, 0 if unknown.
    pub length: u64,
    pub header: GptHeader,
    pub entries: Vec<GptPartitionEntry>,
    #[serde(skip)]
    primary_array: Vec<u8>,
    #[serde(skip)]
    backup: Option<BackupCopy>,
}

impl Gpt {
    /// True when a header with a valid signature and header CRC sits at LBA 1.
    pub fn detect<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64, _length: u64) -> Result<bool> {
        Self::detect_header_at(reader, offset + GPT_HEADER_LBA * SECTOR_SIZE)
    }

    fn detect_header_at<R: Read + Seek + ?Sized>(reader: &mut R, pos: u64) -> Result<bool> {
        let mut sector = [0u8; 512];
        if !read_for_detection(reader, pos, &mut sector)? {
            return Ok(false);
        }
        Ok(match GptHeader::parse(&sector) {
            Ok(header) => header.crc_matches(&sector),
            Err(_) => false,
        })
    }

    /// Load the table whose LBA 0 is at `offset`.
    pub fn load<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64, length: u64) -> Result<Self> {
        Self::load_inner(reader, offset, length, false)
    }

    /// Probe for a header at byte 0 of `[offset, offset + length)`, the
    /// layout left when the protective MBR sector was cut off.
    pub fn load_in_hole<R: Read + Seek + ?Sized>(
        reader: &mut R,
        offset: u64,
        length: u64,
    ) -> Result<Option<Self>> {
        if !Self::detect_header_at(reader, offset)? {
            return Ok(None);
        }
        Self::load_inner(reader, offset, length, true).map(Some)
    }

    fn lba_offset(base: u64, in_hole: bool, lba: u64) -> Result<u64> {
        let shift = if in_hole { SECTOR_SIZE } else { 0 };
        lba.checked_mul(SECTOR_SIZE)
            .and_then(|b| b.checked_sub(shift))
            .and_then(|b| b.checked_add(base))
            .ok_or_else(|| HfsError::InvalidGpt(format!("LBA {lba} not addressable")))
    }

    fn load_inner<R: Read + Seek + ?Sized>(
        reader: &mut R,
        offset: u64,
        length: u64,
        in_hole: bool,
    ) -> Result<Self> {
        let header_pos = Self::lba_offset(offset, in_hole, GPT_HEADER_LBA)?;
        let mut sector = [0u8; 512];
        crate::io::read_exact_at(reader, header_pos, &mut sector)
            .map_err(|e| HfsError::InvalidGpt(format!("cannot read GPT header: {e}")))?;
        let header = GptHeader::parse(&sector)?;
        let actual = GptHeader::compute_crc(&sector, header.header_size);
        if actual != header.header_crc32 {
            return Err(HfsError::ChecksumMismatch {
                expected: format!("{:#010X}", header.header_crc32),
                actual: format!("{actual:#010X}"),
            });
        }

        let primary_array = Self::read_array(reader, offset, in_hole, &header)?;
        let mut entries = Vec::new();
        for (slot, chunk) in primary_array
            .chunks_exact(header.partition_entry_size as usize)
            .enumerate()
        {
            let entry = GptPartitionEntry::parse(slot, chunk);
            if entry.is_empty() {
                continue;
            }
            if entry.last_lba < entry.first_lba {
                return Err(HfsError::InvalidGpt(format!(
                    "entry {slot} ends (LBA {}) before it starts (LBA {})",
                    entry.last_lba, entry.first_lba
                )));
            }
            entries.push(entry);
        }

        let backup = match Self::read_backup(reader, offset, in_hole, &header) {
            Ok(copy) => Some(copy),
            Err(e) => {
                warn!("GPT backup header at LBA {} unreadable: {e}", header.alternate_lba);
                None
            }
        };
        debug!(
            "GPT at {offset}: {} partitions, backup {}",
            entries.len(),
            if backup.is_some() { "present" } else { "missing" }
        );

        Ok(Self {
            base_offset: offset,
            in_hole,
            length,
            header,
            entries,
            primary_array,
            backup,
        })
    }

    fn read_array<R: Read + Seek + ?Sized>(
        reader: &mut R,
        offset: u64,
        in_hole: bool,
        header: &GptHeader,
    ) -> Result<Vec<u8>> {
        let len = header.array_len()?;
        let pos = Self::lba_offset(offset, in_hole, header.partition_entry_lba)?;
        crate::io::read_vec_at(reader, pos, len as usize)
            .map_err(|e| HfsError::InvalidGpt(format!("cannot read partition entries: {e}")))
    }

    fn read_backup<R: Read + Seek + ?Sized>(
        reader: &mut R,
        offset: u64,
        in_hole: bool,
        primary: &GptHeader,
    ) -> Result<BackupCopy> {
        let pos = Self::lba_offset(offset, in_hole, primary.alternate_lba)?;
        let mut sector = [0u8; 512];
        crate::io::read_exact_at(reader, pos, &mut sector)?;
        let header = GptHeader::parse(&sector)?;
        let header_crc_ok = header.crc_matches(&sector);
        let array = Self::read_array(reader, offset, in_hole, &header)?;
        Ok(BackupCopy {
            header,
            header_crc_ok,
            array,
        })
    }

    /// Last addressable LBA of the stream, when its length is known.
    fn last_lba(&self) -> Option<u64> {
        if self.length == 0 {
            return None;
        }
        let shift = if self.in_hole { SECTOR_SIZE } else { 0 };
        ((self.length + shift) / SECTOR_SIZE).checked_sub(1)
    }

    /// Full consistency check: both headers and both entry arrays pass
    /// their CRCs, the backup sits at the last LBA and mirrors the primary,
    /// and the two arrays are byte-identical.
    pub fn is_valid(&self) -> bool {
        let primary_array_ok =
            crc32fast::hash(&self.primary_array) == self.header.partition_array_crc32;
        let Some(backup) = &self.backup else {
            return false;
        };
        let backup_array_ok =
            crc32fast::hash(&backup.array) == backup.header.partition_array_crc32;
        let at_last_lba = match self.last_lba() {
            Some(last) => self.header.alternate_lba == last,
            None => true,
        };
        primary_array_ok
            && backup.header_crc_ok
            && backup_array_ok
            && at_last_lba
            && self.header.mirrors(&backup.header)
            && self.primary_array == backup.array
    }

    pub fn partitions(&self) -> Vec<Partition> {
        let shift = if self.in_hole { SECTOR_SIZE } else { 0 };
        self.entries
            .iter()
            .filter_map(|e| {
                let start = e
                    .first_lba
                    .checked_mul(SECTOR_SIZE)
                    .and_then(|b| b.checked_add(self.base_offset));
                let (Some(start), Some(length)) = (start, e.size_bytes()) else {
                    warn!(
                        "GPT entry {} (LBA {}..={}) overflows a byte offset, skipped",
                        e.slot, e.first_lba, e.last_lba
                    );
                    return None;
                };
                Some(Partition {
                    index: e.slot,
                    start_offset: start.saturating_sub(shift),
                    length,
                    kind: e.type_guid.kind(),
                    name: e.name.clone(),
                    type_label: e.type_name().to_string(),
                })
            })
            .collect()
    }
}
