pub mod apm;
pub mod ebr;
pub mod gpt;
pub mod mbr;

use log::{debug, warn};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::config::ReaderConfig;
use crate::error::{HfsError, Result};
use apm::Apm;
use ebr::DosExtended;
use gpt::Gpt;
use mbr::Mbr;

/// Partitioning schemes this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PartitionSystemType {
    Mbr,
    Gpt,
    Apm,
    /// EBR chain inside an MBR extended partition. Only meaningful nested.
    DosExtended,
}

impl PartitionSystemType {
    pub const TOP_LEVEL: [PartitionSystemType; 3] = [
        PartitionSystemType::Gpt,
        PartitionSystemType::Apm,
        PartitionSystemType::Mbr,
    ];

    pub fn is_top_level_capable(self) -> bool {
        !matches!(self, PartitionSystemType::DosExtended)
    }

    pub fn short_name(self) -> &'static str {
        match self {
            PartitionSystemType::Mbr => "MBR",
            PartitionSystemType::Gpt => "GPT",
            PartitionSystemType::Apm => "APM",
            PartitionSystemType::DosExtended => "EBR",
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            PartitionSystemType::Mbr => "Master Boot Record",
            PartitionSystemType::Gpt => "GUID Partition Table",
            PartitionSystemType::Apm => "Apple Partition Map",
            PartitionSystemType::DosExtended => "DOS Extended",
        }
    }

    /// Run this scheme's detector at `offset`. Never fails on a mismatch;
    /// only I/O errors other than a short read propagate.
    pub fn detect<R: Read + Seek + ?Sized>(
        self,
        reader: &mut R,
        offset: u64,
        length: u64,
    ) -> Result<bool> {
        match self {
            PartitionSystemType::Mbr => Mbr::detect(reader, offset),
            PartitionSystemType::Gpt => Gpt::detect(reader, offset, length),
            PartitionSystemType::Apm => Apm::detect(reader, offset),
            PartitionSystemType::DosExtended => DosExtended::detect(reader, offset),
        }
    }
}

/// What a partition entry holds, as far as this crate cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartitionKind {
    /// Classic HFS, or HFS+ behind a type code that does not say which.
    HfsContainer,
    HfsPlus,
    Hfsx,
    /// A nested partitioning scheme that can be opened with
    /// [`PartitionSystem::load`] on the entry's byte range.
    PartitionSystem(PartitionSystemType),
    PartitionMap,
    Driver,
    Free,
    Empty,
    Unknown,
}

impl PartitionKind {
    pub fn is_hfs_family(self) -> bool {
        matches!(
            self,
            PartitionKind::HfsContainer | PartitionKind::HfsPlus | PartitionKind::Hfsx
        )
    }
}

/// A partition entry with absolute byte offsets into the stream the
/// scheme was loaded from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partition {
    pub index: usize,
    pub start_offset: u64,
    pub length: u64,
    pub kind: PartitionKind,
    pub name: String,
    /// The scheme's own type label (MBR type name, GPT GUID name, APM type).
    pub type_label: String,
}

impl Partition {
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.length
    }
}

/// Run every top-level detector at `offset` and report the ones that match.
///
/// A GPT disk reports both `Gpt` and `Mbr` (its protective MBR is a valid
/// MBR); [`preferred_system`] picks the most specific one.
pub fn detect_partition_systems<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    length: u64,
) -> Result<Vec<PartitionSystemType>> {
    let mut found = Vec::new();
    for ty in PartitionSystemType::TOP_LEVEL {
        if ty.detect(reader, offset, length)? {
            debug!("detected {} at offset {offset}", ty.short_name());
            found.push(ty);
        }
    }
    Ok(found)
}

/// Most specific scheme out of a detection result: GPT over APM over MBR.
pub fn preferred_system(found: &[PartitionSystemType]) -> Option<PartitionSystemType> {
    PartitionSystemType::TOP_LEVEL
        .into_iter()
        .find(|ty| found.contains(ty))
}

/// A loaded partitioning scheme.
#[derive(Debug, Clone, Serialize)]
pub enum PartitionSystem {
    Mbr(Mbr),
    Gpt(Gpt),
    Apm(Apm),
    DosExtended(DosExtended),
}

impl PartitionSystem {
    /// Load the scheme `ty` covering `[offset, offset + length)`. Fails with
    /// the scheme's own error variant when the structure is inconsistent.
    pub fn load<R: Read + Seek + ?Sized>(
        reader: &mut R,
        ty: PartitionSystemType,
        offset: u64,
        length: u64,
        config: &ReaderConfig,
    ) -> Result<Self> {
        match ty {
            PartitionSystemType::Mbr => Ok(PartitionSystem::Mbr(Mbr::load(reader, offset)?)),
            PartitionSystemType::Gpt => {
                Ok(PartitionSystem::Gpt(Gpt::load(reader, offset, length)?))
            }
            PartitionSystemType::Apm => {
                Ok(PartitionSystem::Apm(Apm::load(reader, offset, config)?))
            }
            PartitionSystemType::DosExtended => Ok(PartitionSystem::DosExtended(
                DosExtended::load(reader, offset, length, config)?,
            )),
        }
    }

    /// Detect with the hole probe as a fallback: a GPT whose header sits at
    /// byte 0 of the stream, one sector early.
    pub fn detect_and_load<R: Read + Seek + ?Sized>(
        reader: &mut R,
        offset: u64,
        length: u64,
        config: &ReaderConfig,
    ) -> Result<Option<Self>> {
        let found = detect_partition_systems(reader, offset, length)?;
        if let Some(ty) = preferred_system(&found) {
            return Self::load(reader, ty, offset, length, config).map(Some);
        }
        if config.probe_gpt_hole {
            if let Some(gpt) = Gpt::load_in_hole(reader, offset, length)? {
                debug!("found GPT header at offset {offset} without protective MBR");
                return Ok(Some(PartitionSystem::Gpt(gpt)));
            }
        }
        Ok(None)
    }

    pub fn system_type(&self) -> PartitionSystemType {
        match self {
            PartitionSystem::Mbr(_) => PartitionSystemType::Mbr,
            PartitionSystem::Gpt(_) => PartitionSystemType::Gpt,
            PartitionSystem::Apm(_) => PartitionSystemType::Apm,
            PartitionSystem::DosExtended(_) => PartitionSystemType::DosExtended,
        }
    }

    pub fn partitions(&self) -> Vec<Partition> {
        match self {
            PartitionSystem::Mbr(mbr) => mbr.partitions(),
            PartitionSystem::Gpt(gpt) => gpt.partitions(),
            PartitionSystem::Apm(apm) => apm.partitions(),
            PartitionSystem::DosExtended(ext) => ext.partitions(),
        }
    }

    /// Partitions with nested schemes opened and flattened in place of
    /// their container entries. A nested scheme that fails to load is
    /// logged and its container entry is kept instead.
    pub fn partitions_recursive<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
        config: &ReaderConfig,
    ) -> Vec<Partition> {
        let mut out = Vec::new();
        self.flatten_into(reader, config, 0, &mut out);
        for (i, p) in out.iter_mut().enumerate() {
            p.index = i;
        }
        out
    }

    fn flatten_into<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
        config: &ReaderConfig,
        depth: usize,
        out: &mut Vec<Partition>,
    ) {
        for part in self.partitions() {
            let nested = match part.kind {
                // A protective 0xEE entry inside a loaded GPT's own MBR is not
                // re-entered; GPT is detected at the top level instead.
                PartitionKind::PartitionSystem(ty)
                    if depth < 4 && ty != PartitionSystemType::Gpt =>
                {
                    match PartitionSystem::load(reader, ty, part.start_offset, part.length, config)
                    {
                        Ok(system) => Some(system),
                        Err(e) => {
                            warn!(
                                "nested {} at offset {} not loaded: {e}",
                                ty.short_name(),
                                part.start_offset
                            );
                            None
                        }
                    }
                }
                _ => None,
            };
            match nested {
                Some(system) => system.flatten_into(reader, config, depth + 1, out),
                None => out.push(part),
            }
        }
    }
}

/// Map a short read during detection to "not detected"; everything else
/// (a failing device) is still an error.
pub(crate) fn read_for_detection<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    buf: &mut [u8],
) -> Result<bool> {
    match crate::io::read_exact_at(reader, offset, buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(HfsError::Io(e)),
    }
}

/// Format a byte count as a human-readable size string.
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_mbr_entry(disk: &mut [u8], slot: usize, ptype: u8, start_lba: u32, sectors: u32) {
        let off = 446 + slot * 16;
        disk[off + 4] = ptype;
        disk[off + 8..off + 12].copy_from_slice(&start_lba.to_le_bytes());
        disk[off + 12..off + 16].copy_from_slice(&sectors.to_le_bytes());
    }

    fn make_mbr_disk(entries: &[(u8, u32, u32)], size: usize) -> Vec<u8> {
        let mut disk = vec![0u8; size];
        for (i, &(ptype, start, sectors)) in entries.iter().enumerate() {
            write_mbr_entry(&mut disk, i, ptype, start, sectors);
        }
        disk[510] = 0x55;
        disk[511] = 0xAA;
        disk
    }

    #[test]
    fn test_detect_mbr_only() {
        let disk = make_mbr_disk(&[(0xAF, 2048, 204800)], 8192);
        let len = disk.len() as u64;
        let mut cursor = Cursor::new(disk);
        let found = detect_partition_systems(&mut cursor, 0, len).unwrap();
        assert_eq!(found, vec![PartitionSystemType::Mbr]);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let disk = make_mbr_disk(&[(0xAF, 2048, 204800)], 8192);
        let len = disk.len() as u64;
        let mut cursor = Cursor::new(disk);
        let first = detect_partition_systems(&mut cursor, 0, len).unwrap();
        let second = detect_partition_systems(&mut cursor, 0, len).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_detect_nothing_on_blank_disk() {
        let mut cursor = Cursor::new(vec![0u8; 4096]);
        assert!(detect_partition_systems(&mut cursor, 0, 4096)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_detect_on_tiny_stream_is_not_an_error() {
        let mut cursor = Cursor::new(vec![0u8; 100]);
        assert!(detect_partition_systems(&mut cursor, 0, 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mbr_hfs_scenario() {
        let disk = make_mbr_disk(&[(0xAF, 2048, 204800)], 4096);
        let mut cursor = Cursor::new(disk);
        let system = PartitionSystem::load(
            &mut cursor,
            PartitionSystemType::Mbr,
            0,
            4096,
            &ReaderConfig::default(),
        )
        .unwrap();
        let parts = system.partitions();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].start_offset, 1_048_576);
        assert_eq!(parts[0].length, 104_857_600);
        assert_eq!(parts[0].kind, PartitionKind::HfsContainer);
        assert!(parts[0].kind.is_hfs_family());
    }

    #[test]
    fn test_recursive_listing_opens_extended() {
        // Primary HFS at LBA 1, extended container at LBA 8 with one logical.
        let mut disk = make_mbr_disk(&[(0xAF, 1, 4), (0x05, 8, 16)], 32 * 512);
        let ebr = 8 * 512;
        disk[ebr + 510] = 0x55;
        disk[ebr + 511] = 0xAA;
        write_mbr_entry(&mut disk[ebr..], 0, 0xAF, 2, 6);

        let mut cursor = Cursor::new(disk);
        let config = ReaderConfig::default();
        let system = PartitionSystem::detect_and_load(&mut cursor, 0, 32 * 512, &config)
            .unwrap()
            .unwrap();
        assert_eq!(system.system_type(), PartitionSystemType::Mbr);

        let flat = system.partitions_recursive(&mut cursor, &config);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].start_offset, 512);
        assert_eq!(flat[1].start_offset, (8 + 2) * 512);
        assert_eq!(flat[1].length, 6 * 512);
        assert_eq!(flat[1].index, 1);
    }

    #[test]
    fn test_recursive_listing_keeps_broken_container() {
        // The extended entry points past the end of the disk.
        let disk = make_mbr_disk(&[(0x0F, 100, 16)], 4 * 512);
        let mut cursor = Cursor::new(disk);
        let config = ReaderConfig::default();
        let system = PartitionSystem::load(
            &mut cursor,
            PartitionSystemType::Mbr,
            0,
            4 * 512,
            &config,
        )
        .unwrap();
        let flat = system.partitions_recursive(&mut cursor, &config);
        assert_eq!(flat.len(), 1);
        assert_eq!(
            flat[0].kind,
            PartitionKind::PartitionSystem(PartitionSystemType::DosExtended)
        );
    }

    #[test]
    fn test_preferred_system() {
        assert_eq!(
            preferred_system(&[PartitionSystemType::Gpt, PartitionSystemType::Mbr]),
            Some(PartitionSystemType::Gpt)
        );
        assert_eq!(preferred_system(&[]), None);
    }

    #[test]
    fn test_top_level_capability() {
        assert!(PartitionSystemType::Apm.is_top_level_capable());
        assert!(!PartitionSystemType::DosExtended.is_top_level_capable());
    }

    #[test]
    fn test_partition_serializes() {
        let p = Partition {
            index: 0,
            start_offset: 512,
            length: 1024,
            kind: PartitionKind::HfsContainer,
            name: "Macintosh HD".into(),
            type_label: "Apple_HFS".into(),
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"HfsContainer\""));
        assert_eq!(p.end_offset(), 1536);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(104_857_600), "100.0 MiB");
    }
}
