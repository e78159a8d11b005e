//! Extent descriptors, fork data and the extents-overflow file.

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::io::{Read, Seek};

use super::btree::{BTreeFile, LeafEntry, TreeFormat};
use crate::error::{HfsError, Result};

pub const HFS_PLUS_EXTENT_SIZE: usize = 8;
pub const HFS_EXTENT_SIZE: usize = 4;
pub const HFS_PLUS_EXTENTS_PER_RECORD: usize = 8;
pub const HFS_EXTENTS_PER_RECORD: usize = 3;
pub const HFS_PLUS_FORK_DATA_SIZE: usize = 80;

/// A run of contiguous allocation blocks. Classic HFS 16-bit values widen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExtentDescriptor {
    pub start_block: u32,
    pub block_count: u32,
}

impl ExtentDescriptor {
    pub fn new(start_block: u32, block_count: u32) -> Self {
        ExtentDescriptor {
            start_block,
            block_count,
        }
    }

    /// HFS+ descriptor: start_block (u32) + block_count (u32).
    pub fn parse_hfsplus(data: &[u8]) -> Self {
        ExtentDescriptor {
            start_block: BigEndian::read_u32(&data[0..4]),
            block_count: BigEndian::read_u32(&data[4..8]),
        }
    }

    /// HFS descriptor: start_block (u16) + block_count (u16).
    pub fn parse_hfs(data: &[u8]) -> Self {
        ExtentDescriptor {
            start_block: BigEndian::read_u16(&data[0..2]) as u32,
            block_count: BigEndian::read_u16(&data[2..4]) as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_block == 0 && self.block_count == 0
    }

    pub fn end_block(&self) -> u64 {
        self.start_block as u64 + self.block_count as u64
    }
}

/// Extents up to the first (0,0) descriptor.
fn trimmed(extents: &[ExtentDescriptor]) -> Vec<ExtentDescriptor> {
    extents.iter().take_while(|e| !e.is_empty()).copied().collect()
}

fn block_sum(extents: &[ExtentDescriptor]) -> u64 {
    extents.iter().map(|e| e.block_count as u64).sum()
}

/// Size and inline extents of one fork.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForkData {
    pub logical_size: u64,
    pub clump_size: u32,
    pub total_blocks: u32,
    pub extents: Vec<ExtentDescriptor>,
}

impl ForkData {
    /// HFS+ fork data (80 bytes).
    pub fn parse_hfsplus(data: &[u8]) -> Self {
        let extents = (0..HFS_PLUS_EXTENTS_PER_RECORD)
            .map(|i| ExtentDescriptor::parse_hfsplus(&data[16 + i * 8..24 + i * 8]))
            .collect();
        ForkData {
            logical_size: BigEndian::read_u64(&data[0..8]),
            clump_size: BigEndian::read_u32(&data[8..12]),
            total_blocks: BigEndian::read_u32(&data[12..16]),
            extents,
        }
    }

    /// Classic HFS forks carry only a size and a 12-byte extent record.
    pub fn from_hfs(logical_size: u64, clump_size: u32, extent_record: &[u8]) -> Self {
        let extents = parse_hfs_extent_record(extent_record);
        ForkData {
            logical_size,
            clump_size,
            total_blocks: block_sum(&extents) as u32,
            extents,
        }
    }

    pub fn trimmed_extents(&self) -> Vec<ExtentDescriptor> {
        trimmed(&self.extents)
    }

    pub fn inline_block_count(&self) -> u64 {
        block_sum(&self.trimmed_extents())
    }

    pub fn is_empty(&self) -> bool {
        self.logical_size == 0
    }
}

pub fn parse_hfs_extent_record(data: &[u8]) -> Vec<ExtentDescriptor> {
    (0..HFS_EXTENTS_PER_RECORD)
        .map(|i| ExtentDescriptor::parse_hfs(&data[i * 4..i * 4 + 4]))
        .collect()
}

pub fn parse_hfsplus_extent_record(data: &[u8]) -> Vec<ExtentDescriptor> {
    (0..HFS_PLUS_EXTENTS_PER_RECORD)
        .map(|i| ExtentDescriptor::parse_hfsplus(&data[i * 8..i * 8 + 8]))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ForkType {
    Data,
    Resource,
}

impl ForkType {
    pub fn raw(self) -> u8 {
        match self {
            ForkType::Data => 0x00,
            ForkType::Resource => 0xFF,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(ForkType::Data),
            0xFF => Some(ForkType::Resource),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ForkType::Data => "data",
            ForkType::Resource => "resource",
        }
    }
}

/// Extents-overflow key, ordered by fork type, file ID, start block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExtentKey {
    pub fork_type: ForkType,
    pub file_id: u32,
    pub start_block: u32,
}

impl ExtentKey {
    pub fn new(fork_type: ForkType, file_id: u32, start_block: u32) -> Self {
        ExtentKey {
            fork_type,
            file_id,
            start_block,
        }
    }

    /// Classic HFS keys hold a 16-bit start block.
    pub fn check_hfs_range(&self) -> Result<()> {
        if self.start_block > 0xFFFF {
            return Err(HfsError::OutOfRange(format!(
                "start block {} does not fit an HFS extent key",
                self.start_block
            )));
        }
        Ok(())
    }
}

impl Ord for ExtentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fork_type
            .raw()
            .cmp(&other.fork_type.raw())
            .then(self.file_id.cmp(&other.file_id))
            .then(self.start_block.cmp(&other.start_block))
    }
}

impl PartialOrd for ExtentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Source of overflow extent records.
pub trait OverflowLookup {
    /// The overflow record stored under exactly `key`, if present.
    fn overflow_extents(&mut self, key: &ExtentKey) -> Result<Option<Vec<ExtentDescriptor>>>;
}

/// All extents of a fork covering its logical size.
///
/// Inline extents that already cover the size are returned without touching
/// `lookup`. Otherwise overflow records are fetched one at a time, keyed by
/// the number of blocks found so far, until the size is covered.
pub fn resolve_extents<L: OverflowLookup + ?Sized>(
    lookup: &mut L,
    fork: &ForkData,
    file_id: u32,
    fork_type: ForkType,
    block_size: u32,
) -> Result<Vec<ExtentDescriptor>> {
    if block_size == 0 {
        return Err(HfsError::InvalidArgument("block size of zero".into()));
    }
    let needed = fork.logical_size.div_ceil(block_size as u64);
    let mut extents = fork.trimmed_extents();
    let mut have = block_sum(&extents);
    if have >= needed {
        return Ok(extents);
    }

    while have < needed {
        let start = u32::try_from(have).map_err(|_| {
            HfsError::OutOfRange(format!("fork of file {file_id} spans {have} blocks"))
        })?;
        let key = ExtentKey::new(fork_type, file_id, start);
        debug!("overflow lookup for {key:?}");
        let record = lookup.overflow_extents(&key)?.ok_or(HfsError::MissingExtent {
            file_id,
            fork: fork_type.name(),
            start_block: start,
        })?;
        let record = trimmed(&record);
        let added = block_sum(&record);
        if added == 0 {
            return Err(HfsError::MissingExtent {
                file_id,
                fork: fork_type.name(),
                start_block: start,
            });
        }
        have += added;
        extents.extend(record);
    }
    Ok(extents)
}

/// Key and record layout of the extents-overflow B-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentsFormat {
    Hfs,
    HfsPlus,
}

impl TreeFormat for ExtentsFormat {
    type Key = ExtentKey;
    type LeafRecord = Vec<ExtentDescriptor>;

    fn tree_name(&self) -> &'static str {
        "extents"
    }

    fn key_length_size(&self) -> usize {
        match self {
            ExtentsFormat::Hfs => 1,
            ExtentsFormat::HfsPlus => 2,
        }
    }

    fn parse_key(&self, record: &[u8]) -> Result<(ExtentKey, usize)> {
        let (fork_raw, file_id, start_block, data_offset) = match self {
            // keyLength(1) forkType(1) fileID(4) startBlock(2)
            ExtentsFormat::Hfs => {
                if record.len() < 8 {
                    return Err(HfsError::corrupt("extents", 0, "HFS extent key truncated"));
                }
                let key_len = record[0] as usize;
                (
                    record[1],
                    BigEndian::read_u32(&record[2..6]),
                    BigEndian::read_u16(&record[6..8]) as u32,
                    (1 + key_len + 1) & !1,
                )
            }
            // keyLength(2) forkType(1) pad(1) fileID(4) startBlock(4)
            ExtentsFormat::HfsPlus => {
                if record.len() < 12 {
                    return Err(HfsError::corrupt("extents", 0, "HFS+ extent key truncated"));
                }
                let key_len = BigEndian::read_u16(&record[0..2]) as usize;
                (
                    record[2],
                    BigEndian::read_u32(&record[4..8]),
                    BigEndian::read_u32(&record[8..12]),
                    2 + key_len,
                )
            }
        };
        let fork_type = ForkType::from_raw(fork_raw).ok_or_else(|| {
            HfsError::corrupt("extents", 0, format!("unknown fork type 0x{fork_raw:02X}"))
        })?;
        Ok((
            ExtentKey {
                fork_type,
                file_id,
                start_block,
            },
            data_offset,
        ))
    }

    fn compare(&self, a: &ExtentKey, b: &ExtentKey) -> Ordering {
        a.cmp(b)
    }

    fn parse_leaf(&self, _key: &ExtentKey, data: &[u8]) -> Result<Vec<ExtentDescriptor>> {
        match self {
            ExtentsFormat::Hfs => {
                if data.len() < HFS_EXTENTS_PER_RECORD * HFS_EXTENT_SIZE {
                    return Err(HfsError::corrupt("extents", 0, "HFS extent record truncated"));
                }
                Ok(parse_hfs_extent_record(data))
            }
            ExtentsFormat::HfsPlus => {
                if data.len() < HFS_PLUS_EXTENTS_PER_RECORD * HFS_PLUS_EXTENT_SIZE {
                    return Err(HfsError::corrupt("extents", 0, "HFS+ extent record truncated"));
                }
                Ok(parse_hfsplus_extent_record(data))
            }
        }
    }
}

/// The extents-overflow file.
pub struct ExtentsOverflowFile<R> {
    tree: BTreeFile<R, ExtentsFormat>,
}

impl<R: Read + Seek> ExtentsOverflowFile<R> {
    pub fn new(stream: R, format: ExtentsFormat) -> Self {
        ExtentsOverflowFile {
            tree: BTreeFile::new(stream, format),
        }
    }

    pub fn tree(&mut self) -> &mut BTreeFile<R, ExtentsFormat> {
        &mut self.tree
    }

    /// Every overflow record of `file_id`, both forks, in key order.
    pub fn records_for(
        &mut self,
        file_id: u32,
    ) -> Result<Vec<LeafEntry<ExtentKey, Vec<ExtentDescriptor>>>> {
        let mut records = Vec::new();
        for fork_type in [ForkType::Data, ForkType::Resource] {
            let min = ExtentKey::new(fork_type, file_id, 0);
            let max = match file_id.checked_add(1) {
                Some(next) => ExtentKey::new(fork_type, next, 0),
                None => ExtentKey::new(fork_type, file_id, u32::MAX),
            };
            records.extend(self.tree.find_le_keys(&min, &max, true)?);
        }
        Ok(records)
    }
}

impl<R: Read + Seek> OverflowLookup for ExtentsOverflowFile<R> {
    fn overflow_extents(&mut self, key: &ExtentKey) -> Result<Option<Vec<ExtentDescriptor>>> {
        if *self.tree.format() == ExtentsFormat::Hfs {
            key.check_hfs_range()?;
        }
        self.tree.get_record(key)
    }
}

#[cfg(test)]
mod tests {
    use super::super::btree::test_support::{build_tree, TreeLayout};
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    /// Records every key it is asked for.
    #[derive(Default)]
    struct CountingLookup {
        records: HashMap<ExtentKey, Vec<ExtentDescriptor>>,
        asked: Vec<ExtentKey>,
    }

    impl OverflowLookup for CountingLookup {
        fn overflow_extents(&mut self, key: &ExtentKey) -> Result<Option<Vec<ExtentDescriptor>>> {
            self.asked.push(*key);
            Ok(self.records.get(key).cloned())
        }
    }

    fn fork(logical_size: u64, extents: &[(u32, u32)]) -> ForkData {
        let mut ext: Vec<_> = extents
            .iter()
            .map(|&(s, c)| ExtentDescriptor::new(s, c))
            .collect();
        ext.resize(8, ExtentDescriptor::default());
        ForkData {
            logical_size,
            clump_size: 0,
            total_blocks: block_sum(&ext) as u32,
            extents: ext,
        }
    }

    #[test]
    fn test_inline_extents_need_no_lookup() {
        let mut lookup = CountingLookup::default();
        let f = fork(50 * 4096, &[(10, 50)]);
        let extents = resolve_extents(&mut lookup, &f, 4, ForkType::Data, 4096).unwrap();
        assert_eq!(extents, vec![ExtentDescriptor::new(10, 50)]);
        assert!(lookup.asked.is_empty());
    }

    #[test]
    fn test_one_block_short_needs_exactly_one_lookup() {
        let mut lookup = CountingLookup::default();
        let key = ExtentKey::new(ForkType::Data, 20, 8);
        lookup
            .records
            .insert(key, vec![ExtentDescriptor::new(500, 1)]);
        let inline: Vec<_> = (0..8).map(|i| (100 + i * 10, 1)).collect();
        let f = fork(9 * 512, &inline);
        let extents = resolve_extents(&mut lookup, &f, 20, ForkType::Data, 512).unwrap();
        assert_eq!(lookup.asked, vec![key]);
        assert_eq!(extents.len(), 9);
        assert_eq!(block_sum(&extents), 9);
    }

    #[test]
    fn test_partial_last_block_counts_as_needed() {
        let mut lookup = CountingLookup::default();
        let f = fork(4 * 512 + 1, &[(1, 4)]);
        let err = resolve_extents(&mut lookup, &f, 30, ForkType::Resource, 512).unwrap_err();
        assert!(matches!(
            err,
            HfsError::MissingExtent {
                file_id: 30,
                start_block: 4,
                fork: "resource"
            }
        ));
        assert_eq!(lookup.asked.len(), 1);
    }

    #[test]
    fn test_chained_overflow_records() {
        let mut lookup = CountingLookup::default();
        lookup.records.insert(
            ExtentKey::new(ForkType::Data, 7, 3),
            vec![ExtentDescriptor::new(40, 2), ExtentDescriptor::default()],
        );
        lookup.records.insert(
            ExtentKey::new(ForkType::Data, 7, 5),
            vec![ExtentDescriptor::new(90, 5)],
        );
        let f = fork(10 * 1024, &[(1, 3)]);
        let extents = resolve_extents(&mut lookup, &f, 7, ForkType::Data, 1024).unwrap();
        assert_eq!(
            extents,
            vec![
                ExtentDescriptor::new(1, 3),
                ExtentDescriptor::new(40, 2),
                ExtentDescriptor::new(90, 5)
            ]
        );
        assert_eq!(lookup.asked.len(), 2);
    }

    #[test]
    fn test_empty_fork() {
        let mut lookup = CountingLookup::default();
        let f = fork(0, &[]);
        assert!(resolve_extents(&mut lookup, &f, 9, ForkType::Data, 4096)
            .unwrap()
            .is_empty());
        assert!(lookup.asked.is_empty());
    }

    #[test]
    fn test_hfs_key_range() {
        assert!(ExtentKey::new(ForkType::Data, 1, 0xFFFF).check_hfs_range().is_ok());
        assert!(matches!(
            ExtentKey::new(ForkType::Data, 1, 0x10000).check_hfs_range(),
            Err(HfsError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_key_order() {
        let a = ExtentKey::new(ForkType::Data, 99, 1000);
        let b = ExtentKey::new(ForkType::Resource, 1, 0);
        let c = ExtentKey::new(ForkType::Data, 100, 0);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    fn hfsplus_extent_record(key: ExtentKey, extents: &[(u32, u32)]) -> (Vec<u8>, Vec<u8>) {
        let mut k = vec![0u8; 12];
        BigEndian::write_u16(&mut k[0..2], 10);
        k[2] = key.fork_type.raw();
        BigEndian::write_u32(&mut k[4..8], key.file_id);
        BigEndian::write_u32(&mut k[8..12], key.start_block);
        let mut d = vec![0u8; 64];
        for (i, &(s, c)) in extents.iter().enumerate() {
            BigEndian::write_u32(&mut d[i * 8..i * 8 + 4], s);
            BigEndian::write_u32(&mut d[i * 8 + 4..i * 8 + 8], c);
        }
        (k, d)
    }

    #[test]
    fn test_overflow_file_lookup_and_listing() {
        let mut keys = vec![
            ExtentKey::new(ForkType::Data, 20, 8),
            ExtentKey::new(ForkType::Data, 20, 16),
            ExtentKey::new(ForkType::Data, 21, 8),
            ExtentKey::new(ForkType::Resource, 20, 8),
        ];
        keys.sort();
        let records: Vec<_> = keys
            .iter()
            .map(|k| hfsplus_extent_record(*k, &[(k.start_block * 100, 8)]))
            .collect();
        let mut layout = TreeLayout::hfs_plus(512, 10, 2);
        layout.variable_index_keys = false;
        let image = build_tree(&layout, &records);
        let mut file = ExtentsOverflowFile::new(Cursor::new(image), ExtentsFormat::HfsPlus);

        let hit = file
            .overflow_extents(&ExtentKey::new(ForkType::Data, 20, 16))
            .unwrap()
            .unwrap();
        assert_eq!(hit[0], ExtentDescriptor::new(1600, 8));
        assert!(file
            .overflow_extents(&ExtentKey::new(ForkType::Data, 20, 9))
            .unwrap()
            .is_none());

        let listed = file.records_for(20).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[2].key.fork_type, ForkType::Resource);
    }

    #[test]
    fn test_classic_fork_from_extent_record() {
        let mut rec = [0u8; 12];
        BigEndian::write_u16(&mut rec[0..2], 5);
        BigEndian::write_u16(&mut rec[2..4], 3);
        BigEndian::write_u16(&mut rec[4..6], 20);
        BigEndian::write_u16(&mut rec[6..8], 1);
        let f = ForkData::from_hfs(2048, 0, &rec);
        assert_eq!(
            f.trimmed_extents(),
            vec![ExtentDescriptor::new(5, 3), ExtentDescriptor::new(20, 1)]
        );
        assert_eq!(f.total_blocks, 4);
    }
}
