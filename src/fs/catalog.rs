//! Catalog file: keys, records and namespace queries.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Seek};

use super::btree::{BTreeFile, HeaderRecord, LeafEntry, TreeFormat, KEY_COMPARE_BINARY};
use super::extents::{ForkData, ForkType};
use super::hfs_timestamp;
use super::mac_roman::{compare_names, mac_roman_to_utf8, utf8_to_mac_roman};
use super::unicode::{binary_compare, fast_unicode_compare};
use crate::error::{HfsError, Result};
use crate::io::decode::{fixed, fourcc, pascal_bytes, utf16be_units};

/// Catalog node ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CatalogNodeId(pub u32);

impl CatalogNodeId {
    pub const ROOT_PARENT: CatalogNodeId = CatalogNodeId(1);
    pub const ROOT_FOLDER: CatalogNodeId = CatalogNodeId(2);
    pub const EXTENTS_FILE: CatalogNodeId = CatalogNodeId(3);
    pub const CATALOG_FILE: CatalogNodeId = CatalogNodeId(4);
    pub const BAD_BLOCKS_FILE: CatalogNodeId = CatalogNodeId(5);
    pub const ALLOCATION_FILE: CatalogNodeId = CatalogNodeId(6);
    pub const STARTUP_FILE: CatalogNodeId = CatalogNodeId(7);
    pub const ATTRIBUTES_FILE: CatalogNodeId = CatalogNodeId(8);
    pub const REPAIR_CATALOG: CatalogNodeId = CatalogNodeId(14);
    pub const BOGUS_EXTENT: CatalogNodeId = CatalogNodeId(15);
    pub const FIRST_USER: CatalogNodeId = CatalogNodeId(16);

    pub fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

impl fmt::Display for CatalogNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A catalog node name in its on-disk encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum CatalogName {
    /// HFS+ / HFSX: UTF-16 code units.
    Unicode(Vec<u16>),
    /// Classic HFS: MacRoman bytes.
    MacRoman(Vec<u8>),
}

impl CatalogName {
    pub fn is_empty(&self) -> bool {
        match self {
            CatalogName::Unicode(u) => u.is_empty(),
            CatalogName::MacRoman(b) => b.is_empty(),
        }
    }

    pub fn to_string_lossy(&self) -> String {
        match self {
            CatalogName::Unicode(u) => String::from_utf16_lossy(u),
            CatalogName::MacRoman(b) => mac_roman_to_utf8(b),
        }
    }
}

impl fmt::Display for CatalogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CatalogKey {
    pub parent_id: CatalogNodeId,
    pub name: CatalogName,
}

/// BSD ownership and mode (HFS+ only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BsdPermissions {
    pub owner_id: u32,
    pub group_id: u32,
    pub admin_flags: u8,
    pub owner_flags: u8,
    pub file_mode: u16,
    pub special: u32,
}

impl BsdPermissions {
    fn parse(data: &[u8]) -> Self {
        BsdPermissions {
            owner_id: BigEndian::read_u32(&data[0..4]),
            group_id: BigEndian::read_u32(&data[4..8]),
            admin_flags: data[8],
            owner_flags: data[9],
            file_mode: BigEndian::read_u16(&data[10..12]),
            special: BigEndian::read_u32(&data[12..16]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogFolder {
    pub folder_id: CatalogNodeId,
    pub flags: u16,
    pub valence: u32,
    pub create_date: u32,
    pub modify_date: u32,
    pub backup_date: u32,
    pub finder_info: [u8; 16],
    pub permissions: Option<BsdPermissions>,
}

impl CatalogFolder {
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        hfs_timestamp(self.modify_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogFileRecord {
    pub file_id: CatalogNodeId,
    pub flags: u16,
    pub create_date: u32,
    pub modify_date: u32,
    pub backup_date: u32,
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub finder_flags: u16,
    pub data_fork: ForkData,
    pub resource_fork: ForkData,
    pub permissions: Option<BsdPermissions>,
}

impl CatalogFileRecord {
    pub fn fork(&self, fork_type: ForkType) -> &ForkData {
        match fork_type {
            ForkType::Data => &self.data_fork,
            ForkType::Resource => &self.resource_fork,
        }
    }

    pub fn type_code(&self) -> String {
        fourcc(&self.file_type)
    }

    pub fn creator_code(&self) -> String {
        fourcc(&self.creator)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        hfs_timestamp(self.modify_date)
    }
}

/// Thread record: maps a CNID back to its parent and name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogThread {
    pub parent_id: CatalogNodeId,
    pub name: CatalogName,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CatalogRecord {
    Folder(CatalogFolder),
    File(CatalogFileRecord),
    FolderThread(CatalogThread),
    FileThread(CatalogThread),
}

impl CatalogRecord {
    /// CNID of a folder or file record.
    pub fn cnid(&self) -> Option<CatalogNodeId> {
        match self {
            CatalogRecord::Folder(f) => Some(f.folder_id),
            CatalogRecord::File(f) => Some(f.file_id),
            _ => None,
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(
            self,
            CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_)
        )
    }

    pub fn as_folder(&self) -> Option<&CatalogFolder> {
        match self {
            CatalogRecord::Folder(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&CatalogFileRecord> {
        match self {
            CatalogRecord::File(f) => Some(f),
            _ => None,
        }
    }
}

pub type CatalogLeafRecord = LeafEntry<CatalogKey, CatalogRecord>;

// HFS+ record types (16-bit)
const HFSPLUS_FOLDER: u16 = 0x0001;
const HFSPLUS_FILE: u16 = 0x0002;
const HFSPLUS_FOLDER_THREAD: u16 = 0x0003;
const HFSPLUS_FILE_THREAD: u16 = 0x0004;
// Classic record types (8-bit)
const HFS_DIR: u8 = 1;
const HFS_FILE: u8 = 2;
const HFS_DIR_THREAD: u8 = 3;
const HFS_FILE_THREAD: u8 = 4;

/// Catalog key order and record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CatalogFormat {
    /// Classic HFS: MacRoman names, case-insensitive.
    Hfs,
    /// HFS+, or HFSX with case-folding keys.
    HfsPlus,
    /// HFSX with binary (case-sensitive) keys.
    HfsxBinary,
}

impl CatalogFormat {
    /// Pick the format from the volume kind and the catalog's header record.
    pub fn for_volume(hfs_plus: bool, header: &HeaderRecord) -> Self {
        if !hfs_plus {
            CatalogFormat::Hfs
        } else if header.key_compare_type == KEY_COMPARE_BINARY {
            CatalogFormat::HfsxBinary
        } else {
            CatalogFormat::HfsPlus
        }
    }

    pub fn is_hfs_plus(self) -> bool {
        !matches!(self, CatalogFormat::Hfs)
    }

    pub fn empty_name(self) -> CatalogName {
        match self {
            CatalogFormat::Hfs => CatalogName::MacRoman(Vec::new()),
            _ => CatalogName::Unicode(Vec::new()),
        }
    }

    /// Encode a display name. `None` if it has no representation (a
    /// character outside MacRoman, or over 31 bytes / 255 units).
    pub fn encode_name(self, name: &str) -> Option<CatalogName> {
        match self {
            CatalogFormat::Hfs => {
                let bytes = utf8_to_mac_roman(name)?;
                (bytes.len() <= 31).then_some(CatalogName::MacRoman(bytes))
            }
            _ => {
                let units: Vec<u16> = name.encode_utf16().collect();
                (units.len() <= 255).then_some(CatalogName::Unicode(units))
            }
        }
    }

    pub fn key(self, parent_id: CatalogNodeId, name: CatalogName) -> CatalogKey {
        CatalogKey { parent_id, name }
    }

    fn thread_key(self, cnid: CatalogNodeId) -> CatalogKey {
        CatalogKey {
            parent_id: cnid,
            name: self.empty_name(),
        }
    }

    fn compare_names(self, a: &CatalogName, b: &CatalogName) -> Ordering {
        match (a, b) {
            (CatalogName::Unicode(x), CatalogName::Unicode(y)) => match self {
                CatalogFormat::HfsxBinary => binary_compare(x, y),
                _ => fast_unicode_compare(x, y),
            },
            (CatalogName::MacRoman(x), CatalogName::MacRoman(y)) => compare_names(x, y),
            (CatalogName::MacRoman(_), CatalogName::Unicode(_)) => Ordering::Less,
            (CatalogName::Unicode(_), CatalogName::MacRoman(_)) => Ordering::Greater,
        }
    }

    fn parse_hfsplus_record(self, data: &[u8]) -> Result<CatalogRecord> {
        let truncated = |what: &str| HfsError::corrupt("catalog", 0, format!("{what} record truncated"));
        if data.len() < 2 {
            return Err(truncated("catalog"));
        }
        match BigEndian::read_u16(&data[0..2]) {
            HFSPLUS_FOLDER => {
                if data.len() < 88 {
                    return Err(truncated("folder"));
                }
                Ok(CatalogRecord::Folder(CatalogFolder {
                    flags: BigEndian::read_u16(&data[2..4]),
                    valence: BigEndian::read_u32(&data[4..8]),
                    folder_id: CatalogNodeId(BigEndian::read_u32(&data[8..12])),
                    create_date: BigEndian::read_u32(&data[12..16]),
                    modify_date: BigEndian::read_u32(&data[16..20]),
                    backup_date: BigEndian::read_u32(&data[28..32]),
                    permissions: Some(BsdPermissions::parse(&data[32..48])),
                    finder_info: fixed::<16>(data, 48),
                }))
            }
            HFSPLUS_FILE => {
                if data.len() < 248 {
                    return Err(truncated("file"));
                }
                Ok(CatalogRecord::File(CatalogFileRecord {
                    flags: BigEndian::read_u16(&data[2..4]),
                    file_id: CatalogNodeId(BigEndian::read_u32(&data[8..12])),
                    create_date: BigEndian::read_u32(&data[12..16]),
                    modify_date: BigEndian::read_u32(&data[16..20]),
                    backup_date: BigEndian::read_u32(&data[28..32]),
                    permissions: Some(BsdPermissions::parse(&data[32..48])),
                    // FileInfo at 48: fdType(4) fdCreator(4) fdFlags(2)
                    file_type: fixed::<4>(data, 48),
                    creator: fixed::<4>(data, 52),
                    finder_flags: BigEndian::read_u16(&data[56..58]),
                    data_fork: ForkData::parse_hfsplus(&data[88..168]),
                    resource_fork: ForkData::parse_hfsplus(&data[168..248]),
                }))
            }
            kind @ (HFSPLUS_FOLDER_THREAD | HFSPLUS_FILE_THREAD) => {
                if data.len() < 10 {
                    return Err(truncated("thread"));
                }
                let name_len = BigEndian::read_u16(&data[8..10]) as usize;
                if name_len > 255 || data.len() < 10 + name_len * 2 {
                    return Err(truncated("thread"));
                }
                let thread = CatalogThread {
                    parent_id: CatalogNodeId(BigEndian::read_u32(&data[4..8])),
                    name: CatalogName::Unicode(utf16be_units(&data[10..10 + name_len * 2])),
                };
                Ok(if kind == HFSPLUS_FOLDER_THREAD {
                    CatalogRecord::FolderThread(thread)
                } else {
                    CatalogRecord::FileThread(thread)
                })
            }
            other => Err(HfsError::corrupt(
                "catalog",
                0,
                format!("unknown record type 0x{other:04X}"),
            )),
        }
    }

    fn parse_hfs_record(self, data: &[u8]) -> Result<CatalogRecord> {
        let truncated = |what: &str| HfsError::corrupt("catalog", 0, format!("{what} record truncated"));
        if data.len() < 2 {
            return Err(truncated("catalog"));
        }
        match data[0] {
            HFS_DIR => {
                if data.len() < 70 {
                    return Err(truncated("directory"));
                }
                Ok(CatalogRecord::Folder(CatalogFolder {
                    flags: BigEndian::read_u16(&data[2..4]),
                    valence: BigEndian::read_u16(&data[4..6]) as u32,
                    folder_id: CatalogNodeId(BigEndian::read_u32(&data[6..10])),
                    create_date: BigEndian::read_u32(&data[10..14]),
                    modify_date: BigEndian::read_u32(&data[14..18]),
                    backup_date: BigEndian::read_u32(&data[18..22]),
                    finder_info: fixed::<16>(data, 22),
                    permissions: None,
                }))
            }
            HFS_FILE => {
                if data.len() < 102 {
                    return Err(truncated("file"));
                }
                let clump = BigEndian::read_u16(&data[72..74]) as u32;
                Ok(CatalogRecord::File(CatalogFileRecord {
                    flags: data[2] as u16,
                    // FInfo at 4: fdType(4) fdCreator(4) fdFlags(2)
                    file_type: fixed::<4>(data, 4),
                    creator: fixed::<4>(data, 8),
                    finder_flags: BigEndian::read_u16(&data[12..14]),
                    file_id: CatalogNodeId(BigEndian::read_u32(&data[20..24])),
                    create_date: BigEndian::read_u32(&data[44..48]),
                    modify_date: BigEndian::read_u32(&data[48..52]),
                    backup_date: BigEndian::read_u32(&data[52..56]),
                    data_fork: ForkData::from_hfs(
                        BigEndian::read_u32(&data[26..30]) as u64,
                        clump,
                        &data[74..86],
                    ),
                    resource_fork: ForkData::from_hfs(
                        BigEndian::read_u32(&data[36..40]) as u64,
                        clump,
                        &data[86..98],
                    ),
                    permissions: None,
                }))
            }
            kind @ (HFS_DIR_THREAD | HFS_FILE_THREAD) => {
                if data.len() < 46 {
                    return Err(truncated("thread"));
                }
                let thread = CatalogThread {
                    parent_id: CatalogNodeId(BigEndian::read_u32(&data[10..14])),
                    name: CatalogName::MacRoman(pascal_bytes(&data[14..46], 31).to_vec()),
                };
                Ok(if kind == HFS_DIR_THREAD {
                    CatalogRecord::FolderThread(thread)
                } else {
                    CatalogRecord::FileThread(thread)
                })
            }
            other => Err(HfsError::corrupt(
                "catalog",
                0,
                format!("unknown record type 0x{other:02X}"),
            )),
        }
    }
}

impl TreeFormat for CatalogFormat {
    type Key = CatalogKey;
    type LeafRecord = CatalogRecord;

    fn tree_name(&self) -> &'static str {
        "catalog"
    }

    fn key_length_size(&self) -> usize {
        match self {
            CatalogFormat::Hfs => 1,
            _ => 2,
        }
    }

    fn parse_key(&self, record: &[u8]) -> Result<(CatalogKey, usize)> {
        let bad = |reason: String| HfsError::corrupt("catalog", 0, reason);
        match self {
            // keyLength(1) reserved(1) parentID(4) nameLength(1) name
            CatalogFormat::Hfs => {
                if record.len() < 7 {
                    return Err(bad("key truncated".into()));
                }
                let key_len = record[0] as usize;
                let name_len = record[6] as usize;
                if 7 + name_len > 1 + key_len || 1 + key_len > record.len() {
                    return Err(bad(format!("key length {key_len} inconsistent")));
                }
                Ok((
                    CatalogKey {
                        parent_id: CatalogNodeId(BigEndian::read_u32(&record[2..6])),
                        name: CatalogName::MacRoman(record[7..7 + name_len].to_vec()),
                    },
                    (1 + key_len + 1) & !1,
                ))
            }
            // keyLength(2) parentID(4) nameLength(2) name(UTF-16BE)
            _ => {
                if record.len() < 8 {
                    return Err(bad("key truncated".into()));
                }
                let key_len = BigEndian::read_u16(&record[0..2]) as usize;
                let name_len = BigEndian::read_u16(&record[6..8]) as usize;
                if 8 + name_len * 2 > 2 + key_len || 2 + key_len > record.len() {
                    return Err(bad(format!("key length {key_len} inconsistent")));
                }
                Ok((
                    CatalogKey {
                        parent_id: CatalogNodeId(BigEndian::read_u32(&record[2..6])),
                        name: CatalogName::Unicode(utf16be_units(&record[8..8 + name_len * 2])),
                    },
                    (2 + key_len + 1) & !1,
                ))
            }
        }
    }

    fn compare(&self, a: &CatalogKey, b: &CatalogKey) -> Ordering {
        a.parent_id
            .cmp(&b.parent_id)
            .then_with(|| self.compare_names(&a.name, &b.name))
    }

    fn parse_leaf(&self, _key: &CatalogKey, data: &[u8]) -> Result<CatalogRecord> {
        match self {
            CatalogFormat::Hfs => self.parse_hfs_record(data),
            _ => self.parse_hfsplus_record(data),
        }
    }
}

/// Namespace queries over the catalog B-tree.
pub struct CatalogFile<R> {
    tree: BTreeFile<R, CatalogFormat>,
}

impl<R: Read + Seek> CatalogFile<R> {
    pub fn new(stream: R, format: CatalogFormat) -> Self {
        CatalogFile {
            tree: BTreeFile::new(stream, format),
        }
    }

    pub fn format(&self) -> CatalogFormat {
        *self.tree.format()
    }

    pub fn tree(&mut self) -> &mut BTreeFile<R, CatalogFormat> {
        &mut self.tree
    }

    /// The root folder: the single record whose parent is the root parent.
    pub fn root_folder(&mut self) -> Result<CatalogLeafRecord> {
        let format = self.format();
        let lower = format.thread_key(CatalogNodeId::ROOT_PARENT);
        let found = self
            .tree
            .find_parent(&lower, |k| k.parent_id.cmp(&CatalogNodeId::ROOT_PARENT))?;
        match found {
            Some(entry) if matches!(entry.value, CatalogRecord::Folder(_)) => Ok(entry),
            Some(_) => Err(HfsError::corrupt(
                "catalog",
                0,
                "record under the root parent is not a folder",
            )),
            None => Err(HfsError::corrupt("catalog", 0, "no root folder record")),
        }
    }

    /// Folder and file records directly inside `folder_id`, in key order.
    pub fn list_records(&mut self, folder_id: CatalogNodeId) -> Result<Vec<CatalogLeafRecord>> {
        let format = self.format();
        let min = format.thread_key(folder_id);
        let max = match folder_id.0.checked_add(1) {
            Some(next) => format.thread_key(CatalogNodeId(next)),
            None => return Err(HfsError::OutOfRange(format!("folder ID {folder_id}"))),
        };
        let records: Vec<_> = self
            .tree
            .find_le_keys(&min, &max, false)?
            .into_iter()
            .filter(|e| e.key.parent_id == folder_id && !e.value.is_thread())
            .collect();
        debug!("folder {folder_id}: {} children", records.len());
        Ok(records)
    }

    /// Exact lookup of `name` inside `parent_id`.
    pub fn get_record(
        &mut self,
        parent_id: CatalogNodeId,
        name: &CatalogName,
    ) -> Result<Option<CatalogLeafRecord>> {
        let key = CatalogKey {
            parent_id,
            name: name.clone(),
        };
        Ok(self
            .tree
            .get_record(&key)?
            .map(|value| LeafEntry { key, value }))
    }

    /// The thread record of `cnid`, stored under `(cnid, "")`.
    pub fn thread_for(&mut self, cnid: CatalogNodeId) -> Result<Option<CatalogThread>> {
        let key = self.format().thread_key(cnid);
        Ok(match self.tree.get_record(&key)? {
            Some(CatalogRecord::FolderThread(t)) | Some(CatalogRecord::FileThread(t)) => Some(t),
            Some(_) => {
                return Err(HfsError::BrokenThread {
                    cnid: cnid.0,
                    reason: "record at the thread key is not a thread".into(),
                })
            }
            None => None,
        })
    }

    /// Records from the root folder down to `record`, inclusive.
    pub fn get_path_to(&mut self, record: &CatalogLeafRecord) -> Result<Vec<CatalogLeafRecord>> {
        let mut path = vec![record.clone()];
        let mut visited = HashSet::new();
        let mut parent = record.key.parent_id;
        while parent != CatalogNodeId::ROOT_PARENT {
            if !visited.insert(parent) {
                return Err(HfsError::BrokenThread {
                    cnid: parent.0,
                    reason: "thread chain loops".into(),
                });
            }
            let thread = self.thread_for(parent)?.ok_or_else(|| HfsError::BrokenThread {
                cnid: parent.0,
                reason: "no thread record".into(),
            })?;
            trace!("thread {parent} -> ({}, {})", thread.parent_id, thread.name);
            let folder = self
                .get_record(thread.parent_id, &thread.name)?
                .ok_or_else(|| HfsError::BrokenThread {
                    cnid: parent.0,
                    reason: format!("thread names missing record \"{}\"", thread.name),
                })?;
            if folder.value.cnid() != Some(parent) {
                return Err(HfsError::BrokenThread {
                    cnid: parent.0,
                    reason: "thread target has a different CNID".into(),
                });
            }
            parent = folder.key.parent_id;
            path.push(folder);
        }
        path.reverse();
        Ok(path)
    }

    /// Path to the folder or file with `cnid`; `None` if it has no thread.
    pub fn get_path_to_id(&mut self, cnid: CatalogNodeId) -> Result<Option<Vec<CatalogLeafRecord>>> {
        let Some(thread) = self.thread_for(cnid)? else {
            return Ok(None);
        };
        let Some(record) = self.get_record(thread.parent_id, &thread.name)? else {
            return Err(HfsError::BrokenThread {
                cnid: cnid.0,
                reason: format!("thread names missing record \"{}\"", thread.name),
            });
        };
        self.get_path_to(&record).map(Some)
    }

    /// Walk `components` down from the root folder.
    pub fn get_entry(&mut self, components: &[&str]) -> Result<Option<CatalogLeafRecord>> {
        let format = self.format();
        let mut current = self.root_folder()?;
        for component in components {
            let Some(folder) = current.value.as_folder() else {
                return Ok(None);
            };
            let Some(name) = format.encode_name(component) else {
                return Ok(None);
            };
            match self.get_record(folder.folder_id, &name)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Folder records directly inside `folder_id`.
    pub fn list_folders(&mut self, folder_id: CatalogNodeId) -> Result<Vec<CatalogLeafRecord>> {
        Ok(self
            .list_records(folder_id)?
            .into_iter()
            .filter(|e| matches!(e.value, CatalogRecord::Folder(_)))
            .collect())
    }
}
