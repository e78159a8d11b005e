//! HFS+ attributes file (extended attributes), read-only.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use std::cmp::Ordering;
use std::io::{Read, Seek};

use super::btree::{BTreeFile, LeafEntry, TreeFormat};
use super::extents::{parse_hfsplus_extent_record, ExtentDescriptor, ForkData};
use super::unicode::binary_compare;
use crate::error::{HfsError, Result};
use crate::io::decode::utf16be_units;

const RECORD_INLINE_DATA: u32 = 0x10;
const RECORD_FORK_DATA: u32 = 0x20;
const RECORD_EXTENTS: u32 = 0x30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeKey {
    pub file_id: u32,
    pub start_block: u32,
    pub name: Vec<u16>,
}

impl AttributeKey {
    pub fn new(file_id: u32, name: &str) -> Self {
        AttributeKey {
            file_id,
            start_block: 0,
            name: name.encode_utf16().collect(),
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttributeRecord {
    InlineData(Vec<u8>),
    ForkData(ForkData),
    Extents(Vec<ExtentDescriptor>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AttributesFormat;

impl TreeFormat for AttributesFormat {
    type Key = AttributeKey;
    type LeafRecord = AttributeRecord;

    fn tree_name(&self) -> &'static str {
        "attributes"
    }

    fn key_length_size(&self) -> usize {
        2
    }

    // keyLength(2) pad(2) fileID(4) startBlock(4) nameLength(2) name
    fn parse_key(&self, record: &[u8]) -> Result<(AttributeKey, usize)> {
        if record.len() < 14 {
            return Err(HfsError::corrupt("attributes", 0, "key truncated"));
        }
        let key_len = BigEndian::read_u16(&record[0..2]) as usize;
        let name_len = BigEndian::read_u16(&record[12..14]) as usize;
        if 14 + name_len * 2 > 2 + key_len || 2 + key_len > record.len() {
            return Err(HfsError::corrupt(
                "attributes",
                0,
                format!("key length {key_len} inconsistent"),
            ));
        }
        Ok((
            AttributeKey {
                file_id: BigEndian::read_u32(&record[4..8]),
                start_block: BigEndian::read_u32(&record[8..12]),
                name: utf16be_units(&record[14..14 + name_len * 2]),
            },
            (2 + key_len + 1) & !1,
        ))
    }

    fn compare(&self, a: &AttributeKey, b: &AttributeKey) -> Ordering {
        a.file_id
            .cmp(&b.file_id)
            .then_with(|| binary_compare(&a.name, &b.name))
            .then(a.start_block.cmp(&b.start_block))
    }

    fn parse_leaf(&self, _key: &AttributeKey, data: &[u8]) -> Result<AttributeRecord> {
        let truncated = || HfsError::corrupt("attributes", 0, "record truncated");
        if data.len() < 4 {
            return Err(truncated());
        }
        match BigEndian::read_u32(&data[0..4]) {
            // recordType(4) reserved(8) attrSize(4) attrData
            RECORD_INLINE_DATA => {
                if data.len() < 16 {
                    return Err(truncated());
                }
                let size = BigEndian::read_u32(&data[12..16]) as usize;
                let bytes = data.get(16..16 + size).ok_or_else(truncated)?;
                Ok(AttributeRecord::InlineData(bytes.to_vec()))
            }
            RECORD_FORK_DATA => {
                let fork = data.get(8..88).ok_or_else(truncated)?;
                Ok(AttributeRecord::ForkData(ForkData::parse_hfsplus(fork)))
            }
            RECORD_EXTENTS => {
                let ext = data.get(8..72).ok_or_else(truncated)?;
                Ok(AttributeRecord::Extents(parse_hfsplus_extent_record(ext)))
            }
            other => Err(HfsError::corrupt(
                "attributes",
                0,
                format!("unknown attribute record type 0x{other:X}"),
            )),
        }
    }
}

pub struct AttributesFile<R> {
    tree: BTreeFile<R, AttributesFormat>,
}

impl<R: Read + Seek> AttributesFile<R> {
    pub fn new(stream: R) -> Self {
        AttributesFile {
            tree: BTreeFile::new(stream, AttributesFormat),
        }
    }

    pub fn tree(&mut self) -> &mut BTreeFile<R, AttributesFormat> {
        &mut self.tree
    }

    /// All attribute records of `file_id`, extension records included.
    pub fn list_attributes(
        &mut self,
        file_id: u32,
    ) -> Result<Vec<LeafEntry<AttributeKey, AttributeRecord>>> {
        let min = AttributeKey {
            file_id,
            start_block: 0,
            name: Vec::new(),
        };
        let max = match file_id.checked_add(1) {
            Some(next) => AttributeKey {
                file_id: next,
                start_block: 0,
                name: Vec::new(),
            },
            None => return Err(HfsError::OutOfRange(format!("file ID {file_id}"))),
        };
        self.tree.find_le_keys(&min, &max, true)
    }

    pub fn get_attribute(&mut self, file_id: u32, name: &str) -> Result<Option<AttributeRecord>> {
        self.tree.get_record(&AttributeKey::new(file_id, name))
    }
}
