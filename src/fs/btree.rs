//! Generic HFS/HFS+ B-tree engine.
//!
//! The catalog, extents-overflow and attributes files share one node layout;
//! what differs per tree (key decoding, key order, leaf record decoding) is
//! supplied by a [`TreeFormat`].

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Debug;
use std::io::{Read, Seek};

use crate::error::{HfsError, Result};

pub const NODE_DESCRIPTOR_SIZE: usize = 14;
const HEADER_RECORD_SIZE: usize = 106;

/// Header attribute: key length fields are 16-bit.
pub const ATTR_BIG_KEYS: u32 = 0x0000_0002;
/// Header attribute: index records carry keys of their own length rather
/// than keys padded to the maximum key length.
pub const ATTR_VARIABLE_INDEX_KEYS: u32 = 0x0000_0004;

pub const KEY_COMPARE_CASE_FOLDING: u8 = 0xCF;
pub const KEY_COMPARE_BINARY: u8 = 0xBC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Leaf,
    Index,
    Header,
    Map,
}

impl NodeKind {
    pub fn from_raw(kind: i8) -> Option<Self> {
        match kind {
            -1 => Some(NodeKind::Leaf),
            0 => Some(NodeKind::Index),
            1 => Some(NodeKind::Header),
            2 => Some(NodeKind::Map),
            _ => None,
        }
    }

    pub fn raw(self) -> i8 {
        match self {
            NodeKind::Leaf => -1,
            NodeKind::Index => 0,
            NodeKind::Header => 1,
            NodeKind::Map => 2,
        }
    }
}

/// B-tree node descriptor (14 bytes).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: NodeKind,
    pub height: u8,
    pub num_records: u16,
}

impl NodeDescriptor {
    pub fn parse(data: &[u8], tree: &'static str, node: u32) -> Result<Self> {
        if data.len() < NODE_DESCRIPTOR_SIZE {
            return Err(HfsError::corrupt(tree, node, "node shorter than its descriptor"));
        }
        let raw_kind = data[8] as i8;
        let kind = NodeKind::from_raw(raw_kind)
            .ok_or_else(|| HfsError::corrupt(tree, node, format!("unknown node kind {raw_kind}")))?;
        Ok(NodeDescriptor {
            forward_link: BigEndian::read_u32(&data[0..4]),
            backward_link: BigEndian::read_u32(&data[4..8]),
            kind,
            height: data[9],
            num_records: BigEndian::read_u16(&data[10..12]),
        })
    }
}

/// B-tree header record, the first record of node 0.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderRecord {
    pub depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
    pub clump_size: u32,
    pub btree_type: u8,
    pub key_compare_type: u8,
    pub attributes: u32,
}

impl HeaderRecord {
    /// Parse from the start of node 0 (descriptor included).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < NODE_DESCRIPTOR_SIZE + HEADER_RECORD_SIZE {
            return Err(HfsError::corrupt("B-tree", 0, "header node too short"));
        }
        let d = &data[NODE_DESCRIPTOR_SIZE..];
        let header = HeaderRecord {
            depth: BigEndian::read_u16(&d[0..2]),
            root_node: BigEndian::read_u32(&d[2..6]),
            leaf_records: BigEndian::read_u32(&d[6..10]),
            first_leaf_node: BigEndian::read_u32(&d[10..14]),
            last_leaf_node: BigEndian::read_u32(&d[14..18]),
            node_size: BigEndian::read_u16(&d[18..20]),
            max_key_length: BigEndian::read_u16(&d[20..22]),
            total_nodes: BigEndian::read_u32(&d[22..26]),
            free_nodes: BigEndian::read_u32(&d[26..30]),
            clump_size: BigEndian::read_u32(&d[32..36]),
            btree_type: d[36],
            key_compare_type: d[37],
            attributes: BigEndian::read_u32(&d[38..42]),
        };
        if header.node_size < 512 || !header.node_size.is_power_of_two() {
            return Err(HfsError::corrupt(
                "B-tree",
                0,
                format!("invalid node size {}", header.node_size),
            ));
        }
        Ok(header)
    }

    pub fn has_variable_index_keys(&self) -> bool {
        self.attributes & ATTR_VARIABLE_INDEX_KEYS != 0
    }

    pub fn is_empty(&self) -> bool {
        self.root_node == 0
    }
}

/// One node read from a tree file.
#[derive(Debug, Clone)]
pub struct Node {
    pub number: u32,
    pub descriptor: NodeDescriptor,
    data: Vec<u8>,
    offsets: Vec<usize>,
}

impl Node {
    pub fn parse(data: Vec<u8>, tree: &'static str, number: u32) -> Result<Self> {
        let descriptor = NodeDescriptor::parse(&data, tree, number)?;
        let n = descriptor.num_records as usize;
        let table_len = 2 * (n + 1);
        if NODE_DESCRIPTOR_SIZE + table_len > data.len() {
            return Err(HfsError::corrupt(tree, number, format!("{n} records cannot fit")));
        }
        let table_start = data.len() - table_len;

        // Slot i sits at node_size - 2(i+1); slot n holds the free space offset.
        let mut offsets = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let pos = data.len() - 2 * (i + 1);
            let off = BigEndian::read_u16(&data[pos..pos + 2]) as usize;
            if off < NODE_DESCRIPTOR_SIZE || off > table_start {
                return Err(HfsError::corrupt(
                    tree,
                    number,
                    format!("record {i} offset {off} outside the node"),
                ));
            }
            if let Some(&prev) = offsets.last() {
                if off < prev {
                    return Err(HfsError::corrupt(
                        tree,
                        number,
                        format!("record {i} offset {off} precedes record {}", i - 1),
                    ));
                }
            }
            offsets.push(off);
        }
        Ok(Node {
            number,
            descriptor,
            data,
            offsets,
        })
    }

    pub fn num_records(&self) -> usize {
        self.descriptor.num_records as usize
    }

    pub fn kind(&self) -> NodeKind {
        self.descriptor.kind
    }

    /// Raw bytes of record `i` (key and data).
    pub fn record(&self, i: usize) -> Option<&[u8]> {
        if i >= self.num_records() {
            return None;
        }
        Some(&self.data[self.offsets[i]..self.offsets[i + 1]])
    }

    pub fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.num_records()).filter_map(move |i| self.record(i))
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }
}

/// A decoded leaf record with its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeafEntry<K, V> {
    pub key: K,
    pub value: V,
}

/// Per-tree key and record handling.
pub trait TreeFormat {
    type Key: Clone + Debug;
    type LeafRecord: Clone + Debug;

    fn tree_name(&self) -> &'static str;

    /// Size of the key length field: 1 on classic HFS, 2 on HFS+.
    fn key_length_size(&self) -> usize;

    /// Decode the key at the start of `record` and return it together with
    /// the offset of the record data that follows.
    fn parse_key(&self, record: &[u8]) -> Result<(Self::Key, usize)>;

    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;

    fn parse_leaf(&self, key: &Self::Key, data: &[u8]) -> Result<Self::LeafRecord>;
}

fn align2(n: usize) -> usize {
    (n + 1) & !1
}

/// A B-tree stored in a fork stream.
pub struct BTreeFile<R, F> {
    stream: R,
    format: F,
}

impl<R: Read + Seek, F: TreeFormat> BTreeFile<R, F> {
    pub fn new(stream: R, format: F) -> Self {
        BTreeFile { stream, format }
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    pub fn into_inner(self) -> R {
        self.stream
    }

    /// Read the header record from node 0. Not cached.
    pub fn header(&mut self) -> Result<HeaderRecord> {
        let mut buf = [0u8; NODE_DESCRIPTOR_SIZE + HEADER_RECORD_SIZE];
        crate::io::read_exact_at(&mut self.stream, 0, &mut buf).map_err(|e| {
            HfsError::corrupt(self.format.tree_name(), 0, format!("header unreadable: {e}"))
        })?;
        let kind = buf[8] as i8;
        if NodeKind::from_raw(kind) != Some(NodeKind::Header) {
            return Err(HfsError::corrupt(
                self.format.tree_name(),
                0,
                format!("node 0 has kind {kind}, expected header"),
            ));
        }
        HeaderRecord::parse(&buf)
    }

    pub fn read_node(&mut self, header: &HeaderRecord, number: u32) -> Result<Node> {
        let tree = self.format.tree_name();
        if number >= header.total_nodes {
            return Err(HfsError::corrupt(
                tree,
                number,
                format!("node number beyond {} total nodes", header.total_nodes),
            ));
        }
        let size = header.node_size as usize;
        let data = crate::io::read_vec_at(&mut self.stream, number as u64 * size as u64, size)
            .map_err(|e| HfsError::corrupt(tree, number, format!("node unreadable: {e}")))?;
        Node::parse(data, tree, number)
    }

    /// Decode the keys of every record in an index node with child pointers.
    fn index_entries(&self, header: &HeaderRecord, node: &Node) -> Result<Vec<(F::Key, u32)>> {
        let tree = self.format.tree_name();
        let mut entries = Vec::with_capacity(node.num_records());
        for rec in node.records() {
            let (key, data_offset) = self.format.parse_key(rec)?;
            let ptr_offset = if header.has_variable_index_keys() {
                data_offset
            } else {
                align2(self.format.key_length_size() + header.max_key_length as usize)
            };
            if ptr_offset + 4 > rec.len() {
                return Err(HfsError::corrupt(tree, node.number, "index record truncated"));
            }
            entries.push((key, BigEndian::read_u32(&rec[ptr_offset..ptr_offset + 4])));
        }
        Ok(entries)
    }

    fn leaf_entries(&self, node: &Node) -> Result<Vec<LeafEntry<F::Key, F::LeafRecord>>> {
        let mut entries = Vec::with_capacity(node.num_records());
        for rec in node.records() {
            let (key, data_offset) = self.format.parse_key(rec)?;
            if data_offset > rec.len() {
                return Err(HfsError::corrupt(
                    self.format.tree_name(),
                    node.number,
                    "leaf key overruns its record",
                ));
            }
            let value = self.format.parse_leaf(&key, &rec[data_offset..])?;
            entries.push(LeafEntry { key, value });
        }
        Ok(entries)
    }

    /// Walk from the root to the leaf that would hold `key`. With
    /// `leftmost_fallback`, a key below every index key descends into the
    /// first child instead of yielding `None`.
    fn descend(
        &mut self,
        header: &HeaderRecord,
        key: &F::Key,
        leftmost_fallback: bool,
    ) -> Result<Option<Node>> {
        if header.is_empty() {
            return Ok(None);
        }
        let tree = self.format.tree_name();
        let mut current = header.root_node;
        for _ in 0..=header.depth {
            let node = self.read_node(header, current)?;
            match node.kind() {
                NodeKind::Leaf => return Ok(Some(node)),
                NodeKind::Index => {
                    let entries = self.index_entries(header, &node)?;
                    let chosen = entries
                        .iter()
                        .rev()
                        .find(|(k, _)| self.format.compare(k, key) != Ordering::Greater)
                        .or_else(|| if leftmost_fallback { entries.first() } else { None });
                    match chosen {
                        Some((_, child)) => {
                            trace!("{tree}: node {current} -> child {child}");
                            current = *child;
                        }
                        None => return Ok(None),
                    }
                }
                other => {
                    return Err(HfsError::corrupt(
                        tree,
                        current,
                        format!("unexpected {other:?} node during descent"),
                    ))
                }
            }
        }
        Err(HfsError::corrupt(
            tree,
            current,
            format!("descent exceeded tree depth {}", header.depth),
        ))
    }

    /// Exact lookup.
    pub fn get_record(&mut self, key: &F::Key) -> Result<Option<F::LeafRecord>> {
        let header = self.header()?;
        let Some(leaf) = self.descend(&header, key, false)? else {
            return Ok(None);
        };
        Ok(self
            .leaf_entries(&leaf)?
            .into_iter()
            .find(|e| self.format.compare(&e.key, key) == Ordering::Equal)
            .map(|e| e.value))
    }

    /// The leaf record with the greatest key less than or equal to `key`.
    pub fn find_le_key(&mut self, key: &F::Key) -> Result<Option<LeafEntry<F::Key, F::LeafRecord>>> {
        let header = self.header()?;
        let Some(leaf) = self.descend(&header, key, false)? else {
            return Ok(None);
        };
        Ok(self
            .leaf_entries(&leaf)?
            .into_iter()
            .rev()
            .find(|e| self.format.compare(&e.key, key) != Ordering::Greater))
    }

    /// Every leaf record with `min <= key < max_exclusive`, in key order.
    /// Without `strict`, the record just below `min` is prepended when one
    /// exists.
    pub fn find_le_keys(
        &mut self,
        min: &F::Key,
        max_exclusive: &F::Key,
        strict: bool,
    ) -> Result<Vec<LeafEntry<F::Key, F::LeafRecord>>> {
        let mut out = Vec::new();
        let mut below = None;
        self.scan_from(min, |format, entry| {
            if format.compare(&entry.key, min) == Ordering::Less {
                below = Some(entry);
                return ScanStep::Continue;
            }
            if format.compare(&entry.key, max_exclusive) != Ordering::Less {
                return ScanStep::Stop;
            }
            out.push(entry);
            ScanStep::Continue
        })?;
        if !strict {
            if let Some(entry) = below {
                out.insert(0, entry);
            }
        }
        Ok(out)
    }

    /// First leaf record at or after `lower` for which `probe` returns
    /// `Equal`. `Less` means keep scanning, `Greater` ends the search.
    pub fn find_parent<P>(
        &mut self,
        lower: &F::Key,
        probe: P,
    ) -> Result<Option<LeafEntry<F::Key, F::LeafRecord>>>
    where
        P: Fn(&F::Key) -> Ordering,
    {
        let mut found = None;
        self.scan_from(lower, |_, entry| match probe(&entry.key) {
            Ordering::Less => ScanStep::Continue,
            Ordering::Equal => {
                found = Some(entry);
                ScanStep::Stop
            }
            Ordering::Greater => ScanStep::Stop,
        })?;
        Ok(found)
    }

    /// Feed leaf records to `visit`, starting in the leaf that would hold
    /// `start` and following sibling links.
    fn scan_from<V>(&mut self, start: &F::Key, mut visit: V) -> Result<()>
    where
        V: FnMut(&F, LeafEntry<F::Key, F::LeafRecord>) -> ScanStep,
    {
        let header = self.header()?;
        let Some(mut leaf) = self.descend(&header, start, true)? else {
            return Ok(());
        };
        let mut visited = HashSet::new();
        loop {
            if !visited.insert(leaf.number) {
                return Err(HfsError::corrupt(
                    self.format.tree_name(),
                    leaf.number,
                    "leaf chain loops",
                ));
            }
            for entry in self.leaf_entries(&leaf)? {
                if visit(&self.format, entry) == ScanStep::Stop {
                    return Ok(());
                }
            }
            let next = leaf.descriptor.forward_link;
            if next == 0 {
                return Ok(());
            }
            leaf = self.read_node(&header, next)?;
            if leaf.kind() != NodeKind::Leaf {
                return Err(HfsError::corrupt(
                    self.format.tree_name(),
                    next,
                    "sibling link of a leaf is not a leaf",
                ));
            }
        }
    }

    /// Iterate every leaf record from the first leaf along the sibling chain.
    pub fn leaf_records(&mut self) -> Result<LeafRecords<'_, R, F>> {
        let header = self.header()?;
        debug!(
            "{}: {} leaf records, depth {}, {} nodes",
            self.format.tree_name(),
            header.leaf_records,
            header.depth,
            header.total_nodes
        );
        let next = if header.is_empty() { 0 } else { header.first_leaf_node };
        Ok(LeafRecords {
            tree: self,
            header,
            next,
            pending: Vec::new().into_iter(),
            visited: HashSet::new(),
            failed: false,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ScanStep {
    Continue,
    Stop,
}

/// Iterator over the leaf chain. Yields an error once and then stops if a
/// node is unreadable or the chain loops.
pub struct LeafRecords<'a, R, F: TreeFormat> {
    tree: &'a mut BTreeFile<R, F>,
    header: HeaderRecord,
    next: u32,
    pending: std::vec::IntoIter<LeafEntry<F::Key, F::LeafRecord>>,
    visited: HashSet<u32>,
    failed: bool,
}

impl<R: Read + Seek, F: TreeFormat> Iterator for LeafRecords<'_, R, F> {
    type Item = Result<LeafEntry<F::Key, F::LeafRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.next() {
                return Some(Ok(entry));
            }
            if self.failed || self.next == 0 {
                return None;
            }
            let number = self.next;
            let loaded = if self.visited.insert(number) {
                self.tree.read_node(&self.header, number).and_then(|node| {
                    if node.kind() != NodeKind::Leaf {
                        return Err(HfsError::corrupt(
                            self.tree.format.tree_name(),
                            number,
                            "leaf chain reaches a non-leaf node",
                        ));
                    }
                    let entries = self.tree.leaf_entries(&node)?;
                    Ok((node.descriptor.forward_link, entries))
                })
            } else {
                Err(HfsError::corrupt(
                    self.tree.format.tree_name(),
                    number,
                    "leaf chain loops",
                ))
            };
            match loaded {
                Ok((next, entries)) => {
                    self.next = next;
                    self.pending = entries.into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
