//! Synthetic disk images for the integration tests.
//!
//! Every image is built in memory: B-tree nodes, catalog records, volume
//! headers and partition maps are encoded by hand following the on-disk
//! layouts, so the tests need no fixtures.
//!
//! The HFS+ fixture volume contains:
//!   hello.txt              HELLO
//!   big.bin                big_contents(), one inline extent plus one
//!                            extent in the overflow file
//!   Documents/             folder
//!   Documents/a.txt        A_TXT
//!   Documents/notes.txt    NESTED, resource fork RSRC

#![allow(dead_code)]

use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub const HFS_EPOCH_2024: u32 = 3_786_912_000;

pub const HELLO: &[u8] = b"Hello, HFS+!";
pub const NESTED: &[u8] = b"nested file";
pub const RSRC: &[u8] = b"resource fork bytes";
pub const A_TXT: &[u8] = b"aaa";
pub const README: &[u8] = b"Classic HFS data";
pub const FINDER: &[u8] = b"finder";

pub const BLOCK_SIZE: u32 = 4096;
pub const TOTAL_BLOCKS: u32 = 64;
pub const BIG_SIZE: usize = 3 * BLOCK_SIZE as usize - 100;

pub fn big_contents() -> Vec<u8> {
    (0..BIG_SIZE).map(|i| (i * 7 % 251) as u8).collect()
}

// ============================================================================
// B-tree images
// ============================================================================

pub struct TreeLayout {
    pub node_size: usize,
    pub big_keys: bool,
    pub max_key_length: u16,
    pub variable_index_keys: bool,
    pub key_compare_type: u8,
    pub records_per_node: usize,
}

fn align2(n: usize) -> usize {
    (n + 1) & !1
}

fn write_node(
    layout: &TreeLayout,
    kind: i8,
    height: u8,
    flink: u32,
    blink: u32,
    records: &[Vec<u8>],
) -> Vec<u8> {
    let mut node = vec![0u8; layout.node_size];
    BigEndian::write_u32(&mut node[0..4], flink);
    BigEndian::write_u32(&mut node[4..8], blink);
    node[8] = kind as u8;
    node[9] = height;
    BigEndian::write_u16(&mut node[10..12], records.len() as u16);
    let mut pos = 14;
    let mut offsets = Vec::new();
    for rec in records {
        offsets.push(pos);
        node[pos..pos + rec.len()].copy_from_slice(rec);
        pos += rec.len();
    }
    offsets.push(pos);
    assert!(pos + 2 * offsets.len() <= layout.node_size, "node overflow");
    for (i, off) in offsets.iter().enumerate() {
        let slot = layout.node_size - 2 * (i + 1);
        BigEndian::write_u16(&mut node[slot..slot + 2], *off as u16);
    }
    node
}

/// Tree image from `(encoded key, data)` pairs already sorted in key
/// order. Node 0 is the header, leaves follow from node 1, index levels
/// after them, the root last.
pub fn build_tree(layout: &TreeLayout, records: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let key_len_size = if layout.big_keys { 2 } else { 1 };
    let per = layout.records_per_node.max(1);
    let mut nodes: Vec<Vec<u8>> = Vec::new();
    let chunks: Vec<_> = records.chunks(per).collect();
    let leaf_count = chunks.len() as u32;
    let mut level: Vec<(Vec<u8>, u32)> = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let number = i as u32 + 1;
        let flink = if number < leaf_count { number + 1 } else { 0 };
        let recs: Vec<Vec<u8>> = chunk
            .iter()
            .map(|(k, d)| {
                let mut r = k.clone();
                r.resize(align2(r.len()), 0);
                r.extend_from_slice(d);
                r
            })
            .collect();
        nodes.push(write_node(layout, -1, 1, flink, number - 1, &recs));
        level.push((chunk[0].0.clone(), number));
    }

    let mut depth: u16 = if records.is_empty() { 0 } else { 1 };
    while level.len() > 1 {
        depth += 1;
        let mut next = Vec::new();
        for chunk in level.chunks(per) {
            let number = nodes.len() as u32 + 1;
            let recs: Vec<Vec<u8>> = chunk
                .iter()
                .map(|(k, child)| {
                    let mut r = k.clone();
                    let area = if layout.variable_index_keys {
                        align2(r.len())
                    } else {
                        align2(key_len_size + layout.max_key_length as usize)
                    };
                    r.resize(area, 0);
                    r.extend_from_slice(&child.to_be_bytes());
                    r
                })
                .collect();
            nodes.push(write_node(layout, 0, depth as u8, 0, 0, &recs));
            next.push((chunk[0].0.clone(), number));
        }
        level = next;
    }
    let root = level.first().map_or(0, |(_, n)| *n);

    let mut header = vec![0u8; 106];
    BigEndian::write_u16(&mut header[0..2], depth);
    BigEndian::write_u32(&mut header[2..6], root);
    BigEndian::write_u32(&mut header[6..10], records.len() as u32);
    BigEndian::write_u32(&mut header[10..14], if leaf_count > 0 { 1 } else { 0 });
    BigEndian::write_u32(&mut header[14..18], leaf_count);
    BigEndian::write_u16(&mut header[18..20], layout.node_size as u16);
    BigEndian::write_u16(&mut header[20..22], layout.max_key_length);
    BigEndian::write_u32(&mut header[22..26], nodes.len() as u32 + 1);
    header[37] = layout.key_compare_type;
    let mut attrs = 0u32;
    if layout.big_keys {
        attrs |= 2;
    }
    if layout.variable_index_keys {
        attrs |= 4;
    }
    BigEndian::write_u32(&mut header[38..42], attrs);

    let mut image = write_node(layout, 1, 0, 0, 0, &[header]);
    for node in nodes {
        image.extend_from_slice(&node);
    }
    image
}

// ============================================================================
// HFS+ records
// ============================================================================

pub fn hfsplus_key(parent: u32, name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut k = Vec::new();
    k.extend_from_slice(&((6 + units.len() * 2) as u16).to_be_bytes());
    k.extend_from_slice(&parent.to_be_bytes());
    k.extend_from_slice(&(units.len() as u16).to_be_bytes());
    for u in units {
        k.extend_from_slice(&u.to_be_bytes());
    }
    k
}

pub fn hfsplus_folder(id: u32, valence: u32) -> Vec<u8> {
    let mut d = vec![0u8; 88];
    BigEndian::write_u16(&mut d[0..2], 1);
    BigEndian::write_u32(&mut d[4..8], valence);
    BigEndian::write_u32(&mut d[8..12], id);
    BigEndian::write_u32(&mut d[16..20], HFS_EPOCH_2024);
    d
}

fn write_plus_fork(d: &mut [u8], size: u64, extents: &[(u32, u32)]) {
    BigEndian::write_u64(&mut d[0..8], size);
    let blocks: u32 = extents.iter().map(|e| e.1).sum();
    BigEndian::write_u32(&mut d[12..16], blocks);
    for (i, &(start, count)) in extents.iter().enumerate() {
        let at = 16 + i * 8;
        BigEndian::write_u32(&mut d[at..at + 4], start);
        BigEndian::write_u32(&mut d[at + 4..at + 8], count);
    }
}

pub fn hfsplus_file(
    id: u32,
    data: (u64, &[(u32, u32)]),
    rsrc: (u64, &[(u32, u32)]),
) -> Vec<u8> {
    let mut d = vec![0u8; 248];
    BigEndian::write_u16(&mut d[0..2], 2);
    BigEndian::write_u32(&mut d[8..12], id);
    BigEndian::write_u32(&mut d[16..20], HFS_EPOCH_2024);
    d[48..52].copy_from_slice(b"TEXT");
    d[52..56].copy_from_slice(b"ttxt");
    write_plus_fork(&mut d[88..168], data.0, data.1);
    write_plus_fork(&mut d[168..248], rsrc.0, rsrc.1);
    d
}

pub fn hfsplus_thread(folder: bool, parent: u32, name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut d = vec![0u8; 10];
    BigEndian::write_u16(&mut d[0..2], if folder { 3 } else { 4 });
    BigEndian::write_u32(&mut d[4..8], parent);
    BigEndian::write_u16(&mut d[8..10], units.len() as u16);
    for u in units {
        d.extend_from_slice(&u.to_be_bytes());
    }
    d
}

/// HFS+ extents-overflow record: key (fork, file, start) and 8 extents.
pub fn hfsplus_extent_record(
    fork_type: u8,
    file_id: u32,
    start_block: u32,
    extents: &[(u32, u32)],
) -> (Vec<u8>, Vec<u8>) {
    let mut key = vec![0u8; 12];
    BigEndian::write_u16(&mut key[0..2], 10);
    key[2] = fork_type;
    BigEndian::write_u32(&mut key[4..8], file_id);
    BigEndian::write_u32(&mut key[8..12], start_block);
    let mut data = vec![0u8; 64];
    for (i, &(s, c)) in extents.iter().enumerate() {
        BigEndian::write_u32(&mut data[i * 8..i * 8 + 4], s);
        BigEndian::write_u32(&mut data[i * 8 + 4..i * 8 + 8], c);
    }
    (key, data)
}

// ============================================================================
// HFS+ volume
// ============================================================================

pub struct HfsPlusOptions {
    pub signature: u16,
    pub key_compare_type: u8,
    pub journaled: bool,
}

impl Default for HfsPlusOptions {
    fn default() -> Self {
        Self {
            signature: 0x482B,
            key_compare_type: 0xCF,
            journaled: false,
        }
    }
}

fn put(image: &mut [u8], block: u32, bytes: &[u8]) {
    let at = block as usize * BLOCK_SIZE as usize;
    image[at..at + bytes.len()].copy_from_slice(bytes);
}

/// Fixture volume described in the module docs, `TOTAL_BLOCKS` blocks of
/// `BLOCK_SIZE` bytes.
pub fn hfsplus_volume(options: &HfsPlusOptions) -> Vec<u8> {
    // block 0 header, 1 bitmap, 2-3 extents tree, 4.. catalog, then data
    let hello_block = 12;
    let big_first = 13;
    let notes_block = 14;
    let big_rest = 15; // two blocks
    let rsrc_block = 17;
    let a_block = 18;
    let journal_info = 19;

    let big = big_contents();
    let mut entries: Vec<(u32, &str, Vec<u8>)> = vec![
        (1, "Test HD", hfsplus_folder(2, 3)),
        (2, "", hfsplus_thread(true, 1, "Test HD")),
        (2, "hello.txt", hfsplus_file(17, (HELLO.len() as u64, &[(hello_block, 1)]), (0, &[]))),
        (2, "big.bin", hfsplus_file(18, (big.len() as u64, &[(big_first, 1)]), (0, &[]))),
        (2, "Documents", hfsplus_folder(16, 2)),
        (16, "", hfsplus_thread(true, 2, "Documents")),
        (16, "a.txt", hfsplus_file(20, (A_TXT.len() as u64, &[(a_block, 1)]), (0, &[]))),
        (
            16,
            "notes.txt",
            hfsplus_file(
                19,
                (NESTED.len() as u64, &[(notes_block, 1)]),
                (RSRC.len() as u64, &[(rsrc_block, 1)]),
            ),
        ),
        (17, "", hfsplus_thread(false, 2, "hello.txt")),
        (18, "", hfsplus_thread(false, 2, "big.bin")),
        (19, "", hfsplus_thread(false, 16, "notes.txt")),
        (20, "", hfsplus_thread(false, 16, "a.txt")),
    ];
    // Names are ASCII, so lowercasing matches case-folding order.
    if options.key_compare_type == 0xBC {
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    } else {
        entries.sort_by_key(|e| (e.0, e.1.to_ascii_lowercase()));
    }
    let records: Vec<(Vec<u8>, Vec<u8>)> = entries
        .into_iter()
        .map(|(parent, name, data)| (hfsplus_key(parent, name), data))
        .collect();
    let catalog = build_tree(
        &TreeLayout {
            node_size: BLOCK_SIZE as usize,
            big_keys: true,
            max_key_length: 516,
            variable_index_keys: true,
            key_compare_type: options.key_compare_type,
            records_per_node: 3,
        },
        &records,
    );
    let catalog_blocks = (catalog.len() / BLOCK_SIZE as usize) as u32;
    assert!(4 + catalog_blocks <= hello_block, "catalog too large");

    let extents = build_tree(
        &TreeLayout {
            node_size: BLOCK_SIZE as usize,
            big_keys: true,
            max_key_length: 10,
            variable_index_keys: false,
            key_compare_type: 0,
            records_per_node: 8,
        },
        &[hfsplus_extent_record(0x00, 18, 1, &[(big_rest, 2)])],
    );
    let extents_blocks = (extents.len() / BLOCK_SIZE as usize) as u32;

    let mut image = vec![0u8; (TOTAL_BLOCKS * BLOCK_SIZE) as usize];
    put(&mut image, 4, &catalog);
    put(&mut image, 2, &extents);
    put(&mut image, hello_block, HELLO);
    put(&mut image, big_first, &big[..BLOCK_SIZE as usize]);
    put(&mut image, big_rest, &big[BLOCK_SIZE as usize..]);
    put(&mut image, notes_block, NESTED);
    put(&mut image, rsrc_block, RSRC);
    put(&mut image, a_block, A_TXT);

    let mut used: Vec<u32> = (0..4 + catalog_blocks).collect();
    used.extend([hello_block, big_first, notes_block, big_rest, big_rest + 1, rsrc_block, a_block]);
    if options.journaled {
        used.push(journal_info);
    }
    let mut bitmap = vec![0u8; BLOCK_SIZE as usize];
    for b in &used {
        bitmap[*b as usize / 8] |= 0x80 >> (b % 8);
    }
    put(&mut image, 1, &bitmap);

    let mut h = vec![0u8; 512];
    BigEndian::write_u16(&mut h[0..2], options.signature);
    BigEndian::write_u16(&mut h[2..4], if options.signature == 0x4858 { 5 } else { 4 });
    let mut attributes = 1 << 8;
    if options.journaled {
        attributes |= 1 << 13;
        BigEndian::write_u32(&mut h[12..16], journal_info);
    }
    BigEndian::write_u32(&mut h[4..8], attributes);
    BigEndian::write_u32(&mut h[20..24], HFS_EPOCH_2024);
    BigEndian::write_u32(&mut h[32..36], 4);
    BigEndian::write_u32(&mut h[36..40], 1);
    BigEndian::write_u32(&mut h[40..44], BLOCK_SIZE);
    BigEndian::write_u32(&mut h[44..48], TOTAL_BLOCKS);
    BigEndian::write_u32(&mut h[48..52], TOTAL_BLOCKS - used.len() as u32);
    BigEndian::write_u32(&mut h[64..68], 21);
    write_plus_fork(&mut h[112..192], BLOCK_SIZE as u64, &[(1, 1)]);
    write_plus_fork(
        &mut h[192..272],
        extents.len() as u64,
        &[(2, extents_blocks)],
    );
    write_plus_fork(&mut h[272..352], catalog.len() as u64, &[(4, catalog_blocks)]);
    image[1024..1536].copy_from_slice(&h);

    if options.journaled {
        // Journal info block pointing at an empty journal in the free tail.
        let journal_offset = 40 * BLOCK_SIZE as u64;
        let mut jib = vec![0u8; 52];
        BigEndian::write_u32(&mut jib[0..4], 1);
        BigEndian::write_u64(&mut jib[36..44], journal_offset);
        BigEndian::write_u64(&mut jib[44..52], 8 * BLOCK_SIZE as u64);
        put(&mut image, journal_info, &jib);

        let mut jh = vec![0u8; 44];
        LittleEndian::write_u32(&mut jh[0..4], 0x4A4E_4C78);
        LittleEndian::write_u32(&mut jh[4..8], 0x1234_5678);
        LittleEndian::write_u64(&mut jh[8..16], 512);
        LittleEndian::write_u64(&mut jh[16..24], 512);
        LittleEndian::write_u64(&mut jh[24..32], 8 * BLOCK_SIZE as u64);
        LittleEndian::write_u32(&mut jh[32..36], 4096);
        LittleEndian::write_u32(&mut jh[40..44], 512);
        let at = journal_offset as usize;
        image[at..at + jh.len()].copy_from_slice(&jh);
    }
    image
}

// ============================================================================
// Classic HFS
// ============================================================================

pub const HFS_ALLOC_SIZE: u32 = 512;
pub const HFS_TOTAL_BLOCKS: u32 = 40;
/// First allocation block, in 512-byte sectors.
pub const HFS_ALLOC_START: u16 = 4;

pub fn hfs_key(parent: u32, name: &[u8]) -> Vec<u8> {
    let mut k = vec![(6 + name.len()) as u8, 0];
    k.extend_from_slice(&parent.to_be_bytes());
    k.push(name.len() as u8);
    k.extend_from_slice(name);
    k
}

pub fn hfs_dir(id: u32, valence: u16) -> Vec<u8> {
    let mut d = vec![0u8; 70];
    d[0] = 1;
    BigEndian::write_u16(&mut d[4..6], valence);
    BigEndian::write_u32(&mut d[6..10], id);
    d
}

pub fn hfs_file(id: u32, size: u32, extent: (u16, u16)) -> Vec<u8> {
    let mut d = vec![0u8; 102];
    d[0] = 2;
    d[4..8].copy_from_slice(b"APPL");
    d[8..12].copy_from_slice(b"MACS");
    BigEndian::write_u32(&mut d[20..24], id);
    BigEndian::write_u32(&mut d[26..30], size);
    BigEndian::write_u32(&mut d[30..34], extent.1 as u32 * HFS_ALLOC_SIZE);
    BigEndian::write_u32(&mut d[48..52], HFS_EPOCH_2024);
    BigEndian::write_u16(&mut d[74..76], extent.0);
    BigEndian::write_u16(&mut d[76..78], extent.1);
    d
}

pub fn hfs_thread(parent: u32, name: &[u8]) -> Vec<u8> {
    let mut d = vec![0u8; 46];
    d[0] = 3;
    BigEndian::write_u32(&mut d[10..14], parent);
    d[14] = name.len() as u8;
    d[15..15 + name.len()].copy_from_slice(name);
    d
}

/// Classic HFS volume "Classic" holding `ReadMe` and `System Folder/Finder`.
/// Files carry no thread records, as is usual on HFS.
pub fn hfs_volume() -> Vec<u8> {
    let records = vec![
        (hfs_key(1, b"Classic"), hfs_dir(2, 2)),
        (hfs_key(2, b""), hfs_thread(1, b"Classic")),
        (hfs_key(2, b"ReadMe"), hfs_file(16, README.len() as u32, (8, 1))),
        (hfs_key(2, b"System Folder"), hfs_dir(17, 1)),
        (hfs_key(17, b""), hfs_thread(2, b"System Folder")),
        (hfs_key(17, b"Finder"), hfs_file(18, FINDER.len() as u32, (9, 1))),
    ];
    let catalog = build_tree(
        &TreeLayout {
            node_size: 512,
            big_keys: false,
            max_key_length: 37,
            variable_index_keys: false,
            key_compare_type: 0,
            records_per_node: 2,
        },
        &records,
    );
    let extents = build_tree(
        &TreeLayout {
            node_size: 512,
            big_keys: false,
            max_key_length: 7,
            variable_index_keys: false,
            key_compare_type: 0,
            records_per_node: 8,
        },
        &[],
    );
    let catalog_blocks = (catalog.len() / 512) as u16;
    assert!(1 + catalog_blocks <= 8, "catalog too large");

    let alloc_base = HFS_ALLOC_START as usize * 512;
    let len = alloc_base + (HFS_TOTAL_BLOCKS * HFS_ALLOC_SIZE) as usize + 1024;
    let mut image = vec![0u8; len];
    let block_at = |b: usize| alloc_base + b * HFS_ALLOC_SIZE as usize;
    image[block_at(0)..block_at(0) + extents.len()].copy_from_slice(&extents);
    image[block_at(1)..block_at(1) + catalog.len()].copy_from_slice(&catalog);
    image[block_at(8)..block_at(8) + README.len()].copy_from_slice(README);
    image[block_at(9)..block_at(9) + FINDER.len()].copy_from_slice(FINDER);

    // bitmap at sector 3: blocks 0..=catalog, 8 and 9 used
    let mut used: Vec<u32> = (0..1 + catalog_blocks as u32).collect();
    used.extend([8, 9]);
    for b in &used {
        image[3 * 512 + *b as usize / 8] |= 0x80 >> (b % 8);
    }

    let mdb = &mut image[1024..1536];
    BigEndian::write_u16(&mut mdb[0..2], 0x4244);
    BigEndian::write_u32(&mut mdb[6..10], HFS_EPOCH_2024);
    BigEndian::write_u16(&mut mdb[10..12], 1 << 8);
    BigEndian::write_u16(&mut mdb[12..14], 1);
    BigEndian::write_u16(&mut mdb[14..16], 3);
    BigEndian::write_u16(&mut mdb[18..20], HFS_TOTAL_BLOCKS as u16);
    BigEndian::write_u32(&mut mdb[20..24], HFS_ALLOC_SIZE);
    BigEndian::write_u16(&mut mdb[28..30], HFS_ALLOC_START);
    BigEndian::write_u32(&mut mdb[30..34], 19);
    BigEndian::write_u16(&mut mdb[34..36], (HFS_TOTAL_BLOCKS - used.len() as u32) as u16);
    mdb[36] = 7;
    mdb[37..44].copy_from_slice(b"Classic");
    BigEndian::write_u32(&mut mdb[130..134], extents.len() as u32);
    BigEndian::write_u16(&mut mdb[134..136], 0);
    BigEndian::write_u16(&mut mdb[136..138], (extents.len() / 512) as u16);
    BigEndian::write_u32(&mut mdb[146..150], catalog.len() as u32);
    BigEndian::write_u16(&mut mdb[150..152], 1);
    BigEndian::write_u16(&mut mdb[152..154], catalog_blocks);
    image
}

/// Classic HFS wrapper whose embedded volume is the fixture HFS+ volume.
/// Returns the image and the byte offset of the embedded volume.
pub fn wrapped_hfsplus_volume() -> (Vec<u8>, u64) {
    let inner = hfsplus_volume(&HfsPlusOptions::default());
    let alloc_start: u16 = 16;
    let embed_start: u16 = 1;
    let offset = alloc_start as u64 * 512 + embed_start as u64 * BLOCK_SIZE as u64;
    let mut image = vec![0u8; offset as usize];
    image.extend_from_slice(&inner);

    let mdb = &mut image[1024..1536];
    BigEndian::write_u16(&mut mdb[0..2], 0x4244);
    BigEndian::write_u16(&mut mdb[14..16], 3);
    BigEndian::write_u16(&mut mdb[18..20], (TOTAL_BLOCKS + 1) as u16);
    BigEndian::write_u32(&mut mdb[20..24], BLOCK_SIZE);
    BigEndian::write_u16(&mut mdb[28..30], alloc_start);
    mdb[36] = 7;
    mdb[37..44].copy_from_slice(b"Wrapper");
    BigEndian::write_u16(&mut mdb[124..126], 0x482B);
    BigEndian::write_u16(&mut mdb[126..128], embed_start);
    BigEndian::write_u16(&mut mdb[128..130], TOTAL_BLOCKS as u16);
    (image, offset)
}

// ============================================================================
// Partition maps
// ============================================================================

/// MBR disk with one 0xAF partition at `start_lba` holding `volume`.
pub fn mbr_disk(start_lba: u32, volume: &[u8]) -> Vec<u8> {
    let sectors = volume.len().div_ceil(512) as u32;
    let mut disk = vec![0u8; (start_lba + sectors) as usize * 512];
    let entry = &mut disk[446..462];
    entry[4] = 0xAF;
    LittleEndian::write_u32(&mut entry[8..12], start_lba);
    LittleEndian::write_u32(&mut entry[12..16], sectors);
    disk[510] = 0x55;
    disk[511] = 0xAA;
    let at = start_lba as usize * 512;
    disk[at..at + volume.len()].copy_from_slice(volume);
    disk
}

fn apm_entry(map_entries: u32, start: u32, count: u32, name: &str, kind: &str) -> Vec<u8> {
    let mut e = vec![0u8; 512];
    BigEndian::write_u16(&mut e[0..2], 0x504D);
    BigEndian::write_u32(&mut e[4..8], map_entries);
    BigEndian::write_u32(&mut e[8..12], start);
    BigEndian::write_u32(&mut e[12..16], count);
    e[16..16 + name.len()].copy_from_slice(name.as_bytes());
    e[48..48 + kind.len()].copy_from_slice(kind.as_bytes());
    BigEndian::write_u32(&mut e[84..88], count);
    e
}

/// Apple Partition Map disk: the map itself, then `Apple_HFS` at block 64.
pub fn apm_disk(volume: &[u8]) -> Vec<u8> {
    let blocks = volume.len().div_ceil(512) as u32;
    let mut disk = vec![0u8; (64 + blocks) as usize * 512];
    BigEndian::write_u16(&mut disk[0..2], 0x4552);
    BigEndian::write_u16(&mut disk[2..4], 512);
    BigEndian::write_u32(&mut disk[4..8], 64 + blocks);
    disk[512..1024].copy_from_slice(&apm_entry(2, 1, 63, "Apple", "Apple_partition_map"));
    disk[1024..1536].copy_from_slice(&apm_entry(2, 64, blocks, "Classic", "Apple_HFS"));
    disk[64 * 512..64 * 512 + volume.len()].copy_from_slice(volume);
    disk
}
