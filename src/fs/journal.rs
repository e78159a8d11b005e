//! HFS+ journal recognition. The journal is located and described, never
//! replayed.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, warn};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::error::{HfsError, Result};

pub const JOURNAL_HEADER_MAGIC: u32 = 0x4A4E_4C78; // "JNLx"
pub const JOURNAL_HEADER_ENDIAN: u32 = 0x1234_5678;

const JIB_JOURNAL_IN_FS: u32 = 0x1;
const JIB_JOURNAL_ON_OTHER_DEVICE: u32 = 0x2;
const JIB_JOURNAL_NEEDS_INIT: u32 = 0x4;

/// Journal info block, found at `journal_info_block` × block size.
#[derive(Debug, Clone, Serialize)]
pub struct JournalInfoBlock {
    pub flags: u32,
    pub device_signature: [u32; 8],
    /// Byte offset of the journal from the volume start.
    pub offset: u64,
    pub size: u64,
}

impl JournalInfoBlock {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 52 {
            return Err(HfsError::InvalidVolumeHeader(
                "journal info block too short".into(),
            ));
        }
        let mut device_signature = [0u32; 8];
        for (i, v) in device_signature.iter_mut().enumerate() {
            *v = BigEndian::read_u32(&data[4 + i * 4..8 + i * 4]);
        }
        Ok(JournalInfoBlock {
            flags: BigEndian::read_u32(&data[0..4]),
            device_signature,
            offset: BigEndian::read_u64(&data[36..44]),
            size: BigEndian::read_u64(&data[44..52]),
        })
    }

    pub fn is_in_filesystem(&self) -> bool {
        self.flags & JIB_JOURNAL_IN_FS != 0
    }

    pub fn is_on_other_device(&self) -> bool {
        self.flags & JIB_JOURNAL_ON_OTHER_DEVICE != 0
    }

    pub fn needs_init(&self) -> bool {
        self.flags & JIB_JOURNAL_NEEDS_INIT != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JournalEndian {
    Big,
    Little,
}

/// Header at the start of the journal buffer.
#[derive(Debug, Clone, Serialize)]
pub struct JournalHeader {
    pub endian: JournalEndian,
    pub magic: u32,
    pub start: u64,
    pub end: u64,
    pub size: u64,
    pub block_list_header_size: u32,
    pub checksum: u32,
    pub journal_header_size: u32,
}

impl JournalHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 44 {
            return Err(HfsError::InvalidVolumeHeader("journal header too short".into()));
        }
        let endian = if BigEndian::read_u32(&data[4..8]) == JOURNAL_HEADER_ENDIAN {
            JournalEndian::Big
        } else if LittleEndian::read_u32(&data[4..8]) == JOURNAL_HEADER_ENDIAN {
            JournalEndian::Little
        } else {
            return Err(HfsError::InvalidVolumeHeader(format!(
                "journal endian marker {:02X?} not recognized",
                &data[4..8]
            )));
        };
        let header = match endian {
            JournalEndian::Big => Self::parse_with::<BigEndian>(data, endian),
            JournalEndian::Little => Self::parse_with::<LittleEndian>(data, endian),
        };
        if header.magic != JOURNAL_HEADER_MAGIC {
            return Err(HfsError::InvalidVolumeHeader(format!(
                "bad journal magic 0x{:08X}",
                header.magic
            )));
        }
        Ok(header)
    }

    fn parse_with<B: ByteOrder>(data: &[u8], endian: JournalEndian) -> Self {
        JournalHeader {
            endian,
            magic: B::read_u32(&data[0..4]),
            start: B::read_u64(&data[8..16]),
            end: B::read_u64(&data[16..24]),
            size: B::read_u64(&data[24..32]),
            block_list_header_size: B::read_u32(&data[32..36]),
            checksum: B::read_u32(&data[36..40]),
            journal_header_size: B::read_u32(&data[40..44]),
        }
    }

    /// No transactions are pending.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A located journal.
#[derive(Debug, Clone, Serialize)]
pub struct Journal {
    pub info: JournalInfoBlock,
    /// `None` when the journal lives on another device.
    pub header: Option<JournalHeader>,
}

impl Journal {
    /// Read the info block and, for an in-filesystem journal, its header.
    /// Offsets are relative to `volume_offset`.
    pub fn read<R: Read + Seek + ?Sized>(
        reader: &mut R,
        volume_offset: u64,
        info_block: u32,
        block_size: u32,
    ) -> Result<Self> {
        let jib_offset = volume_offset + info_block as u64 * block_size as u64;
        let jib = crate::io::read_vec_at(reader, jib_offset, 52)?;
        let info = JournalInfoBlock::parse(&jib)?;
        debug!(
            "journal info block at {jib_offset}: flags 0x{:X}, offset {}, size {}",
            info.flags, info.offset, info.size
        );
        if info.is_on_other_device() || !info.is_in_filesystem() {
            warn!("journal is not stored in this volume");
            return Ok(Journal { info, header: None });
        }
        let raw = crate::io::read_vec_at(reader, volume_offset + info.offset, 44)?;
        let header = JournalHeader::parse(&raw)?;
        Ok(Journal {
            info,
            header: Some(header),
        })
    }

    /// Raw journal buffer. `None` for external journals.
    pub fn read_journal_data<R: Read + Seek + ?Sized>(
        &self,
        reader: &mut R,
        volume_offset: u64,
    ) -> Result<Option<Vec<u8>>> {
        if self.header.is_none() {
            return Ok(None);
        }
        let len = crate::io::stream_len(reader)?;
        let start = volume_offset + self.info.offset;
        if start.checked_add(self.info.size).map_or(true, |end| end > len) {
            return Err(HfsError::OutOfRange(format!(
                "journal of {} bytes at {start} extends past the stream end {len}",
                self.info.size
            )));
        }
        let size = usize::try_from(self.info.size)
            .map_err(|_| HfsError::OutOfRange(format!("journal size {}", self.info.size)))?;
        Ok(Some(crate::io::read_vec_at(reader, start, size)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_volume(little_endian: bool, start: u64, end: u64) -> Vec<u8> {
        let mut img = vec![0u8; 16 * 512];
        // info block at block 2 (block size 512)
        let jib = &mut img[1024..1076];
        BigEndian::write_u32(&mut jib[0..4], JIB_JOURNAL_IN_FS);
        BigEndian::write_u64(&mut jib[36..44], 4096);
        BigEndian::write_u64(&mut jib[44..52], 2048);
        let hdr = &mut img[4096..4140];
        if little_endian {
            LittleEndian::write_u32(&mut hdr[0..4], JOURNAL_HEADER_MAGIC);
            LittleEndian::write_u32(&mut hdr[4..8], JOURNAL_HEADER_ENDIAN);
            LittleEndian::write_u64(&mut hdr[8..16], start);
            LittleEndian::write_u64(&mut hdr[16..24], end);
            LittleEndian::write_u64(&mut hdr[24..32], 2048);
            LittleEndian::write_u32(&mut hdr[40..44], 512);
        } else {
            BigEndian::write_u32(&mut hdr[0..4], JOURNAL_HEADER_MAGIC);
            BigEndian::write_u32(&mut hdr[4..8], JOURNAL_HEADER_ENDIAN);
            BigEndian::write_u64(&mut hdr[8..16], start);
            BigEndian::write_u64(&mut hdr[16..24], end);
            BigEndian::write_u64(&mut hdr[24..32], 2048);
            BigEndian::write_u32(&mut hdr[40..44], 512);
        }
        img
    }

    #[test]
    fn test_little_endian_journal() {
        let mut cursor = Cursor::new(make_volume(true, 512, 512));
        let journal = Journal::read(&mut cursor, 0, 2, 512).unwrap();
        let header = journal.header.as_ref().unwrap();
        assert_eq!(header.endian, JournalEndian::Little);
        assert_eq!(header.size, 2048);
        assert!(header.is_empty());
        let data = journal.read_journal_data(&mut cursor, 0).unwrap().unwrap();
        assert_eq!(data.len(), 2048);
    }

    #[test]
    fn test_big_endian_journal_with_pending_transactions() {
        let mut cursor = Cursor::new(make_volume(false, 512, 1024));
        let journal = Journal::read(&mut cursor, 0, 2, 512).unwrap();
        let header = journal.header.unwrap();
        assert_eq!(header.endian, JournalEndian::Big);
        assert!(!header.is_empty());
        assert_eq!(header.journal_header_size, 512);
    }

    #[test]
    fn test_bad_magic() {
        let mut img = make_volume(false, 0, 0);
        img[4096] = 0;
        let mut cursor = Cursor::new(img);
        assert!(Journal::read(&mut cursor, 0, 2, 512).is_err());
    }

    #[test]
    fn test_journal_past_stream_end() {
        let mut img = make_volume(false, 0, 0);
        BigEndian::write_u64(&mut img[1024 + 44..1024 + 52], 1 << 20);
        let mut cursor = Cursor::new(img);
        let journal = Journal::read(&mut cursor, 0, 2, 512).unwrap();
        assert!(matches!(
            journal.read_journal_data(&mut cursor, 0),
            Err(HfsError::OutOfRange(_))
        ));
    }
}
