//! Byte-level plumbing shared by the partition and filesystem layers.

pub mod block_cache;
pub mod decode;
pub mod substream;
pub mod sync;

pub use block_cache::BlockCache;
pub use substream::Substream;
pub use sync::SyncStream;

use std::io::{self, Read, Seek, SeekFrom};

/// Blanket trait for the backing streams every layer reads from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Seek to `offset` and fill `buf` completely.
pub fn read_exact_at<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    buf: &mut [u8],
) -> io::Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(buf)
}

/// Read `len` bytes at `offset` into a fresh buffer.
pub fn read_vec_at<R: Read + Seek + ?Sized>(
    reader: &mut R,
    offset: u64,
    len: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact_at(reader, offset, &mut buf)?;
    Ok(buf)
}

/// Total length of a seekable stream. The current position is restored.
pub fn stream_len<R: Seek + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let pos = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    if pos != end {
        reader.seek(SeekFrom::Start(pos))?;
    }
    Ok(end)
}

/// Resolve a `SeekFrom` against a position and a length, rejecting
/// positions before the start.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> io::Result<u64> {
    let new_pos = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::End(offset) => len as i128 + offset as i128,
        SeekFrom::Current(offset) => current as i128 + offset as i128,
    };
    if new_pos < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek to negative position",
        ));
    }
    u64::try_from(new_pos)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek position overflow"))
}
