//! Fork data stream: the logical bytes of a fork, read through its extents.

use std::io::{self, Read, Seek, SeekFrom};

use super::extents::ExtentDescriptor;

/// `Read + Seek` view of one fork.
///
/// Extent `start_block` values are allocation blocks counted from
/// `base_offset`, the byte position of allocation block 0.
pub struct ForkStream<R> {
    inner: R,
    base_offset: u64,
    block_size: u64,
    logical_size: u64,
    extents: Vec<ExtentDescriptor>,
    /// Logical byte offset at which each extent begins.
    starts: Vec<u64>,
    position: u64,
}

impl<R: Read + Seek> ForkStream<R> {
    pub fn new(
        inner: R,
        base_offset: u64,
        block_size: u32,
        logical_size: u64,
        extents: Vec<ExtentDescriptor>,
    ) -> Self {
        let block_size = block_size as u64;
        let mut starts = Vec::with_capacity(extents.len());
        let mut acc = 0u64;
        for e in &extents {
            starts.push(acc);
            acc += e.block_count as u64 * block_size;
        }
        ForkStream {
            inner,
            base_offset,
            block_size,
            logical_size,
            extents,
            starts,
            position: 0,
        }
    }

    /// Logical fork size in bytes.
    pub fn len(&self) -> u64 {
        self.logical_size
    }

    pub fn is_empty(&self) -> bool {
        self.logical_size == 0
    }

    pub fn extents(&self) -> &[ExtentDescriptor] {
        &self.extents
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Physical offset of logical `pos` and the bytes left in its extent.
    fn locate(&self, pos: u64) -> Option<(u64, u64)> {
        let idx = self.starts.partition_point(|&s| s <= pos).checked_sub(1)?;
        let ext = &self.extents[idx];
        let extent_len = ext.block_count as u64 * self.block_size;
        let within = pos - self.starts[idx];
        if within >= extent_len {
            return None;
        }
        let physical = self.base_offset + ext.start_block as u64 * self.block_size + within;
        Some((physical, extent_len - within))
    }
}

impl<R: Read + Seek> Read for ForkStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.logical_size {
            return Ok(0);
        }
        let Some((physical, in_extent)) = self.locate(self.position) else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "fork extents end before logical offset {} of {}",
                    self.position, self.logical_size
                ),
            ));
        };
        let want = (buf.len() as u64)
            .min(in_extent)
            .min(self.logical_size - self.position) as usize;
        self.inner.seek(SeekFrom::Start(physical))?;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "backing stream ended at physical offset {physical} ({} of {} fork bytes read)",
                    self.position, self.logical_size
                ),
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for ForkStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = crate::io::resolve_seek(pos, self.position, self.logical_size)?;
        Ok(self.position)
    }
}
