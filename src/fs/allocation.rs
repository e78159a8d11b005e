//! Allocation bitmap view: one bit per allocation block, most significant
//! bit first, set when the block is in use.

use log::debug;
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};

use super::extents::ExtentDescriptor;
use crate::error::{HfsError, Result};

const SCAN_CHUNK_SIZE: usize = 128 * 1024;

/// Result of a scan that can be stopped early. A cancelled scan still
/// carries what it had counted so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanOutcome<T> {
    Completed(T),
    Cancelled(T),
}

impl<T> ScanOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanOutcome::Cancelled(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            ScanOutcome::Completed(v) | ScanOutcome::Cancelled(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ScanOutcome<U> {
        match self {
            ScanOutcome::Completed(v) => ScanOutcome::Completed(f(v)),
            ScanOutcome::Cancelled(v) => ScanOutcome::Cancelled(f(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockCounts {
    pub free: u64,
    pub used: u64,
    pub total: u64,
}

pub struct AllocationFile<R> {
    bitmap: R,
    total_blocks: u32,
    block_size: u32,
    max_extent_blocks: u32,
}

impl<R: Read + Seek> AllocationFile<R> {
    /// `bitmap` must start at the bitmap's first byte. `max_extent_blocks`
    /// is the widest block count an extent descriptor can hold (0xFFFF on
    /// classic HFS).
    pub fn new(bitmap: R, total_blocks: u32, block_size: u32, max_extent_blocks: u32) -> Self {
        AllocationFile {
            bitmap,
            total_blocks,
            block_size,
            max_extent_blocks,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn bitmap_len(&self) -> u64 {
        (self.total_blocks as u64).div_ceil(8)
    }

    pub fn is_block_used(&mut self, block: u32) -> Result<bool> {
        if block >= self.total_blocks {
            return Err(HfsError::OutOfRange(format!(
                "block {block} beyond {} total blocks",
                self.total_blocks
            )));
        }
        let mut byte = [0u8; 1];
        self.bitmap.seek(SeekFrom::Start(block as u64 / 8))?;
        self.bitmap.read_exact(&mut byte)?;
        Ok(byte[0] & (0x80 >> (block % 8)) != 0)
    }

    /// Visit each bitmap chunk in order; `visit` returns `false` to stop.
    fn for_each_chunk(&mut self, mut visit: impl FnMut(u64, &[u8]) -> bool) -> Result<()> {
        let len = self.bitmap_len();
        let mut buf = vec![0u8; SCAN_CHUNK_SIZE];
        let mut offset = 0u64;
        self.bitmap.seek(SeekFrom::Start(0))?;
        while offset < len {
            let n = (len - offset).min(SCAN_CHUNK_SIZE as u64) as usize;
            self.bitmap.read_exact(&mut buf[..n])?;
            if !visit(offset * 8, &buf[..n]) {
                break;
            }
            offset += n as u64;
        }
        Ok(())
    }

    /// Count free and used blocks. `stop` is polled between bitmap bytes.
    pub fn count_blocks(&mut self, stop: &AtomicBool) -> Result<ScanOutcome<BlockCounts>> {
        let total = self.total_blocks as u64;
        let mut counts = BlockCounts {
            total,
            ..BlockCounts::default()
        };
        let mut cancelled = false;
        self.for_each_chunk(|first_block, chunk| {
            for (i, &byte) in chunk.iter().enumerate() {
                if stop.load(Ordering::Relaxed) {
                    cancelled = true;
                    return false;
                }
                let block = first_block + i as u64 * 8;
                let valid = (total - block).min(8) as u32;
                let mask = if valid == 8 { 0xFF } else { 0xFFu8 << (8 - valid) };
                let used = (byte & mask).count_ones() as u64;
                counts.used += used;
                counts.free += valid as u64 - used;
            }
            true
        })?;
        if cancelled {
            debug!("block count cancelled after {} blocks", counts.used + counts.free);
            return Ok(ScanOutcome::Cancelled(counts));
        }
        Ok(ScanOutcome::Completed(counts))
    }

    /// Every run of free blocks as `(start, count)`.
    pub fn free_regions(&mut self) -> Result<Vec<ExtentDescriptor>> {
        let total = self.total_blocks as u64;
        let mut regions = Vec::new();
        let mut run_start: Option<u64> = None;
        self.for_each_chunk(|first_block, chunk| {
            for (i, &byte) in chunk.iter().enumerate() {
                for bit in 0..8u64 {
                    let block = first_block + i as u64 * 8 + bit;
                    if block >= total {
                        break;
                    }
                    let used = byte & (0x80 >> bit) != 0;
                    match (used, run_start) {
                        (false, None) => run_start = Some(block),
                        (true, Some(start)) => {
                            regions.push(ExtentDescriptor::new(start as u32, (block - start) as u32));
                            run_start = None;
                        }
                        _ => {}
                    }
                }
            }
            true
        })?;
        if let Some(start) = run_start {
            regions.push(ExtentDescriptor::new(start as u32, (total - start) as u32));
        }
        Ok(regions)
    }

    /// Best-fit placement of `byte_size` bytes. Takes the smallest free run
    /// that holds the remainder; failing that, the largest run, and repeats.
    /// `None` when the volume lacks enough free blocks.
    pub fn find_free_space(&mut self, byte_size: u64) -> Result<Option<Vec<ExtentDescriptor>>> {
        if self.block_size == 0 {
            return Err(HfsError::InvalidArgument("block size of zero".into()));
        }
        let needed = byte_size.div_ceil(self.block_size as u64);
        if needed > self.total_blocks as u64 {
            return Ok(None);
        }
        if needed == 0 {
            return Ok(Some(Vec::new()));
        }

        let mut regions = self.free_regions()?;
        let free: u64 = regions.iter().map(|r| r.block_count as u64).sum();
        if free < needed {
            return Ok(None);
        }

        let mut remaining = needed;
        let mut result = Vec::new();
        while remaining > 0 {
            let fits = regions
                .iter()
                .enumerate()
                .filter(|(_, r)| r.block_count as u64 >= remaining)
                .min_by_key(|(_, r)| r.block_count)
                .map(|(i, _)| i);
            if let Some(i) = fits {
                let r = regions[i];
                self.push_run(&mut result, r.start_block, remaining)?;
                remaining = 0;
            } else {
                let Some(i) = regions
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, r)| r.block_count)
                    .map(|(i, _)| i)
                else {
                    return Ok(None);
                };
                let r = regions.swap_remove(i);
                self.push_run(&mut result, r.start_block, r.block_count as u64)?;
                remaining -= r.block_count as u64;
            }
        }
        Ok(Some(result))
    }

    /// Split a run into descriptors no wider than the format allows.
    fn push_run(&self, out: &mut Vec<ExtentDescriptor>, start: u32, count: u64) -> Result<()> {
        let max = self.max_extent_blocks.max(1) as u64;
        let mut start = start as u64;
        let mut left = count;
        while left > 0 {
            let n = left.min(max);
            let start32 = u32::try_from(start)
                .map_err(|_| HfsError::OutOfRange(format!("start block {start}")))?;
            out.push(ExtentDescriptor::new(start32, n as u32));
            start += n;
            left -= n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Bitmap from a string of '1' (used) and '0' (free), MSB first.
    fn bitmap(bits: &str) -> (Cursor<Vec<u8>>, u32) {
        let bits: Vec<bool> = bits.chars().filter(|c| *c != ' ').map(|c| c == '1').collect();
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, used) in bits.iter().enumerate() {
            if *used {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        (Cursor::new(bytes), bits.len() as u32)
    }

    fn view(bits: &str) -> AllocationFile<Cursor<Vec<u8>>> {
        let (c, total) = bitmap(bits);
        AllocationFile::new(c, total, 512, u32::MAX)
    }

    #[test]
    fn test_is_block_used_msb_first() {
        let mut alloc = view("1000 0001 01");
        assert!(alloc.is_block_used(0).unwrap());
        assert!(!alloc.is_block_used(1).unwrap());
        assert!(alloc.is_block_used(7).unwrap());
        assert!(alloc.is_block_used(9).unwrap());
        assert!(matches!(alloc.is_block_used(10), Err(HfsError::OutOfRange(_))));
    }

    #[test]
    fn test_count_blocks_ignores_padding_bits() {
        let (mut c, _) = bitmap("1111 1111 11");
        // Padding bits past block 10 are set on disk
        c.get_mut()[1] = 0xFF;
        let mut alloc = AllocationFile::new(c, 10, 512, u32::MAX);
        let stop = AtomicBool::new(false);
        let counts = alloc.count_blocks(&stop).unwrap();
        assert_eq!(
            counts,
            ScanOutcome::Completed(BlockCounts {
                free: 0,
                used: 10,
                total: 10
            })
        );
    }

    #[test]
    fn test_count_blocks_cancelled() {
        let mut alloc = view("1010 1010");
        let stop = AtomicBool::new(true);
        let outcome = alloc.count_blocks(&stop).unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.into_inner().used, 0);
    }

    #[test]
    fn test_free_regions_include_trailing_run() {
        let mut alloc = view("0011 0100 0000");
        let regions = alloc.free_regions().unwrap();
        assert_eq!(
            regions,
            vec![
                ExtentDescriptor::new(0, 2),
                ExtentDescriptor::new(4, 1),
                ExtentDescriptor::new(6, 6)
            ]
        );
    }

    #[test]
    fn test_best_fit_prefers_smallest_sufficient_run() {
        // Free runs: 1..4 (3 blocks), 6..8 (2 blocks), 9..16 (7 blocks)
        let mut alloc = view("1000 1100 1000 0000");
        let got = alloc.find_free_space(2 * 512).unwrap().unwrap();
        assert_eq!(got, vec![ExtentDescriptor::new(6, 2)]);
        let got = alloc.find_free_space(3 * 512 - 100).unwrap().unwrap();
        assert_eq!(got, vec![ExtentDescriptor::new(1, 3)]);
    }

    #[test]
    fn test_best_fit_splits_over_largest_runs() {
        // Free runs of 3, 2 and 7 blocks; 10 blocks need the 7 then the 3
        let mut alloc = view("1000 1100 1000 0000");
        let got = alloc.find_free_space(10 * 512).unwrap().unwrap();
        assert_eq!(
            got,
            vec![ExtentDescriptor::new(9, 7), ExtentDescriptor::new(1, 3)]
        );
        assert!(alloc.find_free_space(13 * 512).unwrap().is_none());
        assert_eq!(alloc.find_free_space(0).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_run_starting_at_block_zero() {
        let mut alloc = view("0000 1111");
        assert_eq!(
            alloc.find_free_space(4 * 512).unwrap(),
            Some(vec![ExtentDescriptor::new(0, 4)])
        );
    }

    #[test]
    fn test_descriptor_width_limit() {
        let (c, total) = bitmap("0000 0000");
        let mut alloc = AllocationFile::new(c, total, 512, 3);
        let got = alloc.find_free_space(8 * 512).unwrap().unwrap();
        assert_eq!(
            got,
            vec![
                ExtentDescriptor::new(0, 3),
                ExtentDescriptor::new(3, 3),
                ExtentDescriptor::new(6, 2)
            ]
        );
    }
}
