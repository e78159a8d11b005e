//! Read-through block cache over a seekable stream.
//!
//! The stream is split into fixed-size blocks. Each read pulls whole blocks
//! from the inner stream and keeps the most recently used ones in memory, so
//! repeated B-tree node and bitmap reads do not go back to the device.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Seek, SeekFrom};

use log::{debug, trace};

use super::{resolve_seek, stream_len};

pub struct BlockCache<R> {
    inner: R,
    block_size: u64,
    max_blocks: usize,
    total_size: u64,
    position: u64,
    blocks: HashMap<u64, Vec<u8>>,
    /// Block indices, least recently used at the front.
    recency: VecDeque<u64>,
    hits: u64,
    misses: u64,
    enabled: bool,
}

impl<R: Read + Seek> BlockCache<R> {
    pub fn new(mut inner: R, block_size: usize, max_blocks: usize) -> io::Result<Self> {
        if block_size == 0 || max_blocks == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cache block size and block count must be non-zero",
            ));
        }
        let total_size = stream_len(&mut inner)?;
        Ok(Self {
            inner,
            block_size: block_size as u64,
            max_blocks,
            total_size,
            position: 0,
            blocks: HashMap::new(),
            recency: VecDeque::with_capacity(max_blocks),
            hits: 0,
            misses: 0,
            enabled: true,
        })
    }

    pub fn cached_block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn caching on or off. While off, reads go straight to the inner
    /// stream and nothing is kept.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.log_stats();
            self.blocks.clear();
            self.recency.clear();
        }
        self.enabled = enabled;
    }

    pub fn into_inner(self) -> R {
        self.log_stats();
        self.inner
    }

    fn log_stats(&self) {
        if self.hits + self.misses > 0 {
            debug!(
                "block cache: {} hits, {} misses, {} blocks resident",
                self.hits,
                self.misses,
                self.blocks.len()
            );
        }
    }

    fn touch(&mut self, block_index: u64) {
        if let Some(pos) = self.recency.iter().position(|&b| b == block_index) {
            self.recency.remove(pos);
        }
        self.recency.push_back(block_index);
    }

    fn load_block(&mut self, block_index: u64) -> io::Result<()> {
        if self.blocks.contains_key(&block_index) {
            self.hits += 1;
            self.touch(block_index);
            return Ok(());
        }
        self.misses += 1;

        let start = block_index * self.block_size;
        let len = self.block_size.min(self.total_size.saturating_sub(start)) as usize;
        let mut data = vec![0u8; len];
        self.inner.seek(SeekFrom::Start(start))?;
        self.inner.read_exact(&mut data)?;

        while self.blocks.len() >= self.max_blocks {
            match self.recency.pop_front() {
                Some(evicted) => {
                    trace!("block cache: evicting block {evicted}");
                    self.blocks.remove(&evicted);
                }
                None => break,
            }
        }
        self.blocks.insert(block_index, data);
        self.recency.push_back(block_index);
        Ok(())
    }
}

impl<R: Read + Seek> Read for BlockCache<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.enabled {
            if self.position >= self.total_size {
                return Ok(0);
            }
            self.inner.seek(SeekFrom::Start(self.position))?;
            let n = self.inner.read(buf)?;
            self.position += n as u64;
            return Ok(n);
        }
        let mut total_read = 0;
        while total_read < buf.len() && self.position < self.total_size {
            let block_index = self.position / self.block_size;
            let offset_in_block = (self.position % self.block_size) as usize;

            self.load_block(block_index)?;
            let block_data = match self.blocks.get(&block_index) {
                Some(data) => data,
                None => return Err(io::Error::other("block vanished from cache")),
            };
            if offset_in_block >= block_data.len() {
                break;
            }

            let available = block_data.len() - offset_in_block;
            let to_copy = available.min(buf.len() - total_read);
            buf[total_read..total_read + to_copy]
                .copy_from_slice(&block_data[offset_in_block..offset_in_block + to_copy]);

            total_read += to_copy;
            self.position += to_copy as u64;
        }
        Ok(total_read)
    }
}

impl<R: Read + Seek> Seek for BlockCache<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = resolve_seek(pos, self.position, self.total_size)?;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_reads_match_inner_stream() {
        let data = pattern(10_000);
        let mut cache = BlockCache::new(Cursor::new(data.clone()), 1024, 4).unwrap();
        cache.seek(SeekFrom::Start(1000)).unwrap();
        let mut buf = vec![0u8; 3000];
        cache.read_exact(&mut buf).unwrap();
        assert_eq!(buf, &data[1000..4000]);
    }

    #[test]
    fn test_short_last_block() {
        let data = pattern(2500);
        let mut cache = BlockCache::new(Cursor::new(data.clone()), 1024, 4).unwrap();
        let mut all = Vec::new();
        cache.read_to_end(&mut all).unwrap();
        assert_eq!(all, data);
    }

    #[test]
    fn test_lru_eviction_bounds_memory() {
        let data = pattern(8 * 512);
        let mut cache = BlockCache::new(Cursor::new(data), 512, 2).unwrap();
        let mut buf = [0u8; 1];
        for block in [0u64, 1, 2, 3] {
            cache.seek(SeekFrom::Start(block * 512)).unwrap();
            cache.read_exact(&mut buf).unwrap();
        }
        assert_eq!(cache.cached_block_count(), 2);
        assert_eq!(cache.misses(), 4);

        // Block 3 is resident, block 0 was evicted.
        cache.seek(SeekFrom::Start(3 * 512)).unwrap();
        cache.read_exact(&mut buf).unwrap();
        assert_eq!(cache.hits(), 1);
        cache.seek(SeekFrom::Start(0)).unwrap();
        cache.read_exact(&mut buf).unwrap();
        assert_eq!(cache.misses(), 5);
    }

    #[test]
    fn test_recently_used_block_survives() {
        let data = pattern(4 * 512);
        let mut cache = BlockCache::new(Cursor::new(data), 512, 2).unwrap();
        let mut buf = [0u8; 1];
        for block in [0u64, 1, 0, 2] {
            cache.seek(SeekFrom::Start(block * 512)).unwrap();
            cache.read_exact(&mut buf).unwrap();
        }
        // Block 1 was least recently used and got evicted; 0 is still cached.
        cache.seek(SeekFrom::Start(0)).unwrap();
        cache.read_exact(&mut buf).unwrap();
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn test_disabled_cache_passes_through() {
        let data = pattern(4 * 512);
        let mut cache = BlockCache::new(Cursor::new(data.clone()), 512, 2).unwrap();
        let mut buf = [0u8; 700];
        cache.read_exact(&mut buf).unwrap();
        assert_eq!(cache.cached_block_count(), 2);

        cache.set_enabled(false);
        assert_eq!(cache.cached_block_count(), 0);
        cache.seek(SeekFrom::Start(100)).unwrap();
        cache.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[100..800]);
        assert_eq!(cache.cached_block_count(), 0);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        assert!(BlockCache::new(Cursor::new(vec![0u8; 16]), 0, 4).is_err());
    }
}
