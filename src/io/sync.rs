use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use super::{resolve_seek, stream_len};

/// Shared handle to a single backing stream.
///
/// Every clone keeps its own position; each read locks the source, seeks to
/// that position and reads, so concurrent handles never observe each other's
/// seeks.
pub struct SyncStream<R> {
    source: Arc<Mutex<R>>,
    position: u64,
    length: u64,
}

impl<R: Read + Seek> SyncStream<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let length = stream_len(&mut inner)?;
        Ok(Self {
            source: Arc::new(Mutex::new(inner)),
            position: 0,
            length,
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<R> Clone for SyncStream<R> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            position: self.position,
            length: self.length,
        }
    }
}

impl<R: Read + Seek> Read for SyncStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.length || buf.is_empty() {
            return Ok(0);
        }
        let mut source = self
            .source
            .lock()
            .map_err(|e| io::Error::other(format!("stream lock poisoned: {e}")))?;
        source.seek(SeekFrom::Start(self.position))?;
        let n = source.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SyncStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = resolve_seek(pos, self.position, self.length)?;
        Ok(self.position)
    }
}
