use std::io::{self, Read, Seek, SeekFrom};

use super::resolve_seek;

/// A window of `length` bytes starting at `offset` in the inner stream.
/// Position 0 of the window maps to `offset`; reads stop at `length`.
pub struct Substream<R> {
    inner: R,
    offset: u64,
    length: u64,
    position: u64,
}

impl<R: Read + Seek> Substream<R> {
    pub fn new(inner: R, offset: u64, length: u64) -> Self {
        Self {
            inner,
            offset,
            length,
            position: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for Substream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.length || buf.is_empty() {
            return Ok(0);
        }
        let remaining = self.length - self.position;
        let to_read = (buf.len() as u64).min(remaining) as usize;
        self.inner
            .seek(SeekFrom::Start(self.offset + self.position))?;
        let n = self.inner.read(&mut buf[..to_read])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for Substream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = resolve_seek(pos, self.position, self.length)?;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_window_maps_offsets() {
        let data: Vec<u8> = (0u8..100).collect();
        let mut sub = Substream::new(Cursor::new(data), 20, 10);
        let mut buf = [0u8; 4];
        sub.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [20, 21, 22, 23]);

        sub.seek(SeekFrom::End(-2)).unwrap();
        let mut rest = Vec::new();
        sub.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![28, 29]);
    }

    #[test]
    fn test_reads_stop_at_length() {
        let mut sub = Substream::new(Cursor::new(vec![7u8; 64]), 8, 16);
        let mut all = Vec::new();
        sub.read_to_end(&mut all).unwrap();
        assert_eq!(all.len(), 16);
        sub.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(sub.read(&mut [0u8; 4]).unwrap(), 0);
    }
}
