use std::io::Write;

use super::entry::FileEntry;
use crate::error::Result;

/// Trait for browsing a filesystem within a partition.
pub trait Filesystem: Send {
    /// Get the root directory entry.
    fn root(&mut self) -> Result<FileEntry>;

    /// List the contents of a directory.
    fn list_directory(&mut self, entry: &FileEntry) -> Result<Vec<FileEntry>>;

    /// Read file contents (up to `max_bytes`).
    fn read_file(&mut self, entry: &FileEntry, max_bytes: usize) -> Result<Vec<u8>>;

    /// Volume label, if available.
    fn volume_label(&self) -> Option<&str>;

    /// Filesystem type name (e.g., "HFS", "HFS+").
    fn fs_type(&self) -> &str;

    /// Total filesystem size in bytes.
    fn total_size(&self) -> u64;

    /// Used space in bytes.
    fn used_size(&self) -> u64;

    /// Stream file data to a writer. Returns the number of bytes written.
    /// Default delegates to `read_file(entry, usize::MAX)`.
    fn write_file_to(&mut self, entry: &FileEntry, writer: &mut dyn Write) -> Result<u64> {
        let data = self.read_file(entry, usize::MAX)?;
        writer.write_all(&data)?;
        Ok(data.len() as u64)
    }

    /// Write resource fork data to a writer. Returns the number of bytes written.
    /// Default returns `Ok(0)` (no resource fork).
    fn write_resource_fork_to(&mut self, _entry: &FileEntry, _writer: &mut dyn Write) -> Result<u64> {
        Ok(0)
    }

    /// Returns the resource fork size for a file entry. Default returns `0`.
    fn resource_fork_size(&mut self, _entry: &FileEntry) -> u64 {
        0
    }
}
