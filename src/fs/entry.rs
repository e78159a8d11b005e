use serde::Serialize;

/// A file or folder as presented to a browser.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub entry_type: EntryType,
    /// Data fork size for files.
    pub size: u64,
    /// Catalog node ID.
    pub location: u64,
    /// Human-readable modification date string.
    pub modified: Option<String>,
    pub type_code: Option<String>,
    pub creator_code: Option<String>,
    pub resource_fork_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum EntryType {
    File,
    Directory,
}

impl FileEntry {
    pub fn root() -> Self {
        Self::new_directory("/".into(), "/".into(), 0)
    }

    pub fn new_directory(name: String, path: String, location: u64) -> Self {
        Self {
            name,
            path,
            entry_type: EntryType::Directory,
            size: 0,
            location,
            modified: None,
            type_code: None,
            creator_code: None,
            resource_fork_size: 0,
        }
    }

    pub fn new_file(name: String, path: String, size: u64, location: u64) -> Self {
        Self {
            name,
            path,
            entry_type: EntryType::File,
            size,
            location,
            modified: None,
            type_code: None,
            creator_code: None,
            resource_fork_size: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn size_string(&self) -> String {
        if self.is_directory() {
            return String::new();
        }
        crate::partition::format_size(self.size)
    }
}
