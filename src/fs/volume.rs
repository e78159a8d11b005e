//! Volume handle tying headers, trees, bitmap and forks together.

use log::{debug, info, warn};
use std::io::{Read, Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use super::allocation::{AllocationFile, ScanOutcome};
use super::attributes::AttributesFile;
use super::btree::BTreeFile;
use super::catalog::{
    CatalogFile, CatalogFileRecord, CatalogFormat, CatalogLeafRecord, CatalogName,
    CatalogNodeId, CatalogRecord,
};
use super::entry::FileEntry;
use super::extents::{
    resolve_extents, ExtentDescriptor, ExtentKey, ExtentsFormat, ExtentsOverflowFile, ForkData,
    ForkType, OverflowLookup,
};
use super::filesystem::Filesystem;
use super::fork::ForkStream;
use super::journal::Journal;
use super::volume_header::{
    detect_volume_format, HfsMasterDirectoryBlock, VolumeFormat, VolumeHeader,
};
use crate::config::ReaderConfig;
use crate::error::{HfsError, Result};
use crate::io::{BlockCache, ReadSeek, Substream};

/// Fork stream over the volume's backing source.
pub type VolumeForkStream<'a, R> = ForkStream<&'a mut BlockCache<R>>;

/// Overflow lookup for the extents file itself, which has no overflow.
struct NoOverflow;

impl OverflowLookup for NoOverflow {
    fn overflow_extents(&mut self, _key: &ExtentKey) -> Result<Option<Vec<ExtentDescriptor>>> {
        Ok(None)
    }
}

/// An open HFS, HFS+ or HFSX volume.
pub struct HfsVolume<R: Read + Seek> {
    source: BlockCache<R>,
    volume_offset: u64,
    volume_length: u64,
    format: VolumeFormat,
    wrapper: Option<HfsMasterDirectoryBlock>,
    physical_block_size: u32,
    // Snapshot taken at open for the `&self` browse methods (label and
    // sizes). Everything else reads the header through `volume_header`.
    label: Option<String>,
    block_size: u32,
    total_blocks: u32,
    free_blocks: u32,
}

/// Open the HFS-family volume at `offset`.
///
/// A classic HFS wrapper around an embedded HFS+ volume opens the embedded
/// volume. `length` defaults to the rest of the stream. Returns `None` when
/// no HFS signature is present.
pub fn open_volume<R: Read + Seek>(
    mut reader: R,
    offset: u64,
    length: Option<u64>,
    config: &ReaderConfig,
) -> Result<Option<HfsVolume<R>>> {
    config.validate()?;
    let Some(detected) = detect_volume_format(&mut reader, offset)? else {
        return Ok(None);
    };
    let stream_len = crate::io::stream_len(&mut reader)?;
    let mut volume_offset = offset;
    let mut volume_length = length.unwrap_or_else(|| stream_len.saturating_sub(offset));
    let mut wrapper = None;

    if detected == VolumeFormat::WrappedHfsPlus {
        let VolumeHeader::Hfs(mdb) = VolumeHeader::read(&mut reader, offset)? else {
            return Err(HfsError::InvalidVolumeHeader("wrapper is not an MDB".into()));
        };
        volume_offset = offset + mdb.embedded_volume_offset(config.physical_block_size);
        volume_length = mdb.embedded_volume_length();
        match detect_volume_format(&mut reader, volume_offset)? {
            Some(VolumeFormat::HfsPlus) | Some(VolumeFormat::Hfsx) => {}
            other => {
                return Err(HfsError::InvalidVolumeHeader(format!(
                    "wrapper points at {other:?} instead of an HFS+ volume at {volume_offset}"
                )))
            }
        }
        info!(
            "HFS wrapper at {offset}: embedded HFS+ volume at {volume_offset}, {volume_length} bytes"
        );
        wrapper = Some(mdb);
    }

    let mut source = BlockCache::new(reader, config.cache.block_size, config.cache.block_count)?;
    source.set_enabled(config.cache.enabled);

    let header = VolumeHeader::read(&mut source, volume_offset)?;
    debug!(
        "{} volume at {volume_offset}: block size {}, {} blocks, {} free",
        detected.name(),
        header.allocation_block_size(),
        header.total_blocks(),
        header.free_blocks()
    );
    header.validate(Some(volume_length), config.physical_block_size)?;

    let mut volume = HfsVolume {
        source,
        volume_offset,
        volume_length,
        format: detected,
        wrapper,
        physical_block_size: config.physical_block_size,
        label: header.volume_name().map(str::to_string),
        block_size: header.allocation_block_size(),
        total_blocks: header.total_blocks(),
        free_blocks: header.free_blocks(),
    };
    if volume.label.is_none() {
        match volume.root_folder() {
            Ok(root) => volume.label = Some(root.key.name.to_string_lossy()),
            Err(e) => warn!("volume name unavailable: {e}"),
        }
    }
    Ok(Some(volume))
}

impl<R: Read + Seek> HfsVolume<R> {
    pub fn format(&self) -> VolumeFormat {
        self.format
    }

    /// MDB of the classic wrapper, for wrapped HFS+ volumes.
    pub fn wrapper(&self) -> Option<&HfsMasterDirectoryBlock> {
        self.wrapper.as_ref()
    }

    pub fn volume_offset(&self) -> u64 {
        self.volume_offset
    }

    pub fn volume_length(&self) -> u64 {
        self.volume_length
    }

    pub fn caching(&self) -> bool {
        self.source.is_enabled()
    }

    pub fn set_caching(&mut self, enabled: bool) {
        self.source.set_enabled(enabled);
    }

    /// Reads the header from the volume on every call.
    pub fn volume_header(&mut self) -> Result<VolumeHeader> {
        VolumeHeader::read(&mut self.source, self.volume_offset)
    }

    /// Byte position of allocation block 0.
    fn allocation_base(&self, header: &VolumeHeader) -> u64 {
        self.volume_offset + header.allocation_block_start() * self.physical_block_size as u64
    }

    fn extents_format(header: &VolumeHeader) -> ExtentsFormat {
        if header.is_hfs_plus() {
            ExtentsFormat::HfsPlus
        } else {
            ExtentsFormat::Hfs
        }
    }

    fn extents_file_for(
        &mut self,
        header: &VolumeHeader,
    ) -> Result<ExtentsOverflowFile<VolumeForkStream<'_, R>>> {
        let fork = header.extents_file().clone();
        let stream = self.open_fork_with(
            header,
            &fork,
            CatalogNodeId::EXTENTS_FILE,
            ForkType::Data,
            &mut NoOverflow,
        )?;
        Ok(ExtentsOverflowFile::new(stream, Self::extents_format(header)))
    }

    fn open_fork_with<L: OverflowLookup>(
        &mut self,
        header: &VolumeHeader,
        fork: &ForkData,
        file_id: CatalogNodeId,
        fork_type: ForkType,
        lookup: &mut L,
    ) -> Result<VolumeForkStream<'_, R>> {
        let block_size = header.allocation_block_size();
        let extents = resolve_extents(lookup, fork, file_id.0, fork_type, block_size)?;
        let base = self.allocation_base(header);
        Ok(ForkStream::new(
            &mut self.source,
            base,
            block_size,
            fork.logical_size,
            extents,
        ))
    }

    /// Resolve a fork's extents through the extents-overflow file.
    pub fn fork_extents(
        &mut self,
        header: &VolumeHeader,
        fork: &ForkData,
        file_id: CatalogNodeId,
        fork_type: ForkType,
    ) -> Result<Vec<ExtentDescriptor>> {
        let mut overflow = self.extents_file_for(header)?;
        resolve_extents(
            &mut overflow,
            fork,
            file_id.0,
            fork_type,
            header.allocation_block_size(),
        )
    }

    fn open_fork(
        &mut self,
        header: &VolumeHeader,
        fork: &ForkData,
        file_id: CatalogNodeId,
        fork_type: ForkType,
    ) -> Result<VolumeForkStream<'_, R>> {
        let extents = self.fork_extents(header, fork, file_id, fork_type)?;
        let base = self.allocation_base(header);
        Ok(ForkStream::new(
            &mut self.source,
            base,
            header.allocation_block_size(),
            fork.logical_size,
            extents,
        ))
    }

    pub fn extents_overflow_file(&mut self) -> Result<ExtentsOverflowFile<VolumeForkStream<'_, R>>> {
        let header = self.volume_header()?;
        self.extents_file_for(&header)
    }

    pub fn catalog_file(&mut self) -> Result<CatalogFile<VolumeForkStream<'_, R>>> {
        let header = self.volume_header()?;
        let fork = header.catalog_file().clone();
        let stream = self.open_fork(&header, &fork, CatalogNodeId::CATALOG_FILE, ForkType::Data)?;
        let provisional = if header.is_hfs_plus() {
            CatalogFormat::HfsPlus
        } else {
            CatalogFormat::Hfs
        };
        let mut tree = BTreeFile::new(stream, provisional);
        let tree_header = tree.header()?;
        let format = CatalogFormat::for_volume(header.is_hfs_plus(), &tree_header);
        Ok(CatalogFile::new(tree.into_inner(), format))
    }

    /// `None` on classic HFS and when the attributes fork is empty.
    pub fn attributes_file(&mut self) -> Result<Option<AttributesFile<VolumeForkStream<'_, R>>>> {
        let header = self.volume_header()?;
        let Some(fork) = header.attributes_file().cloned() else {
            return Ok(None);
        };
        let stream = self.open_fork(&header, &fork, CatalogNodeId::ATTRIBUTES_FILE, ForkType::Data)?;
        Ok(Some(AttributesFile::new(stream)))
    }

    /// `None` unless the volume is journaled.
    pub fn journal(&mut self) -> Result<Option<Journal>> {
        let header = self.volume_header()?;
        let Some(info_block) = header.journal_info_block() else {
            return Ok(None);
        };
        Journal::read(
            &mut self.source,
            self.volume_offset,
            info_block,
            header.allocation_block_size(),
        )
        .map(Some)
    }

    /// Raw journal buffer, or `None` if there is no in-volume journal.
    pub fn journal_data(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(journal) = self.journal()? else {
            return Ok(None);
        };
        journal.read_journal_data(&mut self.source, self.volume_offset)
    }

    /// Bitmap view: the allocation file on HFS+, the volume bitmap on HFS.
    pub fn allocation_file(&mut self) -> Result<AllocationFile<Box<dyn ReadSeek + '_>>> {
        let header = self.volume_header()?;
        let total = header.total_blocks();
        let block_size = header.allocation_block_size();
        match &header {
            VolumeHeader::HfsPlus(h) => {
                let fork = h.allocation_file.clone();
                let stream =
                    self.open_fork(&header, &fork, CatalogNodeId::ALLOCATION_FILE, ForkType::Data)?;
                Ok(AllocationFile::new(Box::new(stream), total, block_size, u32::MAX))
            }
            VolumeHeader::Hfs(mdb) => {
                let offset = self.volume_offset + mdb.bitmap_offset(self.physical_block_size);
                let len = (total as u64).div_ceil(8);
                let stream = Substream::new(&mut self.source, offset, len);
                Ok(AllocationFile::new(Box::new(stream), total, block_size, 0xFFFF))
            }
        }
    }

    pub fn root_folder(&mut self) -> Result<CatalogLeafRecord> {
        self.catalog_file()?.root_folder()
    }

    pub fn list_records(&mut self, folder_id: CatalogNodeId) -> Result<Vec<CatalogLeafRecord>> {
        self.catalog_file()?.list_records(folder_id)
    }

    pub fn get_record(
        &mut self,
        parent_id: CatalogNodeId,
        name: &CatalogName,
    ) -> Result<Option<CatalogLeafRecord>> {
        self.catalog_file()?.get_record(parent_id, name)
    }

    pub fn get_path_to(&mut self, cnid: CatalogNodeId) -> Result<Option<Vec<CatalogLeafRecord>>> {
        self.catalog_file()?.get_path_to_id(cnid)
    }

    pub fn get_entry(&mut self, components: &[&str]) -> Result<Option<CatalogLeafRecord>> {
        self.catalog_file()?.get_entry(components)
    }

    pub fn decode_name(&self, name: &CatalogName) -> String {
        name.to_string_lossy()
    }

    pub fn encode_name(&mut self, name: &str) -> Result<Option<CatalogName>> {
        Ok(self.catalog_file()?.format().encode_name(name))
    }

    pub fn fork_stream(
        &mut self,
        file: &CatalogFileRecord,
        fork_type: ForkType,
    ) -> Result<VolumeForkStream<'_, R>> {
        let header = self.volume_header()?;
        self.open_fork(&header, file.fork(fork_type), file.file_id, fork_type)
    }

    pub fn data_fork_stream(&mut self, file: &CatalogFileRecord) -> Result<VolumeForkStream<'_, R>> {
        self.fork_stream(file, ForkType::Data)
    }

    pub fn resource_fork_stream(
        &mut self,
        file: &CatalogFileRecord,
    ) -> Result<VolumeForkStream<'_, R>> {
        self.fork_stream(file, ForkType::Resource)
    }

    /// Sum of `fork_type` sizes of a file, or of every file below a folder.
    /// `stop` is polled once per catalog record visited.
    pub fn calculate_fork_size_recursive(
        &mut self,
        record: &CatalogLeafRecord,
        fork_type: ForkType,
        stop: &AtomicBool,
    ) -> Result<ScanOutcome<u64>> {
        let start = match &record.value {
            CatalogRecord::File(f) => return Ok(ScanOutcome::Completed(f.fork(fork_type).logical_size)),
            CatalogRecord::Folder(f) => f.folder_id,
            _ => {
                return Err(HfsError::InvalidArgument(
                    "fork size of a thread record".into(),
                ))
            }
        };
        let mut catalog = self.catalog_file()?;
        let mut total = 0u64;
        let mut pending = vec![start];
        while let Some(folder) = pending.pop() {
            for child in catalog.list_records(folder)? {
                if stop.load(Ordering::Relaxed) {
                    return Ok(ScanOutcome::Cancelled(total));
                }
                match &child.value {
                    CatalogRecord::File(f) => total += f.fork(fork_type).logical_size,
                    CatalogRecord::Folder(f) => pending.push(f.folder_id),
                    _ => {}
                }
            }
        }
        Ok(ScanOutcome::Completed(total))
    }

    /// Check that the header is consistent, the first and last 512-byte
    /// blocks of the volume are readable and the catalog has a root folder.
    pub fn run_sanity_checks(&mut self) -> Result<()> {
        let header = self.volume_header()?;
        header.validate(Some(self.volume_length), self.physical_block_size)?;
        let mut block = [0u8; 512];
        crate::io::read_exact_at(&mut self.source, self.volume_offset, &mut block)?;
        let last = self.volume_offset + self.volume_length.saturating_sub(512);
        crate::io::read_exact_at(&mut self.source, last, &mut block)?;
        let root = self.root_folder()?;
        debug!("sanity checks passed, root folder \"{}\"", root.key.name);
        Ok(())
    }

    fn entry_for(&self, parent_path: &str, record: &CatalogLeafRecord) -> Option<FileEntry> {
        let name = record.key.name.to_string_lossy();
        let path = if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        };
        match &record.value {
            CatalogRecord::Folder(f) => {
                let mut e = FileEntry::new_directory(name, path, f.folder_id.0 as u64);
                e.modified = f.modified().map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string());
                Some(e)
            }
            CatalogRecord::File(f) => {
                let mut e = FileEntry::new_file(name, path, f.data_fork.logical_size, f.file_id.0 as u64);
                e.modified = f.modified().map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string());
                e.type_code = Some(f.type_code());
                e.creator_code = Some(f.creator_code());
                e.resource_fork_size = f.resource_fork.logical_size;
                Some(e)
            }
            _ => None,
        }
    }

    /// The file record behind a browse entry. Classic HFS files usually have
    /// no thread record, so those are found by path instead.
    fn file_record(&mut self, entry: &FileEntry) -> Result<CatalogFileRecord> {
        let cnid = u32::try_from(entry.location)
            .map_err(|_| HfsError::InvalidArgument(format!("CNID {}", entry.location)))?;
        let mut catalog = self.catalog_file()?;
        let record = match catalog.thread_for(CatalogNodeId(cnid))? {
            Some(thread) => catalog.get_record(thread.parent_id, &thread.name)?,
            None => {
                let components: Vec<&str> =
                    entry.path.split('/').filter(|c| !c.is_empty()).collect();
                catalog.get_entry(&components)?
            }
        };
        match record {
            Some(CatalogLeafRecord {
                value: CatalogRecord::File(f),
                ..
            }) if f.file_id.0 == cnid => Ok(f),
            _ => Err(HfsError::InvalidArgument(format!("{} is not a file", entry.path))),
        }
    }

    fn copy_fork(
        &mut self,
        entry: &FileEntry,
        fork_type: ForkType,
        writer: &mut dyn Write,
    ) -> Result<u64> {
        let file = self.file_record(entry)?;
        let mut stream = self.fork_stream(&file, fork_type)?;
        Ok(std::io::copy(&mut stream, writer)?)
    }
}

impl<R: Read + Seek + Send> Filesystem for HfsVolume<R> {
    fn root(&mut self) -> Result<FileEntry> {
        let root = self.root_folder()?;
        let mut entry = FileEntry::root();
        entry.location = root.value.cnid().map_or(2, |c| c.0 as u64);
        Ok(entry)
    }

    fn list_directory(&mut self, entry: &FileEntry) -> Result<Vec<FileEntry>> {
        if !entry.is_directory() {
            return Err(HfsError::InvalidArgument(format!("{} is not a directory", entry.path)));
        }
        let folder = u32::try_from(entry.location)
            .map_err(|_| HfsError::InvalidArgument(format!("CNID {}", entry.location)))?;
        let records = self.list_records(CatalogNodeId(folder))?;
        Ok(records
            .iter()
            .filter_map(|r| self.entry_for(&entry.path, r))
            .collect())
    }

    fn read_file(&mut self, entry: &FileEntry, max_bytes: usize) -> Result<Vec<u8>> {
        let file = self.file_record(entry)?;
        let stream = self.data_fork_stream(&file)?;
        let mut data = Vec::new();
        stream.take(max_bytes as u64).read_to_end(&mut data)?;
        Ok(data)
    }

    fn volume_label(&self) -> Option<&str> {
        self.label.as_deref().filter(|s| !s.is_empty())
    }

    fn fs_type(&self) -> &str {
        self.format.name()
    }

    fn total_size(&self) -> u64 {
        self.total_blocks as u64 * self.block_size as u64
    }

    fn used_size(&self) -> u64 {
        self.total_blocks.saturating_sub(self.free_blocks) as u64 * self.block_size as u64
    }

    fn write_file_to(&mut self, entry: &FileEntry, writer: &mut dyn Write) -> Result<u64> {
        self.copy_fork(entry, ForkType::Data, writer)
    }

    fn write_resource_fork_to(&mut self, entry: &FileEntry, writer: &mut dyn Write) -> Result<u64> {
        self.copy_fork(entry, ForkType::Resource, writer)
    }

    fn resource_fork_size(&mut self, entry: &FileEntry) -> u64 {
        self.file_record(entry)
            .map(|f| f.resource_fork.logical_size)
            .unwrap_or(0)
    }
}
