pub mod allocation;
pub mod attributes;
pub mod btree;
pub mod catalog;
pub mod entry;
pub mod extents;
pub mod filesystem;
pub mod fork;
pub mod journal;
pub mod mac_roman;
pub mod unicode;
pub mod volume;
pub mod volume_header;

use chrono::{DateTime, Utc};

pub use allocation::{AllocationFile, BlockCounts, ScanOutcome};
pub use catalog::{CatalogFile, CatalogLeafRecord, CatalogName, CatalogNodeId, CatalogRecord};
pub use entry::{EntryType, FileEntry};
pub use extents::{ExtentDescriptor, ForkData, ForkType};
pub use filesystem::Filesystem;
pub use fork::ForkStream;
pub use volume::{open_volume, HfsVolume};
pub use volume_header::{detect_volume_format, VolumeFormat, VolumeHeader};

/// Seconds between 1904-01-01 and 1970-01-01.
const HFS_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Convert an HFS date (seconds since 1904) to UTC. Zero means unset.
///
/// Classic HFS stores local time; it is reported as if it were UTC.
pub fn hfs_timestamp(seconds: u32) -> Option<DateTime<Utc>> {
    if seconds == 0 {
        return None;
    }
    DateTime::from_timestamp(seconds as i64 - HFS_EPOCH_OFFSET, 0)
}
