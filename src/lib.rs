//! Read-only access to HFS, HFS+ and HFSX volumes and the partition maps
//! that carry them (MBR with EBR chains, GPT, Apple Partition Map).

pub mod config;
pub mod error;
pub mod fs;
pub mod io;
pub mod partition;

pub use config::ReaderConfig;
pub use error::{HfsError, Result};
pub use fs::{open_volume, HfsVolume, VolumeFormat};
pub use partition::{Partition, PartitionKind, PartitionSystem, PartitionSystemType};
