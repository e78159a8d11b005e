use thiserror::Error;

#[derive(Error, Debug)]
pub enum HfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid MBR: {0}")]
    InvalidMbr(String),

    #[error("Invalid extended partition chain: {0}")]
    InvalidEbr(String),

    #[error("Invalid GPT: {0}")]
    InvalidGpt(String),

    #[error("Invalid APM: {0}")]
    InvalidApm(String),

    #[error("Invalid volume header: {0}")]
    InvalidVolumeHeader(String),

    #[error("Corrupt {tree} B-tree node {node}: {reason}")]
    CorruptNode {
        tree: &'static str,
        node: u32,
        reason: String,
    },

    #[error("Missing overflow extent for file {file_id} ({fork} fork) at block {start_block}")]
    MissingExtent {
        file_id: u32,
        fork: &'static str,
        start_block: u32,
    },

    #[error("Broken thread chain at CNID {cnid}: {reason}")]
    BrokenThread { cnid: u32, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HfsError>;

impl HfsError {
    pub(crate) fn corrupt(tree: &'static str, node: u32, reason: impl Into<String>) -> Self {
        HfsError::CorruptNode {
            tree,
            node,
            reason: reason.into(),
        }
    }
}
