//! Error type for storage operations and its mapping onto wire status codes.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Status codes carried in every storage response.
///
/// The first four negative codes keep the values workers already rely on for
/// truncate failures; the rest are grouped by error class.
pub mod status {
    pub const OK: i8 = 0;
    pub const SUPERBLOCK_UNAVAILABLE: i8 = -1;
    pub const METADATA_UNAVAILABLE: i8 = -2;
    pub const LOGICAL_BLOCK_REMOVAL_FAILED: i8 = -3;
    pub const HARD_LINK_FAILED: i8 = -4;
    pub const IO_ERROR: i8 = -5;
    pub const FILE_TAG_MISSING: i8 = -10;
    pub const FILE_TAG_EXISTS: i8 = -11;
    pub const TAG_COMMITTED: i8 = -12;
    pub const NO_SPACE: i8 = -13;
    pub const BLOCK_OUT_OF_RANGE: i8 = -14;
    pub const INVALID_ARGUMENT: i8 = -15;
}

/// Which on-disk structure an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStep {
    Superblock,
    Bitmap,
    HashIndex,
    Metadata,
    CreateDir,
    BlockRead,
    BlockWrite,
    Link,
    Unlink,
    Stat,
    Wipe,
}

impl fmt::Display for IoStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoStep::Superblock => "superblock",
            IoStep::Bitmap => "bitmap",
            IoStep::HashIndex => "hash index",
            IoStep::Metadata => "metadata",
            IoStep::CreateDir => "mkdir",
            IoStep::BlockRead => "block read",
            IoStep::BlockWrite => "block write",
            IoStep::Link => "hard link",
            IoStep::Unlink => "unlink",
            IoStep::Stat => "stat",
            IoStep::Wipe => "wipe",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{step} I/O error on {}: {source}", path.display())]
    Io {
        step: IoStep,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed {step} file {}: {reason}", path.display())]
    Malformed {
        step: IoStep,
        path: PathBuf,
        reason: String,
    },

    #[error("File:Tag not found: {name}:{tag}")]
    FileTagMissing { name: String, tag: String },

    #[error("File not found: {name}")]
    FileMissing { name: String },

    #[error("File:Tag already exists: {name}:{tag}")]
    FileTagExists { name: String, tag: String },

    #[error("File:Tag {name}:{tag} is committed and cannot be modified")]
    TagCommitted { name: String, tag: String },

    #[error("No free physical blocks left")]
    NoSpace,

    #[error("Block {index} out of range (limit {limit})")]
    BlockOutOfRange { index: u64, limit: u64 },

    #[error("Payload of {len} bytes exceeds block size {block_size}")]
    PayloadTooLarge { len: usize, block_size: u64 },

    #[error("Invalid name component: {0:?}")]
    InvalidName(String),

    #[error("Invalid geometry: fs_size={fs_size}, block_size={block_size}")]
    InvalidGeometry { fs_size: u64, block_size: u64 },
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub(crate) fn missing(name: &str, tag: &str) -> Self {
        StorageError::FileTagMissing {
            name: name.to_string(),
            tag: tag.to_string(),
        }
    }

    pub(crate) fn malformed(step: IoStep, path: &Path, reason: impl Into<String>) -> Self {
        StorageError::Malformed {
            step,
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Wire status code for this error.
    pub fn status(&self) -> i8 {
        match self {
            StorageError::Io { step, .. } | StorageError::Malformed { step, .. } => match step {
                IoStep::Superblock => status::SUPERBLOCK_UNAVAILABLE,
                IoStep::Metadata => status::METADATA_UNAVAILABLE,
                IoStep::Unlink => status::LOGICAL_BLOCK_REMOVAL_FAILED,
                IoStep::Link => status::HARD_LINK_FAILED,
                _ => status::IO_ERROR,
            },
            StorageError::FileTagMissing { .. } | StorageError::FileMissing { .. } => {
                status::FILE_TAG_MISSING
            }
            StorageError::FileTagExists { .. } => status::FILE_TAG_EXISTS,
            StorageError::TagCommitted { .. } => status::TAG_COMMITTED,
            StorageError::NoSpace => status::NO_SPACE,
            StorageError::BlockOutOfRange { .. } => status::BLOCK_OUT_OF_RANGE,
            StorageError::PayloadTooLarge { .. }
            | StorageError::InvalidName(_)
            | StorageError::InvalidGeometry { .. } => status::INVALID_ARGUMENT,
        }
    }
}

/// Attach the failing step and path to a raw `io::Result`.
pub(crate) trait IoResultExt<T> {
    fn at(self, step: IoStep, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, step: IoStep, path: &Path) -> Result<T> {
        self.map_err(|source| StorageError::Io {
            step,
            path: path.to_path_buf(),
            source,
        })
    }
}
