//! # strata-store
//!
//! Block pool, content-hash deduplication and File:Tag namespace of a
//! Strata storage node.
//!
//! A mount point holds a fixed pool of equally sized physical blocks. Files
//! are versioned by tag; each File:Tag is a directory of logical blocks that
//! are hard links into the pool, so the host filesystem's link count is the
//! reference count of a physical block. Committing a tag hashes every block
//! (BLAKE3) and relinks duplicates onto one canonical block.
//!
//! ## On-disk Layout
//!
//! ```text
//! <mount_point>/
//! ├── superblock.config           # FS_SIZE=..., BLOCK_SIZE=...
//! ├── bitmap.bin                  # one bit per block, MSB first
//! ├── blocks_hash_index.config    # HEXHASH=ID per line
//! ├── physical_blocks/
//! │   └── block0000.dat ...       # BLOCK_SIZE bytes each
//! └── files/<name>/<tag>/
//!     ├── logical_blocks/000000.dat ...
//!     └── metadata.config         # SIZE, BLOCKS=[..], ESTADO
//! ```
//!
//! ## Locking
//!
//! Per-tag locks come first, then the global hash-index lock, then the
//! bitmap lock. See [`locks`].

pub mod bitmap;
mod block_io;
pub mod check;
mod commit;
pub mod directory;
pub mod error;
pub mod format;
mod fork;
pub mod hash_index;
mod kv;
pub mod layout;
pub mod locks;
pub mod metadata;
pub mod physical;
mod reclaim;
mod storage;
pub mod superblock;
mod truncate;

pub use bitmap::BlockBitmap;
pub use check::{ConsistencyReport, Issue};
pub use commit::{CommitOutcome, DedupStats};
pub use error::{status, IoStep, Result, StorageError};
pub use format::{INITIAL_FILE, INITIAL_TAG};
pub use hash_index::{hash_block, ContentHash, ContentHashIndex};
pub use layout::MountLayout;
pub use metadata::{TagMetadata, TagState};
pub use physical::ZERO_BLOCK;
pub use storage::{Storage, StorageOptions, WorkerRegistration};
pub use superblock::Superblock;
pub use truncate::TruncateOutcome;
