//! The storage context every operation runs against.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, instrument};

use crate::directory::TagDir;
use crate::error::{IoResultExt, IoStep, Result, StorageError};
use crate::layout::MountLayout;
use crate::locks::LockTable;
use crate::metadata::TagMetadata;
use crate::superblock::Superblock;

/// Runtime knobs that do not live on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageOptions {
    /// Pause before every physical block read or write.
    pub block_access_delay: Duration,
}

/// Result of a worker handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRegistration {
    /// Workers registered so far, this one included
    pub workers: u32,
    pub block_size: u64,
}

/// A mounted storage node.
///
/// Holds only the mount point, options, lock table and the worker counter.
/// Superblock, bitmap, hash index and metadata are re-read from disk by each
/// operation; nothing is cached between requests.
#[derive(Debug)]
pub struct Storage {
    layout: MountLayout,
    options: StorageOptions,
    locks: LockTable,
    workers: AtomicU32,
}

impl Storage {
    /// Open an existing, already formatted mount point.
    pub fn open<P: AsRef<Path>>(root: P, options: StorageOptions) -> Result<Self> {
        let layout = MountLayout::new(root);
        let superblock = Superblock::load(&layout)?;
        info!(
            mount_point = %layout.root().display(),
            fs_size = superblock.fs_size,
            block_size = superblock.block_size,
            "Storage mounted"
        );
        Ok(Self::with_layout(layout, options))
    }

    /// Wipe `root` and lay down a fresh filesystem, then open it.
    pub fn format<P: AsRef<Path>>(
        root: P,
        superblock: Superblock,
        options: StorageOptions,
    ) -> Result<Self> {
        let layout = MountLayout::new(root);
        crate::format::format_mount(&layout, superblock)?;
        Ok(Self::with_layout(layout, options))
    }

    fn with_layout(layout: MountLayout, options: StorageOptions) -> Self {
        Self {
            layout,
            options,
            locks: LockTable::new(),
            workers: AtomicU32::new(0),
        }
    }

    pub fn layout(&self) -> &MountLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn superblock(&self) -> Result<Superblock> {
        Superblock::load(&self.layout)
    }

    pub(crate) fn tag_dir(&self, name: &str, tag: &str) -> Result<TagDir> {
        TagDir::new(&self.layout, name, tag)
    }

    pub(crate) fn block_access_pause(&self) {
        if !self.options.block_access_delay.is_zero() {
            thread::sleep(self.options.block_access_delay);
        }
    }

    /// Count a connecting worker and hand back the block size it must use.
    pub fn register_worker(&self, worker_id: u32) -> Result<WorkerRegistration> {
        let superblock = self.superblock()?;
        let workers = self.workers.fetch_add(1, Ordering::SeqCst) + 1;
        info!(worker_id, workers, "Worker connected");
        Ok(WorkerRegistration {
            workers,
            block_size: superblock.block_size,
        })
    }

    pub fn connected_workers(&self) -> u32 {
        self.workers.load(Ordering::SeqCst)
    }

    /// Create `name:tag` as an empty `WORK_IN_PROGRESS` tag.
    #[instrument(skip(self), level = "debug")]
    pub fn create_file(&self, query_id: u32, name: &str, tag: &str) -> Result<()> {
        let dir = self.tag_dir(name, tag)?;
        let _tag = self.locks.lock_tag(name, tag);
        dir.create()?;
        info!(query_id, name, tag, "File created");
        Ok(())
    }

    /// Current metadata of `name:tag`.
    pub fn read_metadata(&self, name: &str, tag: &str) -> Result<TagMetadata> {
        let dir = self.tag_dir(name, tag)?;
        let _tag = self.locks.lock_tag(name, tag);
        if !dir.exists() {
            return Err(dir.missing());
        }
        dir.read_metadata()
    }

    /// Tags of a file, sorted.
    pub fn list_tags(&self, name: &str) -> Result<Vec<String>> {
        crate::layout::validate_component(name)?;
        let file_dir = self.layout.file_dir(name);
        let entries = match fs::read_dir(&file_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::FileMissing {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e).at(IoStep::Stat, &file_dir),
        };
        let mut tags = Vec::new();
        for entry in entries {
            let entry = entry.at(IoStep::Stat, &file_dir)?;
            if entry.file_type().at(IoStep::Stat, &entry.path())?.is_dir() {
                tags.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tags.sort();
        Ok(tags)
    }
}
