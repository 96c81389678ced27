//! The pre-allocated pool of fixed-size block files.
//!
//! Every block file exists from format time on; allocation never creates
//! files, it only rewrites the content of a free one. The host filesystem's
//! hard-link count on a block file is its reference count: the pool entry
//! itself is one link, each logical block pointing at it adds one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IoResultExt, IoStep, Result, StorageError};
use crate::layout::MountLayout;
use crate::superblock::Superblock;

/// Id of the reserved all-zero block grown logical blocks link to.
pub const ZERO_BLOCK: u64 = 0;

pub struct PhysicalBlockStore<'a> {
    layout: &'a MountLayout,
    superblock: Superblock,
}

impl<'a> PhysicalBlockStore<'a> {
    pub fn new(layout: &'a MountLayout, superblock: Superblock) -> Self {
        Self { layout, superblock }
    }

    pub fn block_size(&self) -> u64 {
        self.superblock.block_size
    }

    pub fn path(&self, id: u64) -> PathBuf {
        self.layout.physical_block(id)
    }

    pub fn check(&self, id: u64) -> Result<()> {
        let limit = self.superblock.total_blocks();
        if id >= limit {
            return Err(StorageError::BlockOutOfRange { index: id, limit });
        }
        Ok(())
    }

    /// Create the pool: `total_blocks` zero-filled files.
    pub fn create_all(&self) -> Result<()> {
        let dir = self.layout.physical_dir();
        fs::create_dir(&dir).at(IoStep::CreateDir, &dir)?;
        let zeros = vec![0u8; self.block_size() as usize];
        for id in 0..self.superblock.total_blocks() {
            let path = self.path(id);
            fs::write(&path, &zeros).at(IoStep::BlockWrite, &path)?;
        }
        Ok(())
    }

    /// Overwrite block `id` in place, zero-padding `data` to the block size.
    pub fn write(&self, id: u64, data: &[u8]) -> Result<()> {
        self.check(id)?;
        let block_size = self.block_size() as usize;
        if data.len() > block_size {
            return Err(StorageError::PayloadTooLarge {
                len: data.len(),
                block_size: self.block_size(),
            });
        }
        let path = self.path(id);
        let mut buf = data.to_vec();
        buf.resize(block_size, 0);

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .at(IoStep::BlockWrite, &path)?;
        file.write_all(&buf).at(IoStep::BlockWrite, &path)?;
        file.sync_all().at(IoStep::BlockWrite, &path)
    }

    pub fn link_count(&self, id: u64) -> Result<u64> {
        link_count(&self.path(id))
    }

    pub fn inode(&self, id: u64) -> Result<u64> {
        inode(&self.path(id))
    }
}

/// Hard-link count of a file.
pub fn link_count(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path).at(IoStep::Stat, path)?.nlink())
}

pub fn inode(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path).at(IoStep::Stat, path)?.ino())
}

/// Read a whole block. A file shorter than `block_size` is zero-padded and
/// logged; that is not an error.
pub fn read_block_file(path: &Path, block_size: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; block_size as usize];
    let mut file = File::open(path).at(IoStep::BlockRead, path)?;
    let filled = fill(&mut file, &mut buf).at(IoStep::BlockRead, path)?;
    if filled < buf.len() {
        warn!(
            path = %path.display(),
            read = filled,
            block_size,
            "Short block read, zero-padding"
        );
    }
    Ok(buf)
}

fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
