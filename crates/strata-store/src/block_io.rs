//! Reading and writing single logical blocks.
//!
//! Writes are copy-on-write: new content always lands in a freshly allocated
//! physical block, so blocks shared through the hash index or through forks
//! are never modified in place.

use tracing::{debug, error, info, instrument, warn};

use crate::bitmap::BlockBitmap;
use crate::error::{Result, StorageError};
use crate::hash_index::ContentHashIndex;
use crate::locks::HashIndexGuard;
use crate::physical::{read_block_file, PhysicalBlockStore};
use crate::storage::Storage;
use crate::superblock::Superblock;

impl Storage {
    /// Full content of logical block `index`, `block_size` bytes long.
    #[instrument(skip(self), level = "debug")]
    pub fn read_block(&self, query_id: u32, name: &str, tag: &str, index: u64) -> Result<Vec<u8>> {
        let dir = self.tag_dir(name, tag)?;
        let _tag = self.locks().lock_tag(name, tag);

        let superblock = self.superblock()?;
        if !dir.exists() {
            return Err(dir.missing());
        }
        let metadata = dir.read_metadata()?;
        let i = logical_index(index, metadata.blocks.len())?;

        self.block_access_pause();
        let data = read_block_file(&dir.logical_block(i), superblock.block_size)?;
        debug!(query_id, name, tag, index, block = metadata.blocks[i], "Block read");
        Ok(data)
    }

    /// Replace the content of logical block `index` with `data`, zero-padded
    /// to the block size. Returns the physical block now backing it.
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    pub fn write_block(
        &self,
        query_id: u32,
        name: &str,
        tag: &str,
        index: u64,
        data: &[u8],
    ) -> Result<u64> {
        let dir = self.tag_dir(name, tag)?;
        let _tag = self.locks().lock_tag(name, tag);

        let superblock = self.superblock()?;
        if !dir.exists() {
            return Err(dir.missing());
        }
        let mut metadata = dir.read_metadata()?;
        if metadata.is_committed() {
            warn!(query_id, name, tag, "Write on committed File:Tag rejected");
            return Err(StorageError::TagCommitted {
                name: name.to_string(),
                tag: tag.to_string(),
            });
        }
        let i = logical_index(index, metadata.blocks.len())?;
        if data.len() as u64 > superblock.block_size {
            return Err(StorageError::PayloadTooLarge {
                len: data.len(),
                block_size: superblock.block_size,
            });
        }

        let pool = PhysicalBlockStore::new(self.layout(), superblock);
        let guard = self.locks().lock_hash_index();
        let target = self.allocate(&guard, &superblock)?;

        self.block_access_pause();
        let staged = pool.write(target, data).and_then(|()| {
            let mut hashes = ContentHashIndex::load(self.layout())?;
            if hashes.remove_block(target) > 0 {
                debug!(query_id, block = target, "Dropped stale hash entries for reused block");
                hashes.save(self.layout())?;
            }
            dir.relink_logical(i, &pool.path(target))
        });
        if let Err(e) = staged {
            error!(query_id, name, tag, block = target, error = %e, "Block write failed");
            self.release(&guard, &superblock, target, query_id);
            return Err(e);
        }

        let previous = std::mem::replace(&mut metadata.blocks[i], target);
        if let Err(e) = dir.save_metadata(&metadata) {
            error!(query_id, name, tag, block = target, error = %e, "Metadata save failed, restoring link");
            // The link must keep matching BLOCKS, so put back the previous target.
            match dir.relink_logical(i, &pool.path(previous)) {
                Ok(()) => self.release(&guard, &superblock, target, query_id),
                Err(undo) => {
                    error!(query_id, name, tag, index, previous, error = %undo, "Could not restore logical block link");
                }
            }
            return Err(e);
        }
        self.reclaim_if_orphaned(&guard, &superblock, &pool.path(previous), query_id)?;

        info!(query_id, name, tag, index, block = target, previous, "Block written");
        Ok(target)
    }

    /// Claim the first free block in the bitmap.
    fn allocate(&self, guard: &HashIndexGuard<'_>, superblock: &Superblock) -> Result<u64> {
        let _bitmap_lock = guard.lock_bitmap();
        let mut bitmap = BlockBitmap::load(self.layout(), superblock)?;
        let block = bitmap.first_free().ok_or_else(|| {
            warn!("Physical block pool exhausted");
            StorageError::NoSpace
        })?;
        bitmap.mark_occupied(block)?;
        bitmap.save(self.layout())?;
        Ok(block)
    }

    /// Undo an allocation whose block never got linked.
    fn release(&self, guard: &HashIndexGuard<'_>, superblock: &Superblock, block: u64, query_id: u32) {
        let _bitmap_lock = guard.lock_bitmap();
        let released = BlockBitmap::load(self.layout(), superblock).and_then(|mut bitmap| {
            bitmap.mark_free(block)?;
            bitmap.save(self.layout())
        });
        if let Err(e) = released {
            error!(query_id, block, error = %e, "Could not release allocated block");
        }
    }
}

fn logical_index(index: u64, len: usize) -> Result<usize> {
    if index >= len as u64 {
        return Err(StorageError::BlockOutOfRange {
            index,
            limit: len as u64,
        });
    }
    Ok(index as usize)
}
