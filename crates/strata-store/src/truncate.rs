//! Resize a tag to a byte length.
//!
//! Shrinking drops logical blocks from the tail and reclaims physical blocks
//! that lose their last link. Growing links every new position to the
//! reserved zero block. Both directions persist the prefix they managed to
//! change if an I/O error cuts them short.

use tracing::{debug, error, info, instrument, warn};

use crate::directory::TagDir;
use crate::error::{Result, StorageError};
use crate::metadata::TagMetadata;
use crate::physical::{PhysicalBlockStore, ZERO_BLOCK};
use crate::reclaim::Reclaim;
use crate::storage::Storage;
use crate::superblock::Superblock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncateOutcome {
    pub old_blocks: usize,
    pub new_blocks: usize,
    /// Physical blocks cleared in the bitmap
    pub freed: usize,
}

impl Storage {
    #[instrument(skip(self), level = "debug")]
    pub fn truncate_file(
        &self,
        query_id: u32,
        name: &str,
        tag: &str,
        new_size_bytes: u64,
    ) -> Result<TruncateOutcome> {
        let dir = self.tag_dir(name, tag)?;
        let _tag = self.locks().lock_tag(name, tag);

        let superblock = self.superblock().inspect_err(|e| {
            error!(query_id, error = %e, "Superblock unavailable");
        })?;
        if !dir.exists() {
            warn!(query_id, name, tag, "Truncate on missing File:Tag");
            return Err(dir.missing());
        }
        let mut metadata = dir.read_metadata()?;
        if metadata.is_committed() {
            warn!(query_id, name, tag, "Truncate on committed File:Tag rejected");
            return Err(StorageError::TagCommitted {
                name: name.to_string(),
                tag: tag.to_string(),
            });
        }

        let old_blocks = metadata.blocks.len();
        let new_blocks = superblock.blocks_for(new_size_bytes) as usize;
        let old_size = metadata.size_bytes;
        let mut freed = 0;

        let pass = if new_blocks < old_blocks {
            self.shrink(query_id, &dir, &superblock, &mut metadata, new_blocks, &mut freed)
        } else if new_blocks > old_blocks {
            self.grow(query_id, &dir, &superblock, &mut metadata, new_blocks)
        } else {
            Ok(())
        };

        let reached = metadata.blocks.len() as u64 * superblock.block_size;
        metadata.size_bytes = match pass {
            Ok(()) => new_size_bytes,
            Err(_) if new_blocks < old_blocks => old_size.min(reached),
            Err(_) => new_size_bytes.min(reached),
        };
        let persisted = dir.save_metadata(&metadata);
        pass.and(persisted).inspect_err(|e| {
            error!(query_id, name, tag, error = %e, blocks = metadata.blocks.len(), "Truncate aborted");
        })?;

        info!(
            query_id,
            name,
            tag,
            size = new_size_bytes,
            old_blocks,
            new_blocks,
            freed,
            "File:Tag truncated"
        );
        Ok(TruncateOutcome {
            old_blocks,
            new_blocks,
            freed,
        })
    }

    /// Drop logical blocks from the tail, last first, so `BLOCKS` always
    /// matches the logical files still on disk.
    fn shrink(
        &self,
        query_id: u32,
        dir: &TagDir,
        superblock: &Superblock,
        metadata: &mut TagMetadata,
        new_blocks: usize,
        freed: &mut usize,
    ) -> Result<()> {
        let pool = PhysicalBlockStore::new(self.layout(), *superblock);
        let guard = self.locks().lock_hash_index();

        while metadata.blocks.len() > new_blocks {
            let i = metadata.blocks.len() - 1;
            let physical = pool.path(metadata.blocks[i]);
            dir.unlink_logical(i)?;
            metadata.blocks.truncate(i);
            debug!(query_id, logical = i, "Logical block removed");

            if let Reclaim::Freed { .. } =
                self.reclaim_if_orphaned(&guard, superblock, &physical, query_id)?
            {
                *freed += 1;
            }
        }
        Ok(())
    }

    fn grow(
        &self,
        query_id: u32,
        dir: &TagDir,
        superblock: &Superblock,
        metadata: &mut TagMetadata,
        new_blocks: usize,
    ) -> Result<()> {
        let zero = PhysicalBlockStore::new(self.layout(), *superblock).path(ZERO_BLOCK);
        for i in metadata.blocks.len()..new_blocks {
            dir.link_logical(i, &zero)?;
            metadata.blocks.push(ZERO_BLOCK);
        }
        debug!(query_id, blocks = new_blocks, "Grown with zero blocks");
        Ok(())
    }
}
