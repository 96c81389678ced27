//! Orphan reclamation: clear a physical block's bitmap bit once its last
//! logical link is gone.

use std::path::Path;

use tracing::{debug, info};

use crate::bitmap::BlockBitmap;
use crate::error::{IoStep, Result, StorageError};
use crate::layout::parse_physical_block_id;
use crate::locks::HashIndexGuard;
use crate::physical::{link_count, ZERO_BLOCK};
use crate::storage::Storage;
use crate::superblock::Superblock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// Other links remain; `links` includes the pool entry itself.
    StillReferenced { links: u64 },
    /// The reserved zero block is never freed.
    Reserved,
    Freed { block: u64 },
}

impl Storage {
    /// Free `physical` in the bitmap if no logical block links to it anymore.
    ///
    /// Callers hold the hash-index lock (the guard proves it); the bitmap lock
    /// is taken here.
    pub(crate) fn reclaim_if_orphaned(
        &self,
        guard: &HashIndexGuard<'_>,
        superblock: &Superblock,
        physical: &Path,
        query_id: u32,
    ) -> Result<Reclaim> {
        let links = link_count(physical)?;
        if links > 1 {
            debug!(query_id, path = %physical.display(), links, "Physical block still referenced");
            return Ok(Reclaim::StillReferenced { links });
        }

        let block = parse_physical_block_id(physical).ok_or_else(|| {
            StorageError::malformed(IoStep::Bitmap, physical, "not a physical block name")
        })?;
        if block == ZERO_BLOCK {
            return Ok(Reclaim::Reserved);
        }

        let _bitmap_lock = guard.lock_bitmap();
        let mut bitmap = BlockBitmap::load(self.layout(), superblock)?;
        bitmap.mark_free(block)?;
        bitmap.save(self.layout())?;

        info!(query_id, block, "Physical block freed");
        Ok(Reclaim::Freed { block })
    }
}
