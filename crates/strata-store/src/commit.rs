//! Tag commit: content-hash deduplication of every logical block, then the
//! `WORK_IN_PROGRESS → COMMITTED` transition.
//!
//! For each logical block the full block is read (zero-padded if short) and
//! hashed. On a hit whose canonical block differs from the one currently
//! backing the logical block, the logical hard link is swapped to the
//! canonical block and the previous block goes through orphan reclamation.
//! On a miss the current block becomes canonical for that content.
//!
//! The pass is not atomic across blocks. If it fails halfway, the relinks
//! and index entries done so far are persisted together with the updated
//! `BLOCKS`, and the tag stays `WORK_IN_PROGRESS` so a retry starts over.

use tracing::{debug, error, info, instrument, warn};

use crate::bitmap::BlockBitmap;
use crate::directory::TagDir;
use crate::error::{IoStep, Result, StorageError};
use crate::hash_index::{hash_block, ContentHashIndex};
use crate::locks::HashIndexGuard;
use crate::metadata::{TagMetadata, TagState};
use crate::physical::{inode, read_block_file, PhysicalBlockStore};
use crate::storage::Storage;
use crate::superblock::Superblock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The tag was already committed; nothing was touched.
    AlreadyCommitted,
    Committed(DedupStats),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Logical blocks relinked onto an existing canonical block
    pub deduplicated: usize,
    /// New hash-index entries created
    pub registered: usize,
    /// Physical blocks whose last link went away
    pub freed: usize,
}

impl Storage {
    /// Commit `name:tag`. Idempotent: committing a committed tag succeeds
    /// without reading the hash index or the bitmap.
    #[instrument(skip(self), level = "debug")]
    pub fn commit_tag(&self, query_id: u32, name: &str, tag: &str) -> Result<CommitOutcome> {
        let dir = self.tag_dir(name, tag)?;
        let _tag = self.locks().lock_tag(name, tag);

        if !dir.exists() {
            warn!(query_id, name, tag, "Commit on missing File:Tag");
            return Err(dir.missing());
        }
        let mut metadata = dir.read_metadata().inspect_err(|_| {
            warn!(query_id, name, tag, "Commit on File:Tag without readable metadata");
        })?;

        if metadata.is_committed() {
            info!(query_id, name, tag, "File:Tag already committed");
            return Ok(CommitOutcome::AlreadyCommitted);
        }

        let mut stats = DedupStats::default();
        if !metadata.blocks.is_empty() {
            let superblock = self.superblock()?;
            let guard = self.locks().lock_hash_index();
            let mut index = ContentHashIndex::load(self.layout())?;
            let original_blocks = metadata.blocks.clone();

            let pass = self.dedup_pass(
                &guard,
                query_id,
                &dir,
                &superblock,
                &mut metadata,
                &mut index,
                &mut stats,
            );

            // Persist whatever prefix was processed, even on failure.
            let persisted = index.save(self.layout()).and_then(|()| {
                if metadata.blocks != original_blocks {
                    dir.save_metadata(&metadata)
                } else {
                    Ok(())
                }
            });
            if let (Err(pass_err), Err(save_err)) = (&pass, &persisted) {
                error!(query_id, name, tag, error = %save_err, after = %pass_err, "Could not persist partial dedup");
            }
            pass.and(persisted).inspect_err(|e| {
                error!(query_id, name, tag, error = %e, "Dedup pass aborted");
            })?;
        }

        metadata.state = TagState::Committed;
        dir.save_metadata(&metadata)?;
        info!(
            query_id,
            name,
            tag,
            deduplicated = stats.deduplicated,
            registered = stats.registered,
            freed = stats.freed,
            "File:Tag committed"
        );
        Ok(CommitOutcome::Committed(stats))
    }

    #[allow(clippy::too_many_arguments)]
    fn dedup_pass(
        &self,
        guard: &HashIndexGuard<'_>,
        query_id: u32,
        dir: &TagDir,
        superblock: &Superblock,
        metadata: &mut TagMetadata,
        index: &mut ContentHashIndex,
        stats: &mut DedupStats,
    ) -> Result<()> {
        let pool = PhysicalBlockStore::new(self.layout(), *superblock);

        for i in 0..metadata.blocks.len() {
            let current = metadata.blocks[i];
            let logical = dir.logical_block(i);
            if inode(&logical)? != pool.inode(current)? {
                error!(query_id, logical = i, block = current, "Logical block not linked to its recorded block");
                return Err(StorageError::malformed(
                    IoStep::Link,
                    &logical,
                    format!("expected a link to block {current}"),
                ));
            }
            self.block_access_pause();
            let data = read_block_file(&logical, superblock.block_size)?;
            let hash = hash_block(&data);

            match index.get(&hash) {
                Some(canonical) if canonical == current => {}
                Some(canonical) if self.is_occupied(guard, superblock, canonical)? => {
                    dir.relink_logical(i, &pool.path(canonical))?;
                    metadata.blocks[i] = canonical;
                    stats.deduplicated += 1;
                    debug!(query_id, logical = i, from = current, to = canonical, "Logical block deduplicated");

                    let outcome =
                        self.reclaim_if_orphaned(guard, superblock, &pool.path(current), query_id)?;
                    if matches!(outcome, crate::reclaim::Reclaim::Freed { .. }) {
                        stats.freed += 1;
                    }
                }
                stale => {
                    if let Some(block) = stale {
                        warn!(query_id, block, "Hash index entry points at a free block, replacing");
                    }
                    index.insert(hash, current);
                    stats.registered += 1;
                    debug!(query_id, logical = i, block = current, "Content registered as canonical");
                }
            }
        }
        Ok(())
    }

    fn is_occupied(
        &self,
        guard: &HashIndexGuard<'_>,
        superblock: &Superblock,
        block: u64,
    ) -> Result<bool> {
        if block >= superblock.total_blocks() {
            return Ok(false);
        }
        let _bitmap_lock = guard.lock_bitmap();
        let bitmap = BlockBitmap::load(self.layout(), superblock)?;
        Ok(!bitmap.is_free(block)?)
    }
}
