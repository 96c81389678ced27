//! Forking a tag: a new File:Tag sharing every physical block of its source.

use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::metadata::TagMetadata;
use crate::physical::PhysicalBlockStore;
use crate::storage::Storage;

impl Storage {
    /// Create `dst_name:dst_tag` as a `WORK_IN_PROGRESS` copy of
    /// `src_name:src_tag`. Only hard links are created; no block is
    /// allocated, so the bitmap is untouched.
    #[instrument(skip(self), level = "debug")]
    pub fn tag_file(
        &self,
        query_id: u32,
        src_name: &str,
        src_tag: &str,
        dst_name: &str,
        dst_tag: &str,
    ) -> Result<()> {
        let src = self.tag_dir(src_name, src_tag)?;
        let dst = self.tag_dir(dst_name, dst_tag)?;
        let _tags = self
            .locks()
            .lock_tag_pair((src_name, src_tag), (dst_name, dst_tag));

        if !src.exists() {
            warn!(query_id, src_name, src_tag, "Fork source missing");
            return Err(src.missing());
        }
        let source = src.read_metadata()?;
        let pool = PhysicalBlockStore::new(self.layout(), self.superblock()?);

        dst.create()?;
        let mut forked = TagMetadata::default();
        let mut linked = Ok(());
        for (i, &block) in source.blocks.iter().enumerate() {
            if let Err(e) = dst.link_logical(i, &pool.path(block)) {
                linked = Err(e);
                break;
            }
            forked.blocks.push(block);
        }
        forked.size_bytes = if linked.is_ok() {
            source.size_bytes
        } else {
            source
                .size_bytes
                .min(forked.blocks.len() as u64 * pool.block_size())
        };

        let persisted = dst.save_metadata(&forked);
        linked.and(persisted).inspect_err(|e| {
            error!(query_id, dst_name, dst_tag, error = %e, linked = forked.blocks.len(), "Fork aborted");
        })?;

        info!(
            query_id,
            src = %format!("{src_name}:{src_tag}"),
            dst = %format!("{dst_name}:{dst_tag}"),
            blocks = forked.blocks.len(),
            "File:Tag forked"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::physical::inode;
    use crate::storage::{Storage, StorageOptions};
    use crate::superblock::Superblock;
    use crate::{StorageError, TagState};
    use tempfile::TempDir;

    #[test]
    fn test_fork_shares_inodes() {
        let temp = TempDir::new().unwrap();
        let storage =
            Storage::format(temp.path(), Superblock::default(), StorageOptions::default()).unwrap();
        storage.create_file(1, "f", "v1").unwrap();
        storage.truncate_file(2, "f", "v1", 200).unwrap();
        storage.write_block(3, "f", "v1", 1, b"data").unwrap();

        storage.tag_file(4, "f", "v1", "f", "v2").unwrap();

        let src = storage.read_metadata("f", "v1").unwrap();
        let dst = storage.read_metadata("f", "v2").unwrap();
        assert_eq!(dst.blocks, src.blocks);
        assert_eq!(dst.size_bytes, 200);
        assert_eq!(dst.state, TagState::WorkInProgress);

        let a = storage.tag_dir("f", "v1").unwrap();
        let b = storage.tag_dir("f", "v2").unwrap();
        for i in 0..2 {
            assert_eq!(
                inode(&a.logical_block(i)).unwrap(),
                inode(&b.logical_block(i)).unwrap()
            );
        }
    }

    #[test]
    fn test_fork_of_committed_tag_is_writable() {
        let temp = TempDir::new().unwrap();
        let storage =
            Storage::format(temp.path(), Superblock::default(), StorageOptions::default()).unwrap();
        storage
            .tag_file(1, "initial_file", "BASE", "initial_file", "next")
            .unwrap();
        storage.write_block(2, "initial_file", "next", 0, b"x").unwrap();
        assert_eq!(
            storage.read_metadata("initial_file", "BASE").unwrap().blocks,
            vec![0]
        );
    }

    #[test]
    fn test_fork_errors() {
        let temp = TempDir::new().unwrap();
        let storage =
            Storage::format(temp.path(), Superblock::default(), StorageOptions::default()).unwrap();
        assert!(matches!(
            storage.tag_file(1, "ghost", "v1", "f", "v1"),
            Err(StorageError::FileTagMissing { .. })
        ));
        assert!(matches!(
            storage.tag_file(2, "initial_file", "BASE", "initial_file", "BASE"),
            Err(StorageError::FileTagExists { .. })
        ));
    }
}
