//! Offline consistency check of bitmap, hash index, physical pool and every
//! tag's metadata against each other.

use std::io;

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::bitmap::BlockBitmap;
use crate::directory::TagDir;
use crate::error::{IoResultExt, IoStep, Result};
use crate::hash_index::ContentHashIndex;
use crate::physical::{inode, PhysicalBlockStore, ZERO_BLOCK};
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// Block 0 is marked free.
    ReservedBlockFree,
    /// Bit set but no logical block links to the block.
    Leaked { block: u64 },
    /// Bit clear while logical blocks still link to the block.
    Dangling { block: u64, links: u64 },
    /// Hash index entry pointing at a free or out-of-range block.
    StaleIndexEntry { hash: String, block: u64 },
    /// `BLOCKS[index]` names a block the logical file is not linked to.
    LinkMismatch {
        name: String,
        tag: String,
        index: usize,
        block: u64,
    },
    BlockCountMismatch {
        name: String,
        tag: String,
        metadata: usize,
        on_disk: usize,
    },
    UnreadableMetadata { name: String, tag: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub hash_entries: usize,
    pub tags: usize,
    pub issues: Vec<Issue>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl Storage {
    /// Walk the whole mount point and report every inconsistency found.
    /// Takes the hash-index and bitmap locks for the duration; meant for idle
    /// nodes.
    pub fn check(&self) -> Result<ConsistencyReport> {
        let superblock = self.superblock()?;
        let pool = PhysicalBlockStore::new(self.layout(), superblock);
        let guard = self.locks().lock_hash_index();
        let _bitmap_lock = guard.lock_bitmap();

        let bitmap = BlockBitmap::load(self.layout(), &superblock)?;
        let index = ContentHashIndex::load(self.layout())?;
        let mut report = ConsistencyReport {
            total_blocks: superblock.total_blocks(),
            free_blocks: bitmap.count_free(),
            hash_entries: index.len(),
            ..Default::default()
        };

        for block in 0..superblock.total_blocks() {
            let links = pool.link_count(block)?;
            let free = bitmap.is_free(block)?;
            if block == ZERO_BLOCK {
                if free {
                    report.issues.push(Issue::ReservedBlockFree);
                }
            } else if !free && links <= 1 {
                report.issues.push(Issue::Leaked { block });
            } else if free && links > 1 {
                report.issues.push(Issue::Dangling { block, links });
            }
        }

        for (hash, block) in index.iter() {
            if block >= superblock.total_blocks() || bitmap.is_free(block)? {
                report.issues.push(Issue::StaleIndexEntry {
                    hash: hex::encode(hash),
                    block,
                });
            }
        }

        let files = self.layout().files_dir();
        for entry in WalkDir::new(&files).min_depth(2).max_depth(2).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from).at(IoStep::Stat, &files)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let tag = entry.file_name().to_string_lossy().into_owned();
            let name = match entry.path().parent().and_then(|p| p.file_name()) {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            report.tags += 1;
            self.check_tag(&pool, &name, &tag, &mut report)?;
        }

        if report.is_clean() {
            info!(tags = report.tags, free = report.free_blocks, "Consistency check clean");
        } else {
            warn!(issues = report.issues.len(), "Consistency check found issues");
        }
        Ok(report)
    }

    fn check_tag(
        &self,
        pool: &PhysicalBlockStore<'_>,
        name: &str,
        tag: &str,
        report: &mut ConsistencyReport,
    ) -> Result<()> {
        let unreadable = || Issue::UnreadableMetadata {
            name: name.to_string(),
            tag: tag.to_string(),
        };
        let Ok(dir) = TagDir::new(self.layout(), name, tag) else {
            report.issues.push(unreadable());
            return Ok(());
        };
        let Ok(metadata) = dir.read_metadata() else {
            report.issues.push(unreadable());
            return Ok(());
        };

        let on_disk = dir.logical_count()?;
        if on_disk != metadata.blocks.len() {
            report.issues.push(Issue::BlockCountMismatch {
                name: name.to_string(),
                tag: tag.to_string(),
                metadata: metadata.blocks.len(),
                on_disk,
            });
        }

        for (index, &block) in metadata.blocks.iter().enumerate() {
            let logical = inode(&dir.logical_block(index)).ok();
            let physical = pool.inode(block).ok();
            if logical.is_none() || logical != physical {
                report.issues.push(Issue::LinkMismatch {
                    name: name.to_string(),
                    tag: tag.to_string(),
                    index,
                    block,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageOptions;
    use crate::superblock::Superblock;
    use std::fs;
    use tempfile::TempDir;

    fn storage(temp: &TempDir) -> Storage {
        Storage::format(temp.path(), Superblock::default(), StorageOptions::default()).unwrap()
    }

    #[test]
    fn test_fresh_format_is_clean() {
        let temp = TempDir::new().unwrap();
        let report = storage(&temp).check().unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.tags, 1);
        assert_eq!(report.free_blocks, 31);
    }

    #[test]
    fn test_detects_leak_and_dangling() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let sb = storage.superblock().unwrap();
        let mut bitmap = BlockBitmap::load(storage.layout(), &sb).unwrap();
        bitmap.mark_occupied(3).unwrap();
        bitmap.save(storage.layout()).unwrap();
        fs::hard_link(
            storage.layout().physical_block(4),
            temp.path().join("stray.dat"),
        )
        .unwrap();

        let report = storage.check().unwrap();
        assert!(report.issues.contains(&Issue::Leaked { block: 3 }));
        assert!(report
            .issues
            .contains(&Issue::Dangling { block: 4, links: 2 }));
    }

    #[test]
    fn test_detects_metadata_drift() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let dir = storage.tag_dir("initial_file", "BASE").unwrap();
        fs::write(dir.metadata_path(), "SIZE=256\nBLOCKS=[0,0]\nESTADO=COMMITTED\n").unwrap();

        let report = storage.check().unwrap();
        assert!(report.issues.iter().any(|i| matches!(
            i,
            Issue::BlockCountMismatch {
                metadata: 2,
                on_disk: 1,
                ..
            }
        )));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, Issue::LinkMismatch { index: 1, .. })));
    }

    #[test]
    fn test_report_serializes() {
        let report = ConsistencyReport {
            issues: vec![Issue::Leaked { block: 9 }],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["issues"][0]["kind"], "leaked");
        assert_eq!(json["issues"][0]["block"], 9);
    }
}
