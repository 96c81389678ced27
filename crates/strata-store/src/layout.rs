//! Paths inside a mount point.
//!
//! ```text
//! <mount_point>/
//! ├── superblock.config
//! ├── bitmap.bin
//! ├── blocks_hash_index.config
//! ├── physical_blocks/blockNNNN.dat
//! └── files/<name>/<tag>/
//!     ├── logical_blocks/NNNNNN.dat
//!     └── metadata.config
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};

pub const SUPERBLOCK_FILE: &str = "superblock.config";
pub const BITMAP_FILE: &str = "bitmap.bin";
pub const HASH_INDEX_FILE: &str = "blocks_hash_index.config";
pub const PHYSICAL_BLOCKS_DIR: &str = "physical_blocks";
pub const FILES_DIR: &str = "files";
pub const LOGICAL_BLOCKS_DIR: &str = "logical_blocks";
pub const METADATA_FILE: &str = "metadata.config";
pub const BLOCK_EXT: &str = "dat";

#[derive(Debug, Clone)]
pub struct MountLayout {
    root: PathBuf,
}

impl MountLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn superblock(&self) -> PathBuf {
        self.root.join(SUPERBLOCK_FILE)
    }

    pub fn bitmap(&self) -> PathBuf {
        self.root.join(BITMAP_FILE)
    }

    pub fn hash_index(&self) -> PathBuf {
        self.root.join(HASH_INDEX_FILE)
    }

    pub fn physical_dir(&self) -> PathBuf {
        self.root.join(PHYSICAL_BLOCKS_DIR)
    }

    /// `physical_blocks/block0007.dat`
    pub fn physical_block(&self, id: u64) -> PathBuf {
        self.physical_dir().join(format!("block{:04}.{}", id, BLOCK_EXT))
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn file_dir(&self, name: &str) -> PathBuf {
        self.files_dir().join(name)
    }

    pub fn tag_dir(&self, name: &str, tag: &str) -> PathBuf {
        self.file_dir(name).join(tag)
    }
}

/// Recover the block index from a `blockNNNN.dat` file name.
pub fn parse_physical_block_id(path: &Path) -> Option<u64> {
    let file_name = path.file_name()?.to_str()?;
    file_name
        .strip_prefix("block")?
        .strip_suffix(".dat")?
        .parse()
        .ok()
}

/// File and tag names become directory names, so each must be exactly one
/// normal path component.
pub fn validate_component(component: &str) -> Result<()> {
    let bad = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
        || component.contains('\0');
    if bad {
        return Err(StorageError::InvalidName(component.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_block_names_are_zero_padded() {
        let layout = MountLayout::new("/mnt/strata");
        assert_eq!(
            layout.physical_block(7),
            PathBuf::from("/mnt/strata/physical_blocks/block0007.dat")
        );
        assert_eq!(
            layout.physical_block(12345),
            PathBuf::from("/mnt/strata/physical_blocks/block12345.dat")
        );
    }

    #[test]
    fn test_parse_physical_block_id() {
        let layout = MountLayout::new("/mnt/strata");
        assert_eq!(parse_physical_block_id(&layout.physical_block(31)), Some(31));
        assert_eq!(parse_physical_block_id(Path::new("/x/000001.dat")), None);
        assert_eq!(parse_physical_block_id(Path::new("/x/blockXY.dat")), None);
    }

    #[test]
    fn test_validate_component() {
        assert!(validate_component("initial_file").is_ok());
        assert!(validate_component("v1.2").is_ok());
        for bad in ["", ".", "..", "a/b", "nul\0"] {
            assert!(matches!(
                validate_component(bad),
                Err(StorageError::InvalidName(_))
            ));
        }
    }
}
