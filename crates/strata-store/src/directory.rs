//! `files/<name>/<tag>/`: the logical blocks and metadata of one tag.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IoResultExt, IoStep, Result, StorageError};
use crate::kv;
use crate::layout::{self, MountLayout, BLOCK_EXT, LOGICAL_BLOCKS_DIR, METADATA_FILE};
use crate::metadata::TagMetadata;

/// Handle on one File:Tag directory. Creating the handle touches nothing on
/// disk; names are validated up front.
#[derive(Debug, Clone)]
pub struct TagDir {
    name: String,
    tag: String,
    dir: PathBuf,
}

impl TagDir {
    pub fn new(layout: &MountLayout, name: &str, tag: &str) -> Result<Self> {
        layout::validate_component(name)?;
        layout::validate_component(tag)?;
        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
            dir: layout.tag_dir(name, tag),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn logical_dir(&self) -> PathBuf {
        self.dir.join(LOGICAL_BLOCKS_DIR)
    }

    /// `logical_blocks/000003.dat`
    pub fn logical_block(&self, index: usize) -> PathBuf {
        self.logical_dir().join(format!("{:06}.{}", index, BLOCK_EXT))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub(crate) fn missing(&self) -> StorageError {
        StorageError::missing(&self.name, &self.tag)
    }

    /// Create the tag directory, its `logical_blocks/` and an empty
    /// `WORK_IN_PROGRESS` metadata record. The File directory may already exist.
    pub fn create(&self) -> Result<()> {
        if let Some(file_dir) = self.dir.parent() {
            fs::create_dir_all(file_dir).at(IoStep::CreateDir, file_dir)?;
        }
        match fs::create_dir(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileTagExists {
                    name: self.name.clone(),
                    tag: self.tag.clone(),
                });
            }
            Err(e) => return Err(e).at(IoStep::CreateDir, &self.dir),
        }
        let logical = self.logical_dir();
        fs::create_dir(&logical).at(IoStep::CreateDir, &logical)?;
        self.save_metadata(&TagMetadata::default())
    }

    /// Missing directory, missing file and unparsable content all read as
    /// "this tag does not exist".
    pub fn read_metadata(&self) -> Result<TagMetadata> {
        let path = self.metadata_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Metadata unreadable");
                return Err(self.missing());
            }
        };
        TagMetadata::parse(&text).ok_or_else(|| {
            debug!(path = %path.display(), "Metadata unparsable");
            self.missing()
        })
    }

    pub fn save_metadata(&self, metadata: &TagMetadata) -> Result<()> {
        let path = self.metadata_path();
        kv::write_atomic(&path, metadata.render().as_bytes()).at(IoStep::Metadata, &path)
    }

    /// New hard link `logical_blocks/<index>` → `physical`.
    pub fn link_logical(&self, index: usize, physical: &Path) -> Result<()> {
        let target = self.logical_block(index);
        fs::hard_link(physical, &target).at(IoStep::Link, &target)
    }

    /// Point an existing logical block at another physical block. The new link
    /// is staged under a temp name and renamed over the old one.
    pub fn relink_logical(&self, index: usize, physical: &Path) -> Result<()> {
        let target = self.logical_block(index);
        let staged = target.with_extension("relink");
        let _ = fs::remove_file(&staged);
        fs::hard_link(physical, &staged).at(IoStep::Link, &staged)?;
        if let Err(e) = fs::rename(&staged, &target) {
            let _ = fs::remove_file(&staged);
            return Err(e).at(IoStep::Link, &target);
        }
        Ok(())
    }

    pub fn unlink_logical(&self, index: usize) -> Result<()> {
        let target = self.logical_block(index);
        fs::remove_file(&target).at(IoStep::Unlink, &target)
    }

    /// Number of `.dat` files under `logical_blocks/`.
    pub fn logical_count(&self) -> Result<usize> {
        let dir = self.logical_dir();
        let mut count = 0;
        for entry in fs::read_dir(&dir).at(IoStep::Stat, &dir)? {
            let entry = entry.at(IoStep::Stat, &dir)?;
            if entry.path().extension().is_some_and(|ext| ext == BLOCK_EXT) {
                count += 1;
            }
        }
        Ok(count)
    }
}
