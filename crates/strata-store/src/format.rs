//! Fresh-start formatting of a mount point.

use std::fs;

use tracing::info;

use crate::bitmap::BlockBitmap;
use crate::directory::TagDir;
use crate::error::{IoResultExt, IoStep, Result};
use crate::hash_index::ContentHashIndex;
use crate::layout::MountLayout;
use crate::metadata::{TagMetadata, TagState};
use crate::physical::{PhysicalBlockStore, ZERO_BLOCK};
use crate::superblock::Superblock;

/// File and tag every freshly formatted filesystem starts with.
pub const INITIAL_FILE: &str = "initial_file";
pub const INITIAL_TAG: &str = "BASE";

/// Wipe the mount point and lay down superblock, bitmap, empty hash index,
/// the physical block pool and `initial_file:BASE`.
///
/// The mount point itself must already exist and be a directory.
pub fn format_mount(layout: &MountLayout, superblock: Superblock) -> Result<()> {
    let root = layout.root();
    wipe(layout)?;

    superblock.save(layout)?;
    BlockBitmap::formatted(superblock.total_blocks()).save(layout)?;
    ContentHashIndex::new().save(layout)?;
    PhysicalBlockStore::new(layout, superblock).create_all()?;

    let files = layout.files_dir();
    fs::create_dir(&files).at(IoStep::CreateDir, &files)?;

    let initial = TagDir::new(layout, INITIAL_FILE, INITIAL_TAG)?;
    initial.create()?;
    initial.link_logical(0, &layout.physical_block(ZERO_BLOCK))?;
    initial.save_metadata(&TagMetadata {
        size_bytes: superblock.block_size,
        blocks: vec![ZERO_BLOCK],
        state: TagState::Committed,
    })?;

    info!(
        mount_point = %root.display(),
        total_blocks = superblock.total_blocks(),
        block_size = superblock.block_size,
        "Filesystem formatted"
    );
    Ok(())
}

/// Remove everything inside the mount point, keeping the directory itself.
fn wipe(layout: &MountLayout) -> Result<()> {
    let root = layout.root();
    let meta = fs::metadata(root).at(IoStep::Wipe, root)?;
    if !meta.is_dir() {
        return Err(std::io::Error::other("mount point is not a directory")).at(IoStep::Wipe, root);
    }
    for entry in fs::read_dir(root).at(IoStep::Wipe, root)? {
        let entry = entry.at(IoStep::Wipe, root)?;
        let path = entry.path();
        if entry.file_type().at(IoStep::Wipe, &path)?.is_dir() {
            fs::remove_dir_all(&path).at(IoStep::Wipe, &path)?;
        } else {
            fs::remove_file(&path).at(IoStep::Wipe, &path)?;
        }
    }
    Ok(())
}
