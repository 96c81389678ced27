//! Filesystem geometry, written once at format time.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, IoStep, Result, StorageError};
use crate::kv;
use crate::layout::MountLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// Total pool size in bytes
    pub fs_size: u64,
    /// Size of every physical block in bytes
    pub block_size: u64,
}

impl Default for Superblock {
    fn default() -> Self {
        Self {
            fs_size: 4096,
            block_size: 128,
        }
    }
}

impl Superblock {
    /// Validated geometry: `block_size > 0` and `fs_size` a positive multiple of it.
    pub fn new(fs_size: u64, block_size: u64) -> Result<Self> {
        if block_size == 0 || fs_size < block_size || fs_size % block_size != 0 {
            return Err(StorageError::InvalidGeometry {
                fs_size,
                block_size,
            });
        }
        Ok(Self {
            fs_size,
            block_size,
        })
    }

    pub fn total_blocks(&self) -> u64 {
        self.fs_size / self.block_size
    }

    /// Bytes needed to hold one bit per block.
    pub fn bitmap_len(&self) -> usize {
        self.total_blocks().div_ceil(8) as usize
    }

    /// Number of blocks needed to hold `size_bytes`.
    pub fn blocks_for(&self, size_bytes: u64) -> u64 {
        size_bytes.div_ceil(self.block_size)
    }

    pub fn load(layout: &MountLayout) -> Result<Self> {
        let path = layout.superblock();
        let text = fs::read_to_string(&path).at(IoStep::Superblock, &path)?;
        let map = kv::parse(&text);

        let field = |key: &str| -> Result<u64> {
            map.get(key)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    StorageError::malformed(IoStep::Superblock, &path, format!("missing {key}"))
                })
        };
        let fs_size = field("FS_SIZE")?;
        let block_size = field("BLOCK_SIZE")?;

        Self::new(fs_size, block_size)
            .map_err(|e| StorageError::malformed(IoStep::Superblock, &path, e.to_string()))
    }

    pub fn save(&self, layout: &MountLayout) -> Result<()> {
        let path = layout.superblock();
        let text = format!("FS_SIZE={}\nBLOCK_SIZE={}\n", self.fs_size, self.block_size);
        kv::write_atomic(&path, text.as_bytes()).at(IoStep::Superblock, &path)
    }
}
