//! Occupancy bitmap for the physical block pool.
//!
//! One bit per block, packed MSB-first, persisted wholesale to `bitmap.bin`
//! on every mutation. A set bit means at least one logical block links to
//! the physical block (block 0 is always set).

use std::fs;

use crate::error::{IoResultExt, IoStep, Result, StorageError};
use crate::kv;
use crate::layout::MountLayout;
use crate::superblock::Superblock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBitmap {
    bits: Vec<u8>,
    total_blocks: u64,
}

impl BlockBitmap {
    /// All blocks free.
    pub fn new(total_blocks: u64) -> Self {
        Self {
            bits: vec![0u8; total_blocks.div_ceil(8) as usize],
            total_blocks,
        }
    }

    /// Fresh bitmap as written by the formatter: only the zero block is occupied.
    pub fn formatted(total_blocks: u64) -> Self {
        let mut bitmap = Self::new(total_blocks);
        if total_blocks > 0 {
            bitmap.bits[0] = 0x80;
        }
        bitmap
    }

    pub fn from_bytes(bits: Vec<u8>, total_blocks: u64) -> Option<Self> {
        if bits.len() != total_blocks.div_ceil(8) as usize {
            return None;
        }
        Some(Self { bits, total_blocks })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn locate(&self, index: u64) -> Result<(usize, u8)> {
        if index >= self.total_blocks {
            return Err(StorageError::BlockOutOfRange {
                index,
                limit: self.total_blocks,
            });
        }
        Ok(((index / 8) as usize, 0x80 >> (index % 8)))
    }

    pub fn is_free(&self, index: u64) -> Result<bool> {
        let (byte, mask) = self.locate(index)?;
        Ok(self.bits[byte] & mask == 0)
    }

    pub fn mark_occupied(&mut self, index: u64) -> Result<()> {
        let (byte, mask) = self.locate(index)?;
        self.bits[byte] |= mask;
        Ok(())
    }

    pub fn mark_free(&mut self, index: u64) -> Result<()> {
        let (byte, mask) = self.locate(index)?;
        self.bits[byte] &= !mask;
        Ok(())
    }

    /// Lowest free block. Block 0 is never handed out.
    pub fn first_free(&self) -> Option<u64> {
        (1..self.total_blocks).find(|&i| matches!(self.is_free(i), Ok(true)))
    }

    pub fn count_free(&self) -> u64 {
        (0..self.total_blocks)
            .filter(|&i| matches!(self.is_free(i), Ok(true)))
            .count() as u64
    }

    pub fn load(layout: &MountLayout, superblock: &Superblock) -> Result<Self> {
        let path = layout.bitmap();
        let bits = fs::read(&path).at(IoStep::Bitmap, &path)?;
        let len = bits.len();
        Self::from_bytes(bits, superblock.total_blocks()).ok_or_else(|| {
            StorageError::malformed(
                IoStep::Bitmap,
                &path,
                format!("{} bytes, expected {}", len, superblock.bitmap_len()),
            )
        })
    }

    pub fn save(&self, layout: &MountLayout) -> Result<()> {
        let path = layout.bitmap();
        kv::write_atomic(&path, &self.bits).at(IoStep::Bitmap, &path)
    }
}
