//! Persistent content-hash index: BLAKE3 of a block's content → the
//! canonical physical block holding that content.
//!
//! Stored as `blocks_hash_index.config`, one `HEXHASH=ID` line per entry.

use std::collections::BTreeMap;
use std::fs;

use crate::error::{IoResultExt, IoStep, Result, StorageError};
use crate::kv;
use crate::layout::MountLayout;

/// BLAKE3 hash type (32 bytes)
pub type ContentHash = [u8; 32];

/// Hash a full (already zero-padded) block.
#[inline]
pub fn hash_block(data: &[u8]) -> ContentHash {
    *blake3::hash(data).as_bytes()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentHashIndex {
    entries: BTreeMap<ContentHash, u64>,
}

impl ContentHashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hash: &ContentHash) -> Option<u64> {
        self.entries.get(hash).copied()
    }

    /// Register `block` as canonical for `hash`, returning the previous block.
    pub fn insert(&mut self, hash: ContentHash, block: u64) -> Option<u64> {
        self.entries.insert(hash, block)
    }

    /// Drop every entry pointing at `block`. Used when a block is reused for
    /// new content. Returns how many entries went away.
    pub fn remove_block(&mut self, block: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, b| *b != block);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentHash, u64)> {
        self.entries.iter().map(|(h, b)| (h, *b))
    }

    pub fn load(layout: &MountLayout) -> Result<Self> {
        let path = layout.hash_index();
        let text = fs::read_to_string(&path).at(IoStep::HashIndex, &path)?;
        let mut entries = BTreeMap::new();
        for (key, value) in kv::parse(&text) {
            let hash = parse_hash(&key).ok_or_else(|| {
                StorageError::malformed(IoStep::HashIndex, &path, format!("bad hash {key:?}"))
            })?;
            let block = value.parse().map_err(|_| {
                StorageError::malformed(IoStep::HashIndex, &path, format!("bad block id {value:?}"))
            })?;
            entries.insert(hash, block);
        }
        Ok(Self { entries })
    }

    pub fn save(&self, layout: &MountLayout) -> Result<()> {
        let path = layout.hash_index();
        let mut text = String::with_capacity(self.entries.len() * 72);
        for (hash, block) in &self.entries {
            text.push_str(&hex::encode(hash));
            text.push('=');
            text.push_str(&block.to_string());
            text.push('\n');
        }
        kv::write_atomic(&path, text.as_bytes()).at(IoStep::HashIndex, &path)
    }
}

fn parse_hash(hex_str: &str) -> Option<ContentHash> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}
