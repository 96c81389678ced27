//! Lock table: striped per-tag locks plus the two global locks.
//!
//! Acquisition order is always tag → hash index → bitmap. The bitmap lock is
//! only reachable through a held [`HashIndexGuard`], so the second half of
//! that order is enforced by the type system.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of per-tag lock stripes. Distinct tags may share a stripe; that
/// only serializes them, it never deadlocks.
pub const TAG_LOCK_STRIPES: usize = 64;

#[derive(Debug)]
pub struct LockTable {
    tags: Vec<Mutex<()>>,
    hash_index: Mutex<()>,
    bitmap: Mutex<()>,
}

/// Held per-tag lock(s). Released on drop.
#[must_use = "the tag is unlocked as soon as the guard is dropped"]
pub struct TagGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: Option<MutexGuard<'a, ()>>,
}

/// Proof that the global hash-index lock is held.
#[must_use = "the hash index is unlocked as soon as the guard is dropped"]
pub struct HashIndexGuard<'a> {
    table: &'a LockTable,
    _guard: MutexGuard<'a, ()>,
}

impl HashIndexGuard<'_> {
    /// Take the bitmap lock while the hash-index lock is held.
    pub fn lock_bitmap(&self) -> MutexGuard<'_, ()> {
        acquire(&self.table.bitmap)
    }
}

// A panic while holding one of these locks leaves nothing in memory to
// repair: all shared state lives on disk.
fn acquire(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            tags: (0..TAG_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hash_index: Mutex::new(()),
            bitmap: Mutex::new(()),
        }
    }

    pub fn stripe(name: &str, tag: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        (name, tag).hash(&mut hasher);
        (hasher.finish() % TAG_LOCK_STRIPES as u64) as usize
    }

    pub fn lock_tag(&self, name: &str, tag: &str) -> TagGuard<'_> {
        TagGuard {
            _first: acquire(&self.tags[Self::stripe(name, tag)]),
            _second: None,
        }
    }

    /// Lock two tags, lower stripe first.
    pub fn lock_tag_pair(&self, a: (&str, &str), b: (&str, &str)) -> TagGuard<'_> {
        let sa = Self::stripe(a.0, a.1);
        let sb = Self::stripe(b.0, b.1);
        if sa == sb {
            return TagGuard {
                _first: acquire(&self.tags[sa]),
                _second: None,
            };
        }
        let (lo, hi) = if sa < sb { (sa, sb) } else { (sb, sa) };
        let first = acquire(&self.tags[lo]);
        let second = acquire(&self.tags[hi]);
        TagGuard {
            _first: first,
            _second: Some(second),
        }
    }

    pub fn lock_hash_index(&self) -> HashIndexGuard<'_> {
        HashIndexGuard {
            table: self,
            _guard: acquire(&self.hash_index),
        }
    }
}
