use std::collections::HashMap;

use common::{BlockKey, BlockMatrix};
use tracing::debug;

/// What the cache knows about a tracked block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// A fetch or subscription is in flight but nothing has arrived.
    Pending,
    Resolved {
        matrix: BlockMatrix,
        /// Simulation generation, when the source carried one.
        generation: Option<u64>,
    },
}

impl CacheEntry {
    pub fn matrix(&self) -> Option<&BlockMatrix> {
        match self {
            CacheEntry::Pending => None,
            CacheEntry::Resolved { matrix, .. } => Some(matrix),
        }
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            CacheEntry::Pending => None,
            CacheEntry::Resolved { generation, .. } => *generation,
        }
    }
}

/// Result of a gated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The key is under local edit; the write was dropped.
    Locked,
    /// The key is not tracked (never visible, or already evicted).
    Untracked,
    /// The write carried an older generation than the cached one.
    Outdated,
}

/// The single block under local edit.
///
/// When the block is evicted while locked its matrix is parked here, so
/// panning back resumes the edit instead of showing server state.
#[derive(Debug, Clone)]
struct EditLock {
    key: BlockKey,
    parked: Option<BlockMatrix>,
}

/// Last-known matrix per tracked block, plus the edit lock.
#[derive(Debug, Default)]
pub struct BlockCache {
    entries: HashMap<BlockKey, CacheEntry>,
    edit_lock: Option<EditLock>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BlockKey) -> Option<&BlockMatrix> {
        self.entries.get(key).and_then(CacheEntry::matrix)
    }

    pub fn entry(&self, key: &BlockKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, CacheEntry::Pending))
            .count()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BlockKey> {
        self.entries.keys()
    }

    /// Start tracking a block: absent becomes pending, or the parked edit
    /// matrix comes back if this is the locked block. Tracked entries are
    /// left alone. Returns true when the key was absent.
    pub fn track(&mut self, key: BlockKey) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        let restored = self
            .edit_lock
            .as_mut()
            .filter(|lock| lock.key == key)
            .and_then(|lock| lock.parked.take());
        let entry = match restored {
            Some(matrix) => {
                debug!("Resuming edit of block {}", key);
                CacheEntry::Resolved {
                    matrix,
                    generation: None,
                }
            }
            None => CacheEntry::Pending,
        };
        self.entries.insert(key, entry);
        true
    }

    /// Write a matrix received from the server. Dropped when the key is
    /// locked for edit or not tracked.
    pub fn set(&mut self, key: &BlockKey, matrix: BlockMatrix) -> WriteOutcome {
        self.write(key, matrix, None)
    }

    /// Like [`set`](Self::set), and additionally dropped when `generation`
    /// is older than what the cache already holds.
    pub fn set_generation(
        &mut self,
        key: &BlockKey,
        matrix: BlockMatrix,
        generation: u64,
    ) -> WriteOutcome {
        self.write(key, matrix, Some(generation))
    }

    fn write(&mut self, key: &BlockKey, matrix: BlockMatrix, generation: Option<u64>) -> WriteOutcome {
        if self.is_locked(key) {
            return WriteOutcome::Locked;
        }
        let Some(entry) = self.entries.get_mut(key) else {
            return WriteOutcome::Untracked;
        };
        let current = entry.generation();
        if let (Some(incoming), Some(current)) = (generation, current) {
            if incoming < current {
                return WriteOutcome::Outdated;
            }
        }
        // A write without a generation keeps the one already seen.
        *entry = CacheEntry::Resolved {
            matrix,
            generation: generation.or(current),
        };
        WriteOutcome::Applied
    }

    /// Write a locally authored matrix, bypassing the edit-lock check.
    /// Takes the lock for `key` when no block is locked. Returns whether
    /// `key` holds the lock afterwards.
    pub fn set_authoritative(&mut self, key: &BlockKey, matrix: BlockMatrix) -> bool {
        let generation = self.entries.get(key).and_then(CacheEntry::generation);
        self.entries
            .insert(key.clone(), CacheEntry::Resolved { matrix, generation });
        if self.edit_lock.is_none() {
            self.edit_lock = Some(EditLock {
                key: key.clone(),
                parked: None,
            });
        }
        self.is_locked(key)
    }

    /// Drop a block's entry. A locked block's matrix is parked in the lock;
    /// a locked block with nothing to park loses the lock.
    pub fn evict(&mut self, key: &BlockKey) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        if let Some(lock) = self.edit_lock.as_mut().filter(|lock| &lock.key == key) {
            match removed.matrix() {
                Some(matrix) => lock.parked = Some(matrix.clone()),
                None => {
                    debug!("Releasing edit lock on evicted block {}", key);
                    self.edit_lock = None;
                }
            }
        }
        Some(removed)
    }

    /// Take the edit lock. Locking a second block while one is held fails
    /// with the holder's key; the caller must [`unlock`](Self::unlock) first.
    pub fn lock_for_edit(&mut self, key: &BlockKey) -> Result<(), BlockKey> {
        match &self.edit_lock {
            Some(lock) if &lock.key == key => Ok(()),
            Some(lock) => Err(lock.key.clone()),
            None => {
                self.edit_lock = Some(EditLock {
                    key: key.clone(),
                    parked: None,
                });
                Ok(())
            }
        }
    }

    /// Release the edit lock, returning the key that held it.
    pub fn unlock(&mut self) -> Option<BlockKey> {
        self.edit_lock.take().map(|lock| lock.key)
    }

    pub fn edit_lock(&self) -> Option<&BlockKey> {
        self.edit_lock.as_ref().map(|lock| &lock.key)
    }

    pub fn is_locked(&self, key: &BlockKey) -> bool {
        self.edit_lock().is_some_and(|k| k == key)
    }

    /// Drop every entry and the lock.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.edit_lock = None;
    }
}
