//! Deduplicating store of the listings currently known for one query
//!
//! Keyed by item hash, snapshots come back in insertion order.

use indexmap::IndexMap;

use crate::models::Item;

/// Outcome of merging a batch of items into the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub upserted: usize,
    pub removed: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct ItemCache {
    items: IndexMap<String, Item>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self {
            items: IndexMap::new(),
        }
    }

    /// Insert or overwrite by hash.
    ///
    /// Returns false (and stores nothing) for an item without a hash.
    pub fn upsert(&mut self, item: Item) -> bool {
        if !item.has_hash() {
            return false;
        }
        self.items.insert(item.hash.clone(), item);
        true
    }

    /// Remove by hash; missing keys are ignored
    pub fn remove(&mut self, hash: &str) -> bool {
        self.items.shift_remove(hash).is_some()
    }

    /// Merge a batch: removed listings are dropped, everything else upserted
    pub fn apply(&mut self, items: impl IntoIterator<Item = Item>) -> MergeStats {
        let mut stats = MergeStats::default();
        for item in items {
            if !item.has_hash() {
                stats.skipped += 1;
            } else if item.is_removed() {
                if self.remove(&item.hash) {
                    stats.removed += 1;
                }
            } else if self.upsert(item) {
                stats.upserted += 1;
            }
        }
        stats
    }

    pub fn snapshot(&self) -> Vec<Item> {
        self.items.values().cloned().collect()
    }

    pub fn hashes(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.items.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&Item> {
        self.items.get(hash)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
