//! Recency index over stored documents.
//!
//! Maps `(collection, id)` to the entry's estimated size, ordered by last
//! access. Touch and removal are O(1); eviction candidates come off the
//! least-recently-used end.

use lru::LruCache;

use crate::types::DocId;

/// Key of a tracked document.
pub type RecencyKey = (String, DocId);

/// Access-ordered index of stored documents and their estimated sizes.
pub struct RecencyIndex {
    entries: LruCache<RecencyKey, usize>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
        }
    }

    /// Record an access, inserting or refreshing the entry.
    pub fn touch(&mut self, collection: &str, id: DocId, est_size: usize) {
        self.entries.put((collection.to_string(), id), est_size);
    }

    /// Drop the entry, returning its estimated size if it was tracked.
    pub fn remove(&mut self, collection: &str, id: DocId) -> Option<usize> {
        self.entries.pop(&(collection.to_string(), id))
    }

    pub fn contains(&self, collection: &str, id: DocId) -> bool {
        self.entries.contains(&(collection.to_string(), id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-touched entries whose cumulative estimated size reaches
    /// `target_bytes`. Returns fewer if the index runs out first.
    pub fn oldest_reaching(&self, target_bytes: usize) -> Vec<RecencyKey> {
        let mut picked = Vec::new();
        let mut total = 0usize;
        // Iteration runs most-recent first; walk it from the back.
        let snapshot: Vec<_> = self
            .entries
            .iter()
            .map(|(key, est)| (key.clone(), *est))
            .collect();
        for (key, est) in snapshot.into_iter().rev() {
            if total >= target_bytes {
                break;
            }
            total += est;
            picked.push(key);
        }
        picked
    }

    /// Entries in arbitrary order, for the random eviction policy.
    pub fn arbitrary_reaching(&self, target_bytes: usize) -> Vec<RecencyKey> {
        let mut picked = Vec::new();
        let mut total = 0usize;
        for (key, est) in self.entries.iter() {
            if total >= target_bytes {
                break;
            }
            total += *est;
            picked.push(key.clone());
        }
        picked
    }
}

impl Default for RecencyIndex {
    fn default() -> Self {
        Self::new()
    }
}
