//! A single shard: bounded map of documents, partitioned by collection.

use std::collections::HashMap;

use crate::types::DocId;

/// Per-collection state within one shard.
pub(crate) struct CollectionShard {
    pub docs: HashMap<DocId, Vec<u8>>,
    /// Next identifier this shard would allocate for the collection. Seeded
    /// at shard creation so allocation stays monotonic across shards.
    pub next_id: DocId,
}

/// One fixed-capacity partition of the document index.
pub(crate) struct Shard {
    collections: HashMap<String, CollectionShard>,
    /// Live entry count across all collections in this shard.
    size: usize,
}

impl Shard {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn contains(&self, collection: &str, id: DocId) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|c| c.docs.contains_key(&id))
    }

    pub fn get(&self, collection: &str, id: DocId) -> Option<&Vec<u8>> {
        self.collections.get(collection)?.docs.get(&id)
    }

    /// Insert a new document, allocating the next identifier. `seed` becomes
    /// the collection's starting id if the collection is new to this shard.
    pub fn insert_new(&mut self, collection: &str, seed: DocId, bytes: Vec<u8>) -> DocId {
        let cshard = self
            .collections
            .entry(collection.to_string())
            .or_insert_with(|| CollectionShard {
                docs: HashMap::new(),
                next_id: seed,
            });
        let id = cshard.next_id;
        cshard.next_id += 1;
        cshard.docs.insert(id, bytes);
        self.size += 1;
        id
    }

    /// Replace a document in place, returning the previous bytes.
    pub fn replace(&mut self, collection: &str, id: DocId, bytes: Vec<u8>) -> Option<Vec<u8>> {
        let cshard = self.collections.get_mut(collection)?;
        let slot = cshard.docs.get_mut(&id)?;
        Some(std::mem::replace(slot, bytes))
    }

    pub fn remove(&mut self, collection: &str, id: DocId) -> Option<Vec<u8>> {
        let removed = self.collections.get_mut(collection)?.docs.remove(&id)?;
        self.size -= 1;
        Some(removed)
    }

    /// The collection's next id in this shard, if the collection exists here.
    pub fn next_id(&self, collection: &str) -> Option<DocId> {
        self.collections.get(collection).map(|c| c.next_id)
    }

    /// Pre-create a collection entry with a seeded id counter.
    pub fn seed_collection(&mut self, collection: &str, next_id: DocId) {
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| CollectionShard {
                docs: HashMap::new(),
                next_id,
            });
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &String> {
        self.collections.keys()
    }

    /// Documents of one collection held by this shard.
    pub fn docs(&self, collection: &str) -> impl Iterator<Item = (DocId, &Vec<u8>)> {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|c| c.docs.iter().map(|(id, bytes)| (*id, bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_allocates_from_seed() {
        let mut shard = Shard::new();
        assert_eq!(shard.insert_new("c", 0, b"a".to_vec()), 0);
        assert_eq!(shard.insert_new("c", 0, b"b".to_vec()), 1);
        assert_eq!(shard.len(), 2);
        assert_eq!(shard.next_id("c"), Some(2));
    }

    #[test]
    fn test_seed_applies_only_to_new_collections() {
        let mut shard = Shard::new();
        shard.insert_new("c", 5, b"a".to_vec());
        // Later seeds are ignored once the collection exists here.
        assert_eq!(shard.insert_new("c", 99, b"b".to_vec()), 6);
    }

    #[test]
    fn test_remove_decrements_size() {
        let mut shard = Shard::new();
        let id = shard.insert_new("c", 0, b"a".to_vec());
        assert_eq!(shard.remove("c", id), Some(b"a".to_vec()));
        assert_eq!(shard.len(), 0);
        assert_eq!(shard.remove("c", id), None);
        // The id counter never rewinds.
        assert_eq!(shard.next_id("c"), Some(1));
    }

    #[test]
    fn test_replace_keeps_size() {
        let mut shard = Shard::new();
        let id = shard.insert_new("c", 0, b"old".to_vec());
        assert_eq!(shard.replace("c", id, b"new".to_vec()), Some(b"old".to_vec()));
        assert_eq!(shard.get("c", id), Some(&b"new".to_vec()));
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.replace("c", 42, b"x".to_vec()), None);
    }

    #[test]
    fn test_collections_isolated() {
        let mut shard = Shard::new();
        shard.insert_new("a", 0, b"1".to_vec());
        shard.insert_new("b", 0, b"2".to_vec());
        assert!(shard.contains("a", 0));
        assert!(shard.contains("b", 0));
        assert!(!shard.contains("a", 1));
        assert_eq!(shard.len(), 2);
    }
}
