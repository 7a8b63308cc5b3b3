//! The sharded document index.
//!
//! Documents live in a list of fixed-capacity shards; the active shard
//! receives inserts and rotates out when full. Identifier allocation is
//! monotonic across shards: a freshly spawned shard inherits every
//! collection's current next id. Reads scan shards linearly (at most one
//! shard owns any id); writes serialize on the shard-list write lock, which
//! doubles as the rotation lock, so allocation order, commit order and log
//! order all agree.

mod shard;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::aof::AppendLog;
use crate::codec::decode_doc;
use crate::memory::estimate::estimate_payload;
use crate::memory::governor::MemoryGovernor;
use crate::query::Where;
use crate::response::Response;
use crate::types::{DocId, DocRecord, FoundDoc};

use shard::Shard;

/// Bulk writes above this size fall back to chunked ingest when refused.
const CHUNKED_FALLBACK_MIN_DOCS: usize = 10_000;

/// Per-document allocator/map overhead added to bulk estimates.
const BULK_PER_DOC_OVERHEAD: usize = 32;

/// Per-document bookkeeping overhead, capped across the whole call.
const BULK_BOOKKEEPING_PER_DOC: usize = 50;
const BULK_BOOKKEEPING_CAP: usize = 512 * 1024;

/// Chunk-size bounds for chunked ingest.
const CHUNK_MIN_DOCS: usize = 1000;
const CHUNK_MAX_DOCS: usize = 50_000;

/// Below this much headroom, chunks are capped harder.
const LOW_MEMORY_BYTES: u64 = 100 * 1024 * 1024;
const LOW_MEMORY_CHUNK_CAP: usize = 5000;

struct ShardList {
    shards: Vec<Shard>,
    active: usize,
}

/// The sharded key-to-bytes store.
pub struct ShardSet {
    shards: RwLock<ShardList>,
    capacity: usize,
    governor: Arc<MemoryGovernor>,
    log: AppendLog,
    /// In-flight bulk write tokens; cleared on emergency as a best-effort
    /// cancellation handle.
    bulk_tokens: Mutex<HashSet<u64>>,
    next_token: AtomicU64,
}

impl ShardSet {
    pub fn new(capacity: usize, governor: Arc<MemoryGovernor>, log: AppendLog) -> Self {
        Self {
            shards: RwLock::new(ShardList {
                shards: vec![Shard::new()],
                active: 0,
            }),
            capacity,
            governor,
            log,
            bulk_tokens: Mutex::new(HashSet::new()),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.governor
    }

    pub fn shard_count(&self) -> usize {
        self.shards.read().shards.len()
    }

    /// Record bytes accepted by the append log so far.
    pub fn log_bytes(&self) -> u64 {
        self.log.len()
    }

    /// Flush the append log through to its file.
    pub fn flush_log(&self) -> Result<(), crate::error::LogError> {
        self.log.flush()
    }

    // -----------------------------------------------------------------------
    // Single-document operations
    // -----------------------------------------------------------------------

    pub fn get(&self, collection: &str, id: DocId) -> Response<DocRecord> {
        let list = self.shards.read();
        for shard in &list.shards {
            if let Some(bytes) = shard.get(collection, id) {
                self.governor
                    .record_access(collection, id, estimate_payload(bytes));
                return Response::ok(DocRecord {
                    id,
                    bytes: bytes.clone(),
                });
            }
        }
        Response::error()
    }

    pub fn set(&self, collection: &str, bytes: Vec<u8>) -> Response<DocId> {
        let est = estimate_payload(&bytes);
        let id = {
            let mut list = self.shards.write();
            Self::rotate_if_full(&mut list, self.capacity);
            if let Err(e) = self.log.add_record(&bytes) {
                error!(collection, error = %e, "log append failed; insert aborted");
                return Response::error();
            }
            let seed = Self::global_next_id(&list, collection);
            let active = list.active;
            list.shards[active].insert_new(collection, seed, bytes)
        };
        self.governor.record_access(collection, id, est);
        self.governor.add_tracked(est);
        Response::ok(id)
    }

    /// Replace a document in place. Updates are not journalled and do not
    /// refresh recency.
    pub fn update(&self, collection: &str, id: DocId, bytes: Vec<u8>) -> Response<DocRecord> {
        let new_est = estimate_payload(&bytes);
        let old_est = {
            let mut list = self.shards.write();
            let Some(idx) = Self::owning_shard(&list, collection, id) else {
                return Response::error();
            };
            match list.shards[idx].replace(collection, id, bytes.clone()) {
                Some(old) => estimate_payload(&old),
                None => return Response::error(),
            }
        };
        self.governor.sub_tracked(old_est);
        self.governor.add_tracked(new_est);
        Response::ok(DocRecord { id, bytes })
    }

    pub fn delete(&self, collection: &str, id: DocId) -> Response<DocId> {
        let old = {
            let mut list = self.shards.write();
            let Some(idx) = Self::owning_shard(&list, collection, id) else {
                return Response::error();
            };
            match list.shards[idx].remove(collection, id) {
                Some(old) => old,
                None => return Response::error(),
            }
        };
        self.governor.remove_entry(collection, id);
        self.governor.sub_tracked(estimate_payload(&old));
        Response::ok(id)
    }

    // -----------------------------------------------------------------------
    // Bulk operations
    // -----------------------------------------------------------------------

    /// Per-id lookup; misses are skipped silently.
    pub fn get_many(&self, collection: &str, ids: &[DocId]) -> Response<BTreeMap<DocId, Vec<u8>>> {
        let mut found = BTreeMap::new();
        let mut touched = Vec::new();
        {
            let list = self.shards.read();
            for &id in ids {
                for shard in &list.shards {
                    if let Some(bytes) = shard.get(collection, id) {
                        touched.push((id, estimate_payload(bytes)));
                        found.insert(id, bytes.clone());
                        break;
                    }
                }
            }
        }
        self.governor.record_access_bulk(collection, &touched);
        Response::ok(found)
    }

    /// Admission-controlled bulk insert. All ids are allocated and all
    /// documents stored, or the call reports `ERROR` with nothing committed
    /// (refusal happens before any mutation).
    pub fn set_many(&self, collection: &str, docs: Vec<Vec<u8>>) -> Response<Vec<DocId>> {
        self.set_many_inner(collection, docs, false)
    }

    fn set_many_inner(
        &self,
        collection: &str,
        docs: Vec<Vec<u8>>,
        is_chunked: bool,
    ) -> Response<Vec<DocId>> {
        let n = docs.len();
        if n == 0 {
            return Response::ok(Vec::new());
        }

        let payload_est: usize = docs.iter().map(|d| estimate_payload(d)).sum();
        let est = payload_est
            + BULK_PER_DOC_OVERHEAD * n
            + (BULK_BOOKKEEPING_PER_DOC * n).min(BULK_BOOKKEEPING_CAP);

        if !self.governor.can_allocate(est) {
            if n > CHUNKED_FALLBACK_MIN_DOCS && !is_chunked {
                return self.set_many_chunked(collection, docs, est);
            }
            warn!(
                collection,
                docs = n,
                estimated = est,
                "bulk write refused; stopping memory monitor"
            );
            self.governor.stop_monitoring();
            return Response::error();
        }
        if self.governor.over_limit() {
            warn!(collection, docs = n, "memory limits breached; bulk write rejected");
            return Response::error();
        }

        let mut ids = Vec::with_capacity(n);
        let mut touched = Vec::with_capacity(n);
        let mut tracked = 0usize;
        {
            let mut list = self.shards.write();
            for bytes in docs {
                Self::rotate_if_full(&mut list, self.capacity);
                if let Err(e) = self.log.add_record(&bytes) {
                    error!(collection, error = %e, "log append failed during bulk write");
                    return Response::error();
                }
                let per_est = estimate_payload(&bytes);
                let seed = Self::global_next_id(&list, collection);
                let active = list.active;
                let id = list.shards[active].insert_new(collection, seed, bytes);
                ids.push(id);
                touched.push((id, per_est));
                tracked += per_est;
            }
        }
        self.governor.record_access_bulk(collection, &touched);
        self.governor.add_tracked(tracked);
        Response::ok(ids)
    }

    /// Chunked ingest: split the refused bulk into windows sized to the
    /// current headroom and admit each window independently.
    fn set_many_chunked(
        &self,
        collection: &str,
        docs: Vec<Vec<u8>>,
        est: usize,
    ) -> Response<Vec<DocId>> {
        let n = docs.len();
        let available = self.governor.available_bytes();
        let per_doc = (est / n).max(1);
        let mut chunk =
            ((available as f64 * 0.8) as usize / per_doc).clamp(CHUNK_MIN_DOCS, CHUNK_MAX_DOCS);
        if available < LOW_MEMORY_BYTES {
            chunk = chunk.min(LOW_MEMORY_CHUNK_CAP);
        }
        info!(collection, docs = n, chunk, "falling back to chunked bulk ingest");

        let token = self.register_bulk();
        let mut ids = Vec::with_capacity(n);
        let mut remaining = docs.into_iter();
        loop {
            let window: Vec<Vec<u8>> = remaining.by_ref().take(chunk).collect();
            if window.is_empty() {
                break;
            }
            if !self.bulk_alive(token) {
                warn!(collection, committed = ids.len(), "chunked bulk ingest cancelled");
                return Response::error();
            }
            match self.set_many_inner(collection, window, true).into_data() {
                Some(mut chunk_ids) => ids.append(&mut chunk_ids),
                None => {
                    self.release_bulk(token);
                    return Response::error();
                }
            }
        }
        self.release_bulk(token);
        Response::ok(ids)
    }

    /// Iterated update; `ERROR` on the first missing id. Entries already
    /// written stay written.
    pub fn update_many(
        &self,
        collection: &str,
        entries: Vec<(DocId, Vec<u8>)>,
    ) -> Response<Vec<DocRecord>> {
        let mut updated = Vec::with_capacity(entries.len());
        let mut list = self.shards.write();
        for (id, bytes) in entries {
            let Some(idx) = Self::owning_shard(&list, collection, id) else {
                return Response::error();
            };
            let Some(old) = list.shards[idx].replace(collection, id, bytes.clone()) else {
                return Response::error();
            };
            self.governor.sub_tracked(estimate_payload(&old));
            self.governor.add_tracked(estimate_payload(&bytes));
            updated.push(DocRecord { id, bytes });
        }
        Response::ok(updated)
    }

    /// Like `update_many`, but every id is validated before any write, so a
    /// miss leaves the store untouched.
    pub fn replace_many(
        &self,
        collection: &str,
        entries: Vec<(DocId, Vec<u8>)>,
    ) -> Response<Vec<DocRecord>> {
        let mut list = self.shards.write();
        for (id, _) in &entries {
            if Self::owning_shard(&list, collection, *id).is_none() {
                return Response::error();
            }
        }
        let mut updated = Vec::with_capacity(entries.len());
        for (id, bytes) in entries {
            let Some(idx) = Self::owning_shard(&list, collection, id) else {
                return Response::error();
            };
            let Some(old) = list.shards[idx].replace(collection, id, bytes.clone()) else {
                return Response::error();
            };
            self.governor.sub_tracked(estimate_payload(&old));
            self.governor.add_tracked(estimate_payload(&bytes));
            updated.push(DocRecord { id, bytes });
        }
        Response::ok(updated)
    }

    /// Iterated delete; reports the ids actually removed and stays `OK`
    /// even when some were already gone.
    pub fn delete_many(&self, collection: &str, ids: &[DocId]) -> Response<Vec<DocId>> {
        let mut removed = Vec::new();
        let mut list = self.shards.write();
        for &id in ids {
            let Some(idx) = Self::owning_shard(&list, collection, id) else {
                continue;
            };
            if let Some(old) = list.shards[idx].remove(collection, id) {
                self.governor.remove_entry(collection, id);
                self.governor.sub_tracked(estimate_payload(&old));
                removed.push(id);
            }
        }
        Response::ok(removed)
    }

    /// Full scan across every shard, evaluating the predicate per document.
    pub fn find(&self, collection: &str, filter: &Where) -> Response<Vec<FoundDoc>> {
        let mut found = Vec::new();
        let list = self.shards.read();
        for shard in &list.shards {
            for (id, bytes) in shard.docs(collection) {
                match decode_doc(bytes) {
                    Ok(doc) => {
                        if filter.eval(&doc) {
                            found.push(FoundDoc { id, doc });
                        }
                    }
                    Err(e) => {
                        debug!(collection, id, error = %e, "skipping undecodable document")
                    }
                }
            }
        }
        found.sort_by_key(|f| f.id);
        Response::ok(found)
    }

    // -----------------------------------------------------------------------
    // Bulk cancellation handles
    // -----------------------------------------------------------------------

    fn register_bulk(&self) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.bulk_tokens.lock().insert(token);
        token
    }

    fn bulk_alive(&self, token: u64) -> bool {
        self.bulk_tokens.lock().contains(&token)
    }

    fn release_bulk(&self, token: u64) {
        self.bulk_tokens.lock().remove(&token);
    }

    /// Drop every in-flight bulk token. Running chunked ingests observe the
    /// missing token at their next window and abort with `ERROR`.
    pub fn clear_bulk_tokens(&self) {
        let mut tokens = self.bulk_tokens.lock();
        if !tokens.is_empty() {
            warn!(in_flight = tokens.len(), "cancelling in-flight bulk writes");
        }
        tokens.clear();
    }

    // -----------------------------------------------------------------------
    // Shard bookkeeping
    // -----------------------------------------------------------------------

    fn owning_shard(list: &ShardList, collection: &str, id: DocId) -> Option<usize> {
        list.shards
            .iter()
            .position(|s| s.contains(collection, id))
    }

    /// Highest next id any shard would allocate for the collection.
    fn global_next_id(list: &ShardList, collection: &str) -> DocId {
        list.shards
            .iter()
            .filter_map(|s| s.next_id(collection))
            .max()
            .unwrap_or(0)
    }

    /// Spawn and activate a fresh shard when the active one is at capacity,
    /// seeding every known collection's id counter so allocation stays
    /// monotonic.
    fn rotate_if_full(list: &mut ShardList, capacity: usize) {
        if list.shards[list.active].len() < capacity {
            return;
        }
        let mut seeds: HashMap<String, DocId> = HashMap::new();
        for shard in &list.shards {
            for name in shard.collection_names() {
                let next = shard.next_id(name).unwrap_or(0);
                let seed = seeds.entry(name.clone()).or_insert(0);
                if next > *seed {
                    *seed = next;
                }
            }
        }
        let mut fresh = Shard::new();
        for (name, next) in seeds {
            fresh.seed_collection(&name, next);
        }
        list.shards.push(fresh);
        list.active = list.shards.len() - 1;
        info!(shards = list.shards.len(), "spawned new shard");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EvictionPolicy, MemoryConfig};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn generous_memory() -> MemoryConfig {
        MemoryConfig {
            max_rss_bytes: u64::MAX / 2,
            max_heap_bytes: u64::MAX / 2,
            eviction_policy: EvictionPolicy::Recency,
            eviction_threshold: 0.8,
            sample_interval: Duration::from_millis(1000),
        }
    }

    fn test_store(capacity: usize, memory: MemoryConfig) -> (ShardSet, TempDir) {
        let dir = tempdir().unwrap();
        let log = AppendLog::open(dir.path().join("records.aof"), 4096).unwrap();
        let governor = Arc::new(MemoryGovernor::new(memory));
        (ShardSet::new(capacity, governor, log), dir)
    }

    fn doc(text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn test_set_get_roundtrip() {
        let (store, _dir) = test_store(100, generous_memory());
        let id = store.set("c", doc("hello")).into_data().unwrap();
        assert_eq!(id, 0);

        let record = store.get("c", id).into_data().unwrap();
        assert_eq!(record.bytes, doc("hello"));
        assert_eq!(record.id, 0);
    }

    #[test]
    fn test_get_miss_is_error() {
        let (store, _dir) = test_store(100, generous_memory());
        assert!(store.get("c", 0).is_error());
        store.set("c", doc("x"));
        assert!(store.get("c", 1).is_error());
        assert!(store.get("other", 0).is_error());
    }

    #[test]
    fn test_ids_monotonic_per_collection() {
        let (store, _dir) = test_store(100, generous_memory());
        for expected in 0..5u64 {
            let id = store.set("c", doc("d")).into_data().unwrap();
            assert_eq!(id, expected);
        }
        // A second collection allocates independently from zero.
        assert_eq!(store.set("other", doc("d")).into_data().unwrap(), 0);
    }

    #[test]
    fn test_monotonic_ids_across_rotation() {
        let (store, _dir) = test_store(2, generous_memory());
        let ids: Vec<_> = (0..3)
            .map(|_| store.set("c", doc("d")).into_data().unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(store.shard_count(), 2);
        assert!(store.get("c", 2).is_ok());
        // Older shard still serves its documents.
        assert!(store.get("c", 0).is_ok());
    }

    #[test]
    fn test_rotation_seeds_all_collections() {
        let (store, _dir) = test_store(4, generous_memory());
        store.set("a", doc("1"));
        store.set("a", doc("2"));
        store.set("b", doc("1"));
        store.set("b", doc("2")); // fills the first shard
        assert_eq!(store.set("a", doc("3")).into_data().unwrap(), 2);
        assert_eq!(store.set("b", doc("3")).into_data().unwrap(), 2);
        assert_eq!(store.shard_count(), 2);
    }

    #[test]
    fn test_ids_never_reused_after_delete() {
        let (store, _dir) = test_store(100, generous_memory());
        let id = store.set("c", doc("a")).into_data().unwrap();
        store.delete("c", id);
        let next = store.set("c", doc("b")).into_data().unwrap();
        assert_eq!(next, id + 1);
    }

    // -----------------------------------------------------------------------
    // Update / delete
    // -----------------------------------------------------------------------

    #[test]
    fn test_update_in_place() {
        let (store, _dir) = test_store(100, generous_memory());
        let id = store.set("c", doc("old")).into_data().unwrap();

        let updated = store.update("c", id, doc("new")).into_data().unwrap();
        assert_eq!(updated.bytes, doc("new"));
        assert_eq!(store.get("c", id).into_data().unwrap().bytes, doc("new"));

        assert!(store.update("c", 42, doc("x")).is_error());
    }

    #[test]
    fn test_update_does_not_touch_log() {
        let (store, _dir) = test_store(100, generous_memory());
        let id = store.set("c", doc("abc")).into_data().unwrap();
        let before = store.log_bytes();
        store.update("c", id, doc("defgh"));
        assert_eq!(store.log_bytes(), before);
    }

    #[test]
    fn test_delete_removes_document_and_recency() {
        let (store, _dir) = test_store(100, generous_memory());
        let id = store.set("c", doc("a")).into_data().unwrap();
        assert_eq!(store.governor().tracked_entries(), 1);

        assert!(store.delete("c", id).is_ok());
        assert!(store.get("c", id).is_error());
        assert_eq!(store.governor().tracked_entries(), 0);
        assert_eq!(store.governor().tracked_heap(), 0);

        assert!(store.delete("c", id).is_error());
    }

    // -----------------------------------------------------------------------
    // Log ordering
    // -----------------------------------------------------------------------

    #[test]
    fn test_log_matches_commit_order() {
        let (store, dir) = test_store(100, generous_memory());
        store.set("c", doc("aa"));
        store.set("c", doc("bb"));
        store.set_many("c", vec![doc("cc"), doc("dd")]);
        store.flush_log().unwrap();

        let contents = std::fs::read(dir.path().join("records.aof")).unwrap();
        assert_eq!(contents, b"aabbccdd");
    }

    // -----------------------------------------------------------------------
    // Bulk reads
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_many_skips_misses() {
        let (store, _dir) = test_store(100, generous_memory());
        let a = store.set("c", doc("a")).into_data().unwrap();
        let b = store.set("c", doc("b")).into_data().unwrap();

        let found = store.get_many("c", &[a, 99, b]).into_data().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&a], doc("a"));
        assert_eq!(found[&b], doc("b"));

        // All misses still answers OK with an empty map.
        let empty = store.get_many("c", &[7, 8]).into_data().unwrap();
        assert!(empty.is_empty());
    }

    // -----------------------------------------------------------------------
    // Bulk writes and admission
    // -----------------------------------------------------------------------

    #[test]
    fn test_set_many_contiguous_ids_and_log() {
        let (store, _dir) = test_store(100_000, generous_memory());
        let docs: Vec<_> = (0..5000).map(|_| doc("0123456789")).collect();
        let total: u64 = docs.iter().map(|d| d.len() as u64).sum();

        let ids = store.set_many("c", docs).into_data().unwrap();
        assert_eq!(ids.len(), 5000);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*id, i as u64);
        }
        assert_eq!(store.log_bytes(), total);
    }

    #[test]
    fn test_set_many_rotates_mid_bulk() {
        let (store, _dir) = test_store(3, generous_memory());
        let ids = store
            .set_many("c", (0..10).map(|_| doc("d")).collect())
            .into_data()
            .unwrap();
        assert_eq!(ids, (0..10).collect::<Vec<u64>>());
        assert_eq!(store.shard_count(), 4);
        for id in 0..10 {
            assert!(store.get("c", id).is_ok());
        }
    }

    #[test]
    fn test_set_many_admission_refusal_stops_monitor() {
        let mut memory = generous_memory();
        memory.max_heap_bytes = 1000;
        let (store, _dir) = test_store(100_000, memory);
        store.governor().start_monitoring();
        assert!(store.governor().is_monitoring());

        // Small batch (no chunked fallback), far over the heap limit.
        let docs: Vec<_> = (0..10).map(|_| vec![0u8; 64 * 1024]).collect();
        assert!(store.set_many("c", docs).is_error());
        assert!(!store.governor().is_monitoring());

        // Nothing was committed, and single inserts still work.
        assert!(store.get("c", 0).is_error());
        assert_eq!(store.set("c", doc("ok")).into_data().unwrap(), 0);
    }

    #[test]
    fn test_set_many_chunked_ingest() {
        let mut memory = generous_memory();
        // Tight enough that the 20k-doc estimate is refused, loose enough
        // that each chunk is admitted.
        memory.max_heap_bytes = 1500 * 1024;
        let (store, _dir) = test_store(1_000_000, memory);

        let docs: Vec<_> = (0..20_000).map(|_| vec![7u8; 10]).collect();
        let ids = store.set_many("c", docs).into_data().unwrap();
        assert_eq!(ids.len(), 20_000);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*id, i as u64);
        }
        // The monitor survives a successful chunked run.
        assert_eq!(store.log_bytes(), 20_000 * 10);
    }

    #[test]
    fn test_set_many_empty_is_ok() {
        let (store, _dir) = test_store(100, generous_memory());
        assert_eq!(store.set_many("c", vec![]).into_data().unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_emergency_cancels_chunked_ingest_tokens() {
        let (store, _dir) = test_store(100, generous_memory());
        let token = store.register_bulk();
        assert!(store.bulk_alive(token));
        store.clear_bulk_tokens();
        assert!(!store.bulk_alive(token));
    }

    // -----------------------------------------------------------------------
    // update_many / replace_many / delete_many
    // -----------------------------------------------------------------------

    #[test]
    fn test_update_many_errors_on_first_miss() {
        let (store, _dir) = test_store(100, generous_memory());
        let a = store.set("c", doc("a")).into_data().unwrap();
        let b = store.set("c", doc("b")).into_data().unwrap();

        let result = store.update_many("c", vec![(a, doc("a2")), (99, doc("x")), (b, doc("b2"))]);
        assert!(result.is_error());
        // Partial effect: the entry before the miss was written.
        assert_eq!(store.get("c", a).into_data().unwrap().bytes, doc("a2"));
        assert_eq!(store.get("c", b).into_data().unwrap().bytes, doc("b"));
    }

    #[test]
    fn test_update_many_success() {
        let (store, _dir) = test_store(100, generous_memory());
        let a = store.set("c", doc("a")).into_data().unwrap();
        let b = store.set("c", doc("b")).into_data().unwrap();

        let updated = store
            .update_many("c", vec![(a, doc("a2")), (b, doc("b2"))])
            .into_data()
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].bytes, doc("a2"));
    }

    #[test]
    fn test_replace_many_validates_before_writing() {
        let (store, _dir) = test_store(100, generous_memory());
        let a = store.set("c", doc("a")).into_data().unwrap();

        let result = store.replace_many("c", vec![(a, doc("a2")), (99, doc("x"))]);
        assert!(result.is_error());
        // No partial effects.
        assert_eq!(store.get("c", a).into_data().unwrap().bytes, doc("a"));

        let ok = store.replace_many("c", vec![(a, doc("a2"))]);
        assert!(ok.is_ok());
        assert_eq!(store.get("c", a).into_data().unwrap().bytes, doc("a2"));
    }

    #[test]
    fn test_delete_many_reports_removed_only() {
        let (store, _dir) = test_store(100, generous_memory());
        let a = store.set("c", doc("a")).into_data().unwrap();
        let b = store.set("c", doc("b")).into_data().unwrap();

        let removed = store.delete_many("c", &[a, 99, b]).into_data().unwrap();
        assert_eq!(removed, vec![a, b]);
        assert!(store.get("c", a).is_error());
        assert_eq!(store.governor().tracked_entries(), 0);
    }

    // -----------------------------------------------------------------------
    // find
    // -----------------------------------------------------------------------

    #[test]
    fn test_find_scans_all_shards() {
        use crate::codec::encode_doc;
        use serde_json::json;

        let (store, _dir) = test_store(2, generous_memory());
        for age in 0..5 {
            let bytes = encode_doc(&json!({"username": format!("u{age}"), "age": age})).unwrap();
            store.set("users", bytes);
        }
        assert!(store.shard_count() > 1);

        let all = store
            .find("users", &Where::and(vec![]))
            .into_data()
            .unwrap();
        assert_eq!(all.len(), 5);

        let filter = Where::field_eq("age", 3);
        let found = store.find("users", &filter).into_data().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].doc["username"], "u3");
    }

    #[test]
    fn test_find_excludes_deleted() {
        use crate::codec::encode_doc;
        use serde_json::json;

        let (store, _dir) = test_store(100, generous_memory());
        let bytes = encode_doc(&json!({"age": 1})).unwrap();
        let id = store.set("c", bytes).into_data().unwrap();
        store.delete("c", id);

        let found = store
            .find("c", &Where::field_eq("age", 1))
            .into_data()
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_find_unknown_collection_is_empty_ok() {
        let (store, _dir) = test_store(100, generous_memory());
        let found = store.find("nope", &Where::and(vec![])).into_data().unwrap();
        assert!(found.is_empty());
    }
}
