//! The engine facade: one catalog, one shard set, one governor, one log,
//! composed behind a cheaply clonable handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::aof::AppendLog;
use crate::catalog::{Catalog, CollectionSchema};
use crate::config::{EngineConfig, MemoryConfig, LOG_FILE_NAME};
use crate::error::{Error, LogError};
use crate::memory::governor::{MemoryGovernor, MemoryStats};
use crate::query::Where;
use crate::response::Response;
use crate::store::ShardSet;
use crate::types::{DocId, DocRecord, FoundDoc};

/// Fraction of sampled RSS each eviction pass tries to reclaim.
const EVICTION_RSS_FRACTION: f64 = 0.2;

/// Eviction fires closer together than this count as "close".
const BRAKE_WINDOW: Duration = Duration::from_secs(1);

/// Close fires before the brake halts the monitor.
const BRAKE_LIMIT: u32 = 3;

/// Guard against eviction feedback loops: consecutive close-together fires
/// trip the brake, which stops the sampler entirely.
struct EmergencyBrake {
    last_fire: Mutex<Option<Instant>>,
    close_fires: AtomicU32,
}

struct EngineInner {
    catalog: RwLock<Catalog>,
    store: Arc<ShardSet>,
    governor: Arc<MemoryGovernor>,
    brake: EmergencyBrake,
}

/// The main engine handle. Cheaply clonable and `Send + Sync`.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Construct the engine: create the data directory and log file, wire
    /// the governor's eviction and emergency callbacks, start monitoring.
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        std::fs::create_dir_all(&config.data_dir).map_err(LogError::Io)?;
        let log_path = config.data_dir.join(LOG_FILE_NAME);
        let log = if config.log_background_writer {
            AppendLog::open_with_worker(&log_path, config.log_flush_threshold)?
        } else {
            AppendLog::open(&log_path, config.log_flush_threshold)?
        };

        let governor = Arc::new(MemoryGovernor::new(config.memory.clone()));
        let store = Arc::new(ShardSet::new(
            config.shard_capacity,
            governor.clone(),
            log,
        ));

        let inner = Arc::new(EngineInner {
            catalog: RwLock::new(Catalog::new()),
            store,
            governor: governor.clone(),
            brake: EmergencyBrake {
                last_fire: Mutex::new(None),
                close_fires: AtomicU32::new(0),
            },
        });

        let weak = Arc::downgrade(&inner);
        governor.subscribe_eviction(Box::new(move || {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.eviction_pass();
            }
        }));
        let weak = Arc::downgrade(&inner);
        governor.subscribe_emergency(Box::new(move || {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.store.clear_bulk_tokens();
            }
        }));

        governor.start_monitoring();
        info!(data_dir = %config.data_dir.display(), shards = 1, "engine opened");

        Ok(Self { inner })
    }

    // -----------------------------------------------------------------------
    // Collections and schemas
    // -----------------------------------------------------------------------

    /// Declare a collection schema and return an operations handle bound to
    /// that collection.
    pub fn collection(&self, name: &str, schema: CollectionSchema) -> CollectionHandle {
        self.inner.catalog.write().set(name, schema);
        CollectionHandle {
            engine: self.clone(),
            name: name.to_string(),
        }
    }

    pub fn schema(&self, name: &str) -> Response<CollectionSchema> {
        self.inner.catalog.read().get(name)
    }

    pub fn schemas(&self) -> Response<Vec<(String, CollectionSchema)>> {
        self.inner.catalog.read().get_all()
    }

    pub fn update_schema(&self, name: &str, schema: CollectionSchema) -> Response<()> {
        self.inner.catalog.write().update(name, schema)
    }

    pub fn drop_schema(&self, name: &str) -> Response<()> {
        self.inner.catalog.write().delete(name)
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.inner.catalog.read().exists(name)
    }

    // -----------------------------------------------------------------------
    // Document operations (mirroring the shard set)
    // -----------------------------------------------------------------------

    pub fn set(&self, collection: &str, doc: Vec<u8>) -> Response<DocId> {
        self.inner.store.set(collection, doc)
    }

    pub fn get(&self, collection: &str, id: DocId) -> Response<DocRecord> {
        self.inner.store.get(collection, id)
    }

    pub fn update(&self, collection: &str, id: DocId, doc: Vec<u8>) -> Response<DocRecord> {
        self.inner.store.update(collection, id, doc)
    }

    pub fn delete(&self, collection: &str, id: DocId) -> Response<DocId> {
        self.inner.store.delete(collection, id)
    }

    pub fn get_many(&self, collection: &str, ids: &[DocId]) -> Response<BTreeMap<DocId, Vec<u8>>> {
        self.inner.store.get_many(collection, ids)
    }

    pub fn set_many(&self, collection: &str, docs: Vec<Vec<u8>>) -> Response<Vec<DocId>> {
        self.inner.store.set_many(collection, docs)
    }

    pub fn update_many(
        &self,
        collection: &str,
        entries: Vec<(DocId, Vec<u8>)>,
    ) -> Response<Vec<DocRecord>> {
        self.inner.store.update_many(collection, entries)
    }

    pub fn replace_many(
        &self,
        collection: &str,
        entries: Vec<(DocId, Vec<u8>)>,
    ) -> Response<Vec<DocRecord>> {
        self.inner.store.replace_many(collection, entries)
    }

    pub fn delete_many(&self, collection: &str, ids: &[DocId]) -> Response<Vec<DocId>> {
        self.inner.store.delete_many(collection, ids)
    }

    pub fn find(&self, collection: &str, filter: &Where) -> Response<Vec<FoundDoc>> {
        self.inner.store.find(collection, filter)
    }

    // -----------------------------------------------------------------------
    // Memory controls
    // -----------------------------------------------------------------------

    pub fn start_memory_monitoring(&self) {
        self.inner.governor.start_monitoring();
    }

    pub fn stop_memory_monitoring(&self) {
        self.inner.governor.stop_monitoring();
    }

    /// Stop-then-start; the manual recovery path after an admission refusal
    /// or an engaged brake.
    pub fn restart_memory_monitoring(&self) {
        self.inner.governor.stop_monitoring();
        self.inner.governor.start_monitoring();
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        self.inner.governor.stats()
    }

    pub fn update_memory_config(&self, config: MemoryConfig) {
        self.inner.governor.update_config(config);
    }

    pub fn reset_emergency_brake(&self) {
        *self.inner.brake.last_fire.lock() = None;
        self.inner.brake.close_fires.store(0, Ordering::Relaxed);
    }

    /// Run one eviction pass now, outside the sampler cadence.
    pub fn run_eviction_pass(&self) {
        self.inner.eviction_pass();
    }

    // -----------------------------------------------------------------------
    // Observability and shutdown
    // -----------------------------------------------------------------------

    pub fn shard_count(&self) -> usize {
        self.inner.store.shard_count()
    }

    pub fn log_bytes(&self) -> u64 {
        self.inner.store.log_bytes()
    }

    /// Flush the log and stop the monitor.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.governor.stop_monitoring();
        self.inner.store.flush_log()?;
        Ok(())
    }
}

impl EngineInner {
    /// One eviction pass: brake check, then delete the oldest-touched
    /// entries until a fifth of the sampled resident set is reclaimed.
    fn eviction_pass(&self) {
        let now = Instant::now();
        {
            let mut last = self.brake.last_fire.lock();
            if let Some(prev) = *last {
                if now.duration_since(prev) <= BRAKE_WINDOW {
                    let fires = self.brake.close_fires.fetch_add(1, Ordering::Relaxed) + 1;
                    if fires >= BRAKE_LIMIT {
                        *last = Some(now);
                        drop(last);
                        warn!(fires, "emergency brake engaged; stopping memory monitor");
                        self.governor.stop_monitoring();
                        return;
                    }
                } else {
                    self.brake.close_fires.store(0, Ordering::Relaxed);
                }
            }
            *last = Some(now);
        }

        let rss = self.governor.sample_rss();
        let target = (rss as f64 * EVICTION_RSS_FRACTION) as usize;
        self.evict_to_target(target);
    }

    fn evict_to_target(&self, target_bytes: usize) {
        if target_bytes == 0 {
            return;
        }
        let candidates = self.governor.evict_candidates(target_bytes);
        if candidates.is_empty() {
            return;
        }
        info!(
            count = candidates.len(),
            target = target_bytes,
            "evicting least-recently-used documents"
        );
        for (collection, id) in candidates {
            if self.store.delete(&collection, id).is_error() {
                // The document vanished under us; drop its stale entry.
                self.governor.remove_entry(&collection, id);
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.governor.stop_monitoring();
    }
}

/// Per-collection operations object returned by [`Engine::collection`].
#[derive(Clone)]
pub struct CollectionHandle {
    engine: Engine,
    name: String,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self, doc: Vec<u8>) -> Response<DocId> {
        self.engine.set(&self.name, doc)
    }

    pub fn get(&self, id: DocId) -> Response<DocRecord> {
        self.engine.get(&self.name, id)
    }

    pub fn update(&self, id: DocId, doc: Vec<u8>) -> Response<DocRecord> {
        self.engine.update(&self.name, id, doc)
    }

    pub fn delete(&self, id: DocId) -> Response<DocId> {
        self.engine.delete(&self.name, id)
    }

    pub fn get_many(&self, ids: &[DocId]) -> Response<BTreeMap<DocId, Vec<u8>>> {
        self.engine.get_many(&self.name, ids)
    }

    pub fn set_many(&self, docs: Vec<Vec<u8>>) -> Response<Vec<DocId>> {
        self.engine.set_many(&self.name, docs)
    }

    pub fn update_many(&self, entries: Vec<(DocId, Vec<u8>)>) -> Response<Vec<DocRecord>> {
        self.engine.update_many(&self.name, entries)
    }

    pub fn replace_many(&self, entries: Vec<(DocId, Vec<u8>)>) -> Response<Vec<DocRecord>> {
        self.engine.replace_many(&self.name, entries)
    }

    pub fn delete_many(&self, ids: &[DocId]) -> Response<Vec<DocId>> {
        self.engine.delete_many(&self.name, ids)
    }

    pub fn find(&self, filter: &Where) -> Response<Vec<FoundDoc>> {
        self.engine.find(&self.name, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldSpec, FieldType};
    use crate::codec::encode_doc;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn test_engine() -> (Engine, TempDir) {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::at(dir.path());
        config.memory.max_rss_bytes = u64::MAX / 2;
        config.memory.max_heap_bytes = u64::MAX / 2;
        let engine = Engine::open(config).unwrap();
        (engine, dir)
    }

    fn users_schema() -> CollectionSchema {
        let mut schema = CollectionSchema::new();
        schema.insert(
            "username".to_string(),
            FieldSpec {
                field_type: FieldType::String,
                unique: true,
                required: true,
                indexed: false,
            },
        );
        schema
    }

    #[test]
    fn test_collection_handle_roundtrip() {
        let (engine, _dir) = test_engine();
        let users = engine.collection("users", users_schema());
        assert!(engine.has_collection("users"));

        let doc = encode_doc(&json!({"username": "u1"})).unwrap();
        let id = users.set(doc.clone()).into_data().unwrap();
        assert_eq!(id, 0);
        assert_eq!(users.get(id).into_data().unwrap().bytes, doc);
    }

    #[test]
    fn test_facade_forwards_to_store() {
        let (engine, _dir) = test_engine();
        let id = engine.set("c", b"payload".to_vec()).into_data().unwrap();
        assert!(engine.get("c", id).is_ok());
        assert!(engine.delete("c", id).is_ok());
        assert!(engine.get("c", id).is_error());
    }

    #[test]
    fn test_schema_surface() {
        let (engine, _dir) = test_engine();
        engine.collection("users", users_schema());

        assert!(engine.schema("users").is_ok());
        assert!(engine.schema("ghosts").is_error());
        assert!(engine.update_schema("users", users_schema()).is_ok());
        assert_eq!(engine.schemas().into_data().unwrap().len(), 1);
        assert!(engine.drop_schema("users").is_ok());
        assert!(engine.schema("users").is_error());
    }

    #[test]
    fn test_memory_controls() {
        let (engine, _dir) = test_engine();
        assert!(engine.get_memory_stats().monitoring);

        engine.stop_memory_monitoring();
        assert!(!engine.get_memory_stats().monitoring);

        engine.restart_memory_monitoring();
        assert!(engine.get_memory_stats().monitoring);

        let mut config = MemoryConfig::default();
        config.max_heap_bytes = 777;
        engine.update_memory_config(config);
        assert_eq!(engine.get_memory_stats().max_heap_bytes, 777);
    }

    #[test]
    fn test_eviction_prefers_oldest() {
        let (engine, _dir) = test_engine();
        let docs: Vec<_> = (0..20).map(|_| vec![0u8; 100]).collect();
        let ids = engine.set_many("c", docs).into_data().unwrap();

        // Touch the upper half so the lower half is the oldest.
        for &id in &ids[10..] {
            engine.get("c", id);
        }

        // Reclaim roughly the estimated size of ten documents.
        engine.inner.evict_to_target(10 * 124);

        let old = engine.get_many("c", &ids[..10]).into_data().unwrap();
        assert!(old.is_empty());
        let fresh = engine.get_many("c", &ids[10..]).into_data().unwrap();
        assert_eq!(fresh.len(), 10);
    }

    #[test]
    fn test_emergency_brake_stops_monitor() {
        let (engine, _dir) = test_engine();
        assert!(engine.get_memory_stats().monitoring);

        // Rapid-fire eviction passes; the third close pair trips the brake.
        for _ in 0..4 {
            engine.run_eviction_pass();
        }
        assert!(!engine.get_memory_stats().monitoring);

        engine.reset_emergency_brake();
        engine.restart_memory_monitoring();
        assert!(engine.get_memory_stats().monitoring);
    }

    #[test]
    fn test_close_flushes_log() {
        let (engine, dir) = test_engine();
        engine.set("c", b"abc".to_vec());
        engine.close().unwrap();

        let contents = std::fs::read(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(contents, b"abc");
        assert!(!engine.get_memory_stats().monitoring);
    }
}
