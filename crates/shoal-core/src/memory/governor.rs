//! Memory governor: watches process footprint, gates bulk admission, and
//! drives eviction.
//!
//! Resident set size comes from the OS via `sysinfo`. The "heap" figure is
//! the engine's own accounting counter — estimated live bytes added on
//! insert and removed on delete — since the process exposes no precise
//! live-heap gauge.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

use crate::config::{EvictionPolicy, MemoryConfig};
use crate::memory::recency::{RecencyIndex, RecencyKey};
use crate::types::DocId;

/// Estimates at or below this size use the wider safety margin.
const SMALL_ESTIMATE_CEILING: usize = 1024 * 1024 * 1024;

/// Safety margin applied to projections for estimates up to 1 GiB.
const MARGIN_SMALL: f64 = 1.02;

/// Safety margin for larger estimates.
const MARGIN_LARGE: f64 = 1.01;

/// A governor subscriber, run on the sampler thread.
pub type Callback = Box<dyn Fn() + Send + Sync>;

/// A point-in-time view of memory state.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub rss_bytes: u64,
    pub heap_bytes: u64,
    pub max_rss_bytes: u64,
    pub max_heap_bytes: u64,
    pub usage_fraction: f64,
    pub monitoring: bool,
    pub tracked_entries: usize,
}

pub struct MemoryGovernor {
    config: RwLock<MemoryConfig>,
    recency: Mutex<RecencyIndex>,
    /// Engine-accounted live bytes; stands in for heap-in-use.
    tracked_heap: AtomicUsize,
    monitoring: AtomicBool,
    /// Stop flag of the running sampler thread, if any.
    sampler_stop: Mutex<Option<Arc<AtomicBool>>>,
    on_eviction: Mutex<Vec<Callback>>,
    on_emergency: Mutex<Vec<Callback>>,
    last_rss: AtomicU64,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl MemoryGovernor {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config: RwLock::new(config),
            recency: Mutex::new(RecencyIndex::new()),
            tracked_heap: AtomicUsize::new(0),
            monitoring: AtomicBool::new(false),
            sampler_stop: Mutex::new(None),
            on_eviction: Mutex::new(Vec::new()),
            on_emergency: Mutex::new(Vec::new()),
            last_rss: AtomicU64::new(0),
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn config(&self) -> MemoryConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. The running sampler picks it up on its
    /// next tick.
    pub fn update_config(&self, config: MemoryConfig) {
        *self.config.write() = config;
    }

    // -----------------------------------------------------------------------
    // Sampling
    // -----------------------------------------------------------------------

    /// Current resident set size in bytes.
    pub fn sample_rss(&self) -> u64 {
        let Some(pid) = self.pid else { return 0 };
        let mut sys = self.system.lock();
        sys.refresh_process(pid);
        let rss = sys.process(pid).map(|p| p.memory()).unwrap_or(0);
        self.last_rss.store(rss, Ordering::Relaxed);
        rss
    }

    /// Resident set size observed by the most recent sample.
    pub fn last_rss(&self) -> u64 {
        self.last_rss.load(Ordering::Relaxed)
    }

    /// Engine-accounted live bytes.
    pub fn tracked_heap(&self) -> u64 {
        self.tracked_heap.load(Ordering::Relaxed) as u64
    }

    pub fn add_tracked(&self, bytes: usize) {
        self.tracked_heap.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub_tracked(&self, bytes: usize) {
        let mut current = self.tracked_heap.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.tracked_heap.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Admission control
    // -----------------------------------------------------------------------

    /// Whether an allocation of `est_bytes` fits under both limits once a
    /// safety margin is applied to the projections.
    pub fn can_allocate(&self, est_bytes: usize) -> bool {
        let config = self.config.read();
        let rss = self.sample_rss();
        let heap = self.tracked_heap();
        let margin = if est_bytes <= SMALL_ESTIMATE_CEILING {
            MARGIN_SMALL
        } else {
            MARGIN_LARGE
        };
        let projected_rss = (rss + est_bytes as u64) as f64 * margin;
        let projected_heap = (heap + est_bytes as u64) as f64 * margin;
        projected_rss < config.max_rss_bytes as f64
            && projected_heap < config.max_heap_bytes as f64
    }

    /// Whether either limit is already breached.
    pub fn over_limit(&self) -> bool {
        let config = self.config.read();
        self.sample_rss() > config.max_rss_bytes || self.tracked_heap() > config.max_heap_bytes
    }

    /// Headroom under the tighter of the two limits.
    pub fn available_bytes(&self) -> u64 {
        let config = self.config.read();
        let rss_room = config.max_rss_bytes.saturating_sub(self.sample_rss());
        let heap_room = config.max_heap_bytes.saturating_sub(self.tracked_heap());
        rss_room.min(heap_room)
    }

    // -----------------------------------------------------------------------
    // Recency index
    // -----------------------------------------------------------------------

    pub fn record_access(&self, collection: &str, id: DocId, est_size: usize) {
        self.recency.lock().touch(collection, id, est_size);
    }

    pub fn record_access_bulk(&self, collection: &str, entries: &[(DocId, usize)]) {
        let mut recency = self.recency.lock();
        for &(id, est_size) in entries {
            recency.touch(collection, id, est_size);
        }
    }

    pub fn remove_entry(&self, collection: &str, id: DocId) -> Option<usize> {
        self.recency.lock().remove(collection, id)
    }

    pub fn tracked_entries(&self) -> usize {
        self.recency.lock().len()
    }

    /// Keys to evict, totalling at least `target_bytes` of estimated size,
    /// selected per the configured policy. Empty under policy `None`.
    pub fn evict_candidates(&self, target_bytes: usize) -> Vec<RecencyKey> {
        let policy = self.config.read().eviction_policy;
        let recency = self.recency.lock();
        match policy {
            EvictionPolicy::None => Vec::new(),
            EvictionPolicy::Recency => recency.oldest_reaching(target_bytes),
            EvictionPolicy::Random => recency.arbitrary_reaching(target_bytes),
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions and the sampler
    // -----------------------------------------------------------------------

    pub fn subscribe_eviction(&self, callback: Callback) {
        self.on_eviction.lock().push(callback);
    }

    pub fn subscribe_emergency(&self, callback: Callback) {
        self.on_emergency.lock().push(callback);
    }

    /// Run every eviction subscriber now, outside the sampler cadence.
    pub fn fire_eviction_callbacks(&self) {
        for callback in self.on_eviction.lock().iter() {
            callback();
        }
    }

    /// Run every emergency subscriber now.
    pub fn fire_emergency_callbacks(&self) {
        for callback in self.on_emergency.lock().iter() {
            callback();
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    /// Start the sampling thread. Idempotent.
    pub fn start_monitoring(self: &Arc<Self>) {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        *self.sampler_stop.lock() = Some(stop.clone());
        let weak = Arc::downgrade(self);
        let result = std::thread::Builder::new()
            .name("shoal-mem-sampler".to_string())
            .spawn(move || sampler_loop(weak, stop));
        match result {
            Ok(_) => info!("memory monitoring started"),
            Err(e) => {
                warn!(error = %e, "failed to spawn memory sampler");
                self.monitoring.store(false, Ordering::SeqCst);
                *self.sampler_stop.lock() = None;
            }
        }
    }

    /// Signal the sampling thread to exit. Idempotent; safe to call from a
    /// subscriber running on the sampler thread itself.
    pub fn stop_monitoring(&self) {
        if !self.monitoring.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(stop) = self.sampler_stop.lock().take() {
            stop.store(true, Ordering::SeqCst);
        }
        info!("memory monitoring stopped");
    }

    pub fn stats(&self) -> MemoryStats {
        let config = self.config.read();
        let rss = self.sample_rss();
        let heap = self.tracked_heap();
        let usage_fraction = usage_fraction(rss, heap, &config);
        MemoryStats {
            rss_bytes: rss,
            heap_bytes: heap,
            max_rss_bytes: config.max_rss_bytes,
            max_heap_bytes: config.max_heap_bytes,
            usage_fraction,
            monitoring: self.is_monitoring(),
            tracked_entries: self.tracked_entries(),
        }
    }
}

fn usage_fraction(rss: u64, heap: u64, config: &MemoryConfig) -> f64 {
    let rss_frac = rss as f64 / config.max_rss_bytes.max(1) as f64;
    let heap_frac = heap as f64 / config.max_heap_bytes.max(1) as f64;
    rss_frac.max(heap_frac)
}

fn sampler_loop(governor: Weak<MemoryGovernor>, stop: Arc<AtomicBool>) {
    loop {
        let interval = match governor.upgrade() {
            Some(g) => g.config.read().sample_interval,
            None => return,
        };
        std::thread::sleep(interval);
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let Some(g) = governor.upgrade() else { return };

        let config = g.config.read().clone();
        let rss = g.sample_rss();
        let heap = g.tracked_heap();
        let usage = usage_fraction(rss, heap, &config);

        if usage >= config.eviction_threshold {
            debug!(rss, heap, usage, "eviction threshold reached");
            g.fire_eviction_callbacks();
        }
        if rss > config.max_rss_bytes || heap > config.max_heap_bytes {
            warn!(rss, heap, "memory limit breached");
            g.fire_emergency_callbacks();
        }
        // A subscriber may have stopped monitoring; honor it promptly.
        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}
