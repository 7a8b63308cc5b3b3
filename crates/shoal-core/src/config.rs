//! Engine and memory-governor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_SHARD_CAPACITY;

/// Default resident-set ceiling (1 GiB).
pub const DEFAULT_MAX_RSS_BYTES: u64 = 1024 * 1024 * 1024;

/// Default tracked-heap ceiling (512 MiB).
pub const DEFAULT_MAX_HEAP_BYTES: u64 = 512 * 1024 * 1024;

/// Default fraction of either memory limit at which eviction starts.
pub const DEFAULT_EVICTION_THRESHOLD: f64 = 0.8;

/// Default memory sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Buffered log bytes that trigger a flush to the backing file (4 KiB).
pub const DEFAULT_LOG_FLUSH_THRESHOLD: usize = 4 * 1024;

/// File name of the append-only record log inside the data directory.
pub const LOG_FILE_NAME: &str = "records.aof";

/// How stored entries are chosen for eviction under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Never evict; eviction passes select nothing.
    None,
    /// Evict least-recently-accessed entries first.
    Recency,
    /// Evict entries in arbitrary order.
    Random,
}

/// Memory governor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_rss_bytes: u64,
    pub max_heap_bytes: u64,
    pub eviction_policy: EvictionPolicy,
    /// Usage fraction in `(0, 1]` at which eviction callbacks fire.
    pub eviction_threshold: f64,
    pub sample_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_rss_bytes: DEFAULT_MAX_RSS_BYTES,
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            eviction_policy: EvictionPolicy::Recency,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the append-only log. Created if absent.
    pub data_dir: PathBuf,
    /// Per-shard entry ceiling.
    pub shard_capacity: usize,
    /// Buffered bytes that trigger a log flush.
    pub log_flush_threshold: usize,
    /// Hand the log to a dedicated writer thread instead of flushing on the
    /// caller's thread.
    pub log_background_writer: bool,
    pub memory: MemoryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("shoal-data"),
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            log_flush_threshold: DEFAULT_LOG_FLUSH_THRESHOLD,
            log_background_writer: false,
            memory: MemoryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at `data_dir` with defaults for everything else.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}
