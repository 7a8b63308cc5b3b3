//! Memory governance: footprint sampling, admission control, recency-ordered
//! eviction, and rough size estimation.

pub mod estimate;
pub mod governor;
pub mod recency;

pub use estimate::{estimate_payload, estimate_value};
pub use governor::{MemoryGovernor, MemoryStats};
pub use recency::{RecencyIndex, RecencyKey};
