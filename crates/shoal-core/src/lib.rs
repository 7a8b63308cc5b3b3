//! # ShoalDB engine
//!
//! A RAM-resident document store addressed by small integer identifiers.
//! Documents are opaque byte payloads held in a set of fixed-capacity
//! shards; identifiers are allocated monotonically per collection and never
//! reused. Successful inserts are appended to a write-only log, and a
//! memory governor watches the process footprint, admission-controls bulk
//! writes, and evicts least-recently-used documents under pressure.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shoal_core::catalog::CollectionSchema;
//! use shoal_core::codec::encode_doc;
//! use shoal_core::config::EngineConfig;
//! use shoal_core::engine::Engine;
//! use serde_json::json;
//!
//! let engine = Engine::open(EngineConfig::at("shoal-data")).unwrap();
//! let users = engine.collection("users", CollectionSchema::new());
//!
//! let doc = encode_doc(&json!({"username": "alice", "age": 30})).unwrap();
//! let id = users.set(doc).into_data().unwrap();
//! let record = users.get(id).into_data().unwrap();
//! assert_eq!(record.id, id);
//! ```

pub mod aof;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod query;
pub mod response;
pub mod store;
pub mod types;

pub use engine::{CollectionHandle, Engine};
pub use response::{Response, Status};
pub use types::{DocId, DocRecord, FoundDoc};
