//! Core types: document identifiers and the records returned by reads.

use serde_json::Value;

/// Document identifier, allocated monotonically per collection starting at 0.
/// Never reused: dense under insertion, sparse under deletion.
pub type DocId = u64;

/// Default per-shard entry ceiling. A shard never holds more entries than
/// this; the shard set rotates to a fresh shard before the limit is crossed.
pub const DEFAULT_SHARD_CAPACITY: usize = 6_000_000;

/// A stored document together with its identifier.
///
/// The engine treats document bytes as opaque; they are the MessagePack
/// encoding produced by the wire layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRecord {
    pub id: DocId,
    pub bytes: Vec<u8>,
}

/// A document matched by a predicate scan, decoded into a structured value.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundDoc {
    pub id: DocId,
    pub doc: Value,
}
