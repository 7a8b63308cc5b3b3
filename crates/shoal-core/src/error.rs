//! Error types for all ShoalDB engine operations.

use std::io;
use thiserror::Error;

/// Top-level error type for engine construction and shutdown paths.
///
/// Steady-state operations never return `Err`; they report failure through
/// the [`crate::response::Response`] envelope instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("append to a closed log")]
    Closed,

    #[error("log writer thread is gone")]
    WriterGone,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("document encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("document decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {collection}:{id}")]
    DocumentNotFound { collection: String, id: u64 },

    #[error("bulk write refused: estimated {estimated} bytes over memory limits")]
    AdmissionRefused { estimated: usize },

    #[error("memory limits already breached")]
    OverLimit,
}

pub type Result<T> = std::result::Result<T, Error>;
