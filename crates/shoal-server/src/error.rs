//! Error types for the client half.

use thiserror::Error;

/// Errors returned by `ShoalClient` methods.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("server disconnected")]
    Disconnected,

    #[error("request rejected by the server")]
    Rejected,

    #[error("protocol error: {0}")]
    Protocol(String),
}
