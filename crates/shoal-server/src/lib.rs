//! ShoalDB server and client library.
//!
//! Serves a ShoalDB engine over TCP with a length-prefixed MessagePack
//! protocol, and provides the matching client.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ShoalClient;
pub use server::ShoalServer;
