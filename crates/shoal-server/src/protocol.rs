//! Wire protocol: length-prefixed MessagePack frames.
//!
//! Each message is a 4-byte big-endian length followed by that many bytes of
//! MessagePack. Requests are `{action, collection, payload}` envelopes;
//! responses are the engine's `{status, data}` envelope. Framing helpers are
//! shared by the server and the client so both halves agree byte for byte.

use std::io;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:7333";

/// Frames above this size close the connection.
pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Payloads move through the socket in chunks of this size.
pub const IO_CHUNK_BYTES: usize = 64 * 1024;

/// Ceiling on reading a single request payload.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The closed action set.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const GET: &str = "get";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const CREATE_MANY: &str = "createMany";
    pub const GET_MANY: &str = "getMany";
    pub const UPDATE_MANY: &str = "updateMany";
    pub const DELETE_MANY: &str = "deleteMany";
    pub const FIND: &str = "find";

    pub const ALL: [&str; 9] = [
        CREATE,
        GET,
        UPDATE,
        DELETE,
        CREATE_MANY,
        GET_MANY,
        UPDATE_MANY,
        DELETE_MANY,
        FIND,
    ];
}

/// A request envelope from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    pub collection: String,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    pub fn new(action: &str, collection: &str, payload: Value) -> Self {
        Self {
            action: action.to_string(),
            collection: collection.to_string(),
            payload,
        }
    }
}

/// Encode a message as MessagePack with string field names.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

/// Decode a MessagePack message.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean disconnect at a frame boundary. A frame
/// over [`MAX_FRAME_BYTES`] is an error; the caller closes the connection.
/// When `payload_timeout` is set, reading the payload (not the idle wait for
/// the length prefix) must finish within it.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    payload_timeout: Option<Duration>,
) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(Some(Vec::new()));
    }
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte limit"),
        ));
    }

    let read_payload = async {
        let mut payload = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let end = (filled + IO_CHUNK_BYTES).min(len);
            reader.read_exact(&mut payload[filled..end]).await?;
            filled = end;
        }
        Ok::<_, io::Error>(payload)
    };

    let payload = match payload_timeout {
        Some(limit) => tokio::time::timeout(limit, read_payload)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request read timed out"))??,
        None => read_payload.await?,
    };
    Ok(Some(payload))
}

/// Write one frame: length prefix, then the payload in bounded chunks.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    for chunk in payload.chunks(IO_CHUNK_BYTES) {
        writer.write_all(chunk).await?;
    }
    writer.flush().await
}
