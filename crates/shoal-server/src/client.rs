//! Client library for a ShoalDB server.
//!
//! One typed method per wire action. Each method encodes a request frame,
//! sends it, reads one response frame, and unpacks the `{status, data}`
//! envelope. Errors surface as [`ClientError`]; a missing document on `get`
//! is `Ok(None)` because the wire carries no detail beyond the status.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use shoal_core::query::Where;
use shoal_core::types::DocId;
use shoal_core::{Response, Status};

use crate::error::ClientError;
use crate::protocol::{actions, decode_message, encode_message, read_frame, write_frame, Request};

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for a ShoalDB server.
pub struct ShoalClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl ShoalClient {
    /// Connect to a server.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    /// Store one document; returns its allocated id.
    pub async fn create(&mut self, collection: &str, doc: &Value) -> Result<DocId> {
        let resp = self
            .request(actions::CREATE, collection, doc.clone())
            .await?;
        let data = expect_data(resp)?;
        data.get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ClientError::Protocol("missing 'id' in create response".to_string()))
    }

    /// Fetch one document. `Ok(None)` when the id is unknown.
    pub async fn get(&mut self, collection: &str, id: DocId) -> Result<Option<Value>> {
        let resp = self
            .request(actions::GET, collection, json!({ "docId": id }))
            .await?;
        if resp.status == Status::Error {
            return Ok(None);
        }
        Ok(resp.data.and_then(|d| d.get("doc").cloned()))
    }

    /// Replace one document in place; returns the new document, or `None`
    /// when the id is unknown.
    pub async fn update(
        &mut self,
        collection: &str,
        id: DocId,
        doc: &Value,
    ) -> Result<Option<Value>> {
        let payload = json!({ "query": { "docId": id }, "update": doc });
        let resp = self.request(actions::UPDATE, collection, payload).await?;
        if resp.status == Status::Error {
            return Ok(None);
        }
        Ok(resp.data.and_then(|d| d.get("doc").cloned()))
    }

    /// Delete one document; `false` when the id is unknown.
    pub async fn delete(&mut self, collection: &str, id: DocId) -> Result<bool> {
        let resp = self
            .request(actions::DELETE, collection, json!({ "docId": id }))
            .await?;
        Ok(resp.status == Status::Ok)
    }

    /// Store a batch of documents; returns the allocated ids in input order.
    pub async fn create_many(&mut self, collection: &str, docs: &[Value]) -> Result<Vec<DocId>> {
        let resp = self
            .request(actions::CREATE_MANY, collection, Value::Array(docs.to_vec()))
            .await?;
        let data = expect_data(resp)?;
        let ids = data
            .get("ids")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::Protocol("missing 'ids' in response".to_string()))?;
        ids.iter()
            .map(|v| {
                v.as_u64()
                    .ok_or_else(|| ClientError::Protocol("non-integer id".to_string()))
            })
            .collect()
    }

    /// Fetch a batch of documents; unknown ids are absent from the result.
    pub async fn get_many(
        &mut self,
        collection: &str,
        ids: &[DocId],
    ) -> Result<BTreeMap<DocId, Value>> {
        let payload = Value::Array(ids.iter().map(|&id| json!(id)).collect());
        let resp = self.request(actions::GET_MANY, collection, payload).await?;
        let data = expect_data(resp)?;
        let map = data
            .as_object()
            .ok_or_else(|| ClientError::Protocol("expected a map response".to_string()))?;
        let mut found = BTreeMap::new();
        for (key, doc) in map {
            let id: DocId = key
                .parse()
                .map_err(|_| ClientError::Protocol(format!("non-integer key '{key}'")))?;
            found.insert(id, doc.clone());
        }
        Ok(found)
    }

    /// Update a batch; `None` when any id was unknown (entries before the
    /// miss may still have been written).
    pub async fn update_many(
        &mut self,
        collection: &str,
        entries: &[(DocId, Value)],
    ) -> Result<Option<Vec<(DocId, Value)>>> {
        let payload = Value::Array(
            entries
                .iter()
                .map(|(id, doc)| json!({ "id": id, "doc": doc }))
                .collect(),
        );
        let resp = self
            .request(actions::UPDATE_MANY, collection, payload)
            .await?;
        if resp.status == Status::Error {
            return Ok(None);
        }
        let data = resp
            .data
            .ok_or_else(|| ClientError::Protocol("missing data in response".to_string()))?;
        let updated = data
            .get("updated")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::Protocol("missing 'updated' in response".to_string()))?;
        let mut out = Vec::with_capacity(updated.len());
        for item in updated {
            let id = item
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| ClientError::Protocol("missing 'id' in update entry".to_string()))?;
            let doc = item.get("doc").cloned().unwrap_or(Value::Null);
            out.push((id, doc));
        }
        Ok(Some(out))
    }

    /// Delete a batch; returns the ids actually removed.
    pub async fn delete_many(&mut self, collection: &str, ids: &[DocId]) -> Result<Vec<DocId>> {
        let payload = Value::Array(ids.iter().map(|&id| json!(id)).collect());
        let resp = self
            .request(actions::DELETE_MANY, collection, payload)
            .await?;
        let data = expect_data(resp)?;
        let deleted = data
            .get("deleted")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::Protocol("missing 'deleted' in response".to_string()))?;
        deleted
            .iter()
            .map(|v| {
                v.as_u64()
                    .ok_or_else(|| ClientError::Protocol("non-integer id".to_string()))
            })
            .collect()
    }

    /// Scan the collection with a predicate; returns `(id, doc)` matches.
    pub async fn find(&mut self, collection: &str, filter: &Where) -> Result<Vec<(DocId, Value)>> {
        let payload = serde_json::to_value(filter)
            .map_err(|e| ClientError::Protocol(format!("unencodable filter: {e}")))?;
        let resp = self.request(actions::FIND, collection, payload).await?;
        let data = expect_data(resp)?;
        let matches = data
            .as_array()
            .ok_or_else(|| ClientError::Protocol("expected an array response".to_string()))?;
        let mut out = Vec::with_capacity(matches.len());
        for item in matches {
            let id = item
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| ClientError::Protocol("missing 'id' in match".to_string()))?;
            let doc = item.get("doc").cloned().unwrap_or(Value::Null);
            out.push((id, doc));
        }
        Ok(out)
    }

    /// Send a raw request envelope and read one response frame.
    pub async fn request(
        &mut self,
        action: &str,
        collection: &str,
        payload: Value,
    ) -> Result<Response<Value>> {
        let request = Request::new(action, collection, payload);
        let bytes = encode_message(&request)?;
        write_frame(&mut self.writer, &bytes).await?;

        let frame = read_frame(&mut self.reader, None)
            .await?
            .ok_or(ClientError::Disconnected)?;
        Ok(decode_message(&frame)?)
    }
}

fn expect_data(resp: Response<Value>) -> Result<Value> {
    match resp.status {
        Status::Ok => resp
            .data
            .ok_or_else(|| ClientError::Protocol("missing data in OK response".to_string())),
        Status::Error => Err(ClientError::Rejected),
    }
}
