//! TCP server that wraps a ShoalDB [`Engine`].
//!
//! Each connected client sends length-prefixed MessagePack requests and
//! receives length-prefixed responses, strictly in order: the next request
//! is read only after the previous response is written. Framing violations,
//! oversize frames, and undecodable payloads close the connection.

use std::io;
use std::net::SocketAddr;

use serde_json::{json, Map, Value};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{error, info, warn};

use shoal_core::codec::{decode_doc, encode_doc};
use shoal_core::query::Where;
use shoal_core::types::DocId;
use shoal_core::{Engine, Response};

use crate::protocol::{
    actions, decode_message, encode_message, read_frame, write_frame, Request, READ_TIMEOUT,
};

/// A ShoalDB server bound to a TCP address.
pub struct ShoalServer {
    engine: Engine,
    listener: TcpListener,
}

impl ShoalServer {
    /// Bind the listener. Pass port 0 for an ephemeral port.
    pub async fn bind(engine: Engine, addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "server listening");
        Ok(Self { engine, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a shutdown signal is received, then flush
    /// the engine's log and stop its monitor before returning.
    pub async fn run(self) -> io::Result<()> {
        let accept_loop = async {
            loop {
                match self.listener.accept().await {
                    Ok((stream, addr)) => {
                        let engine = self.engine.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(engine, stream).await {
                                warn!(addr = %addr, error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown_signal() => {
                info!("shutdown signal received");
            }
        }

        if let Err(e) = self.engine.close() {
            warn!(error = %e, "engine close failed on shutdown");
        }
        Ok(())
    }
}

async fn handle_connection(engine: Engine, stream: TcpStream) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let payload = match read_frame(&mut reader, Some(READ_TIMEOUT)).await? {
            Some(payload) => payload,
            None => break, // client disconnected
        };
        if payload.is_empty() {
            continue;
        }

        let request: Request = match decode_message(&payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "undecodable request; closing connection");
                break;
            }
        };

        let known_action = actions::ALL.contains(&request.action.as_str());
        let response = dispatch(&engine, &request);
        let bytes = match encode_message(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "response encode failed; closing connection");
                break;
            }
        };
        write_frame(&mut writer, &bytes).await?;

        if !known_action {
            warn!(action = %request.action, "unknown action; closing connection");
            break;
        }
    }

    Ok(())
}

fn dispatch(engine: &Engine, request: &Request) -> Response<Value> {
    let collection = request.collection.as_str();
    let payload = &request.payload;
    match request.action.as_str() {
        actions::CREATE => handle_create(engine, collection, payload),
        actions::GET => handle_get(engine, collection, payload),
        actions::UPDATE => handle_update(engine, collection, payload),
        actions::DELETE => handle_delete(engine, collection, payload),
        actions::CREATE_MANY => handle_create_many(engine, collection, payload),
        actions::GET_MANY => handle_get_many(engine, collection, payload),
        actions::UPDATE_MANY => handle_update_many(engine, collection, payload),
        actions::DELETE_MANY => handle_delete_many(engine, collection, payload),
        actions::FIND => handle_find(engine, collection, payload),
        _ => Response::error(),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_create(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Ok(bytes) = encode_doc(payload) else {
        return Response::error();
    };
    engine
        .set(collection, bytes)
        .map(|id| json!({ "id": id }))
}

fn handle_get(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Some(id) = doc_id(payload) else {
        return Response::error();
    };
    match engine.get(collection, id).into_data() {
        Some(record) => match decode_doc(&record.bytes) {
            Ok(doc) => Response::ok(json!({ "id": record.id, "doc": doc })),
            Err(_) => Response::error(),
        },
        None => Response::error(),
    }
}

fn handle_update(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Some(id) = payload.get("query").and_then(doc_id) else {
        return Response::error();
    };
    let Some(update) = payload.get("update") else {
        return Response::error();
    };
    let Ok(bytes) = encode_doc(update) else {
        return Response::error();
    };
    engine
        .update(collection, id, bytes)
        .map(|record| json!({ "id": record.id, "doc": update }))
}

fn handle_delete(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Some(id) = doc_id(payload) else {
        return Response::error();
    };
    engine
        .delete(collection, id)
        .map(|_| json!({ "success": true }))
}

fn handle_create_many(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Some(items) = payload.as_array() else {
        return Response::error();
    };
    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        match encode_doc(item) {
            Ok(bytes) => docs.push(bytes),
            Err(_) => return Response::error(),
        }
    }
    engine
        .set_many(collection, docs)
        .map(|ids| json!({ "ids": ids }))
}

fn handle_get_many(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Some(ids) = id_list(payload) else {
        return Response::error();
    };
    match engine.get_many(collection, &ids).into_data() {
        Some(found) => {
            let mut map = Map::new();
            for (id, bytes) in found {
                match decode_doc(&bytes) {
                    Ok(doc) => {
                        map.insert(id.to_string(), doc);
                    }
                    Err(_) => return Response::error(),
                }
            }
            Response::ok(Value::Object(map))
        }
        None => Response::error(),
    }
}

fn handle_update_many(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Some(items) = payload.as_array() else {
        return Response::error();
    };
    let mut entries = Vec::with_capacity(items.len());
    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_u64) else {
            return Response::error();
        };
        let Some(doc) = item.get("doc") else {
            return Response::error();
        };
        let Ok(bytes) = encode_doc(doc) else {
            return Response::error();
        };
        entries.push((id, bytes));
        docs.push((id, doc.clone()));
    }
    match engine.update_many(collection, entries).into_data() {
        Some(_) => {
            let updated: Vec<Value> = docs
                .into_iter()
                .map(|(id, doc)| json!({ "id": id, "doc": doc }))
                .collect();
            Response::ok(json!({ "updated": updated }))
        }
        None => Response::error(),
    }
}

fn handle_delete_many(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Some(ids) = id_list(payload) else {
        return Response::error();
    };
    engine
        .delete_many(collection, &ids)
        .map(|deleted| json!({ "deleted": deleted }))
}

fn handle_find(engine: &Engine, collection: &str, payload: &Value) -> Response<Value> {
    let Ok(filter) = serde_json::from_value::<Where>(payload.clone()) else {
        return Response::error();
    };
    engine.find(collection, &filter).map(|found| {
        let matches: Vec<Value> = found
            .into_iter()
            .map(|f| json!({ "id": f.id, "doc": f.doc }))
            .collect();
        Value::Array(matches)
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn doc_id(payload: &Value) -> Option<DocId> {
    payload.get("docId").and_then(Value::as_u64)
}

fn id_list(payload: &Value) -> Option<Vec<DocId>> {
    payload.as_array()?.iter().map(Value::as_u64).collect()
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
