//! In-process fake language server for client tests.
//!
//! The fake speaks real `Content-Length` framing over a `tokio::io::duplex`
//! pipe, so the client under test runs exactly as it would against a child
//! process.

#![allow(dead_code)]

use cra_lsp::codec::{FrameReader, FrameWriter};
use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

pub struct FakeServer {
    pub reader: ReadHalf<DuplexStream>,
    pub writer: WriteHalf<DuplexStream>,
    /// Resolves to every frame the server received, in order.
    pub received: JoinHandle<Vec<Value>>,
}

/// Spawn a fake server driven by `respond`.
///
/// For each incoming frame `respond` returns the frames to send back, or
/// `None` to hang up immediately.
pub fn spawn<F>(mut respond: F) -> FakeServer
where
    F: FnMut(&Value) -> Option<Vec<Value>> + Send + 'static,
{
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_end);
    let (server_read, server_write) = tokio::io::split(server_end);

    let received = tokio::spawn(async move {
        let mut reader = FrameReader::new(server_read);
        let mut writer = FrameWriter::new(server_write);
        let mut seen = Vec::new();

        while let Ok(Some(frame)) = reader.read_frame().await {
            let is_exit = frame["method"] == "exit";
            let replies = respond(&frame);
            seen.push(frame);
            let Some(replies) = replies else { break };
            for reply in &replies {
                if writer.write_frame(reply).await.is_err() {
                    return seen;
                }
            }
            if is_exit {
                break;
            }
        }
        seen
    });

    FakeServer {
        reader: client_read,
        writer: client_write,
        received,
    }
}

pub fn result(request: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"].clone(), "result": result})
}

pub fn error(request: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": request["id"].clone(),
        "error": {"code": code, "message": message}
    })
}

pub fn initialize_result() -> Value {
    json!({
        "capabilities": {"completionProvider": {"triggerCharacters": ["."]}},
        "serverInfo": {"name": "fake-cra", "version": "0.0.1"}
    })
}

pub fn items(labels: &[&str]) -> Value {
    Value::Array(labels.iter().map(|l| json!({"label": l})).collect())
}

/// Replies for the lifecycle methods every test needs.
pub fn lifecycle(frame: &Value) -> Option<Vec<Value>> {
    match frame["method"].as_str() {
        Some("initialize") => Some(vec![result(frame, initialize_result())]),
        Some("shutdown") => Some(vec![result(frame, Value::Null)]),
        _ => Some(vec![]),
    }
}

pub fn methods(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .filter_map(|f| f["method"].as_str())
        .collect()
}
