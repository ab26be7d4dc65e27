//! JSON-RPC envelopes and the canned LSP params the probe sends.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionParams, CompletionResponse, InitializeParams,
    PartialResultParams, Position, TextDocumentIdentifier, TextDocumentPositionParams, Uri,
    WorkDoneProgressParams, WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde::{Deserialize, Serialize};

/// JSON-RPC code for a method the receiver does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
pub enum UriError {
    #[error("cannot convert path to file URI: {}", path.display())]
    NotAbsolute { path: PathBuf },
    #[error("invalid URI: {uri}")]
    Invalid { uri: String },
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Deserialize, thiserror::Error)]
#[error("server returned error {code}: {message}")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// An incoming frame, classified by which JSON-RPC members it carries.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

pub(crate) fn classify(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id").filter(|id| !id.is_null());
    let method = frame
        .get("method")
        .and_then(serde_json::Value::as_str)
        .map(String::from);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method) {
        (Some(id), None) if is_reply => Some(Incoming::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method)) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// Serialize request or notification params; `null` (e.g. from `()`) means "no params".
pub(crate) fn params_value<P: Serialize>(
    params: P,
) -> serde_json::Result<Option<serde_json::Value>> {
    let value = serde_json::to_value(params)?;
    Ok((!value.is_null()).then_some(value))
}

/// Identity the client reports in `initialize`.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: String::from("cr-analyzer"),
            version: String::from("v1"),
        }
    }
}

/// Build `initialize` params: workspace edits enabled, one workspace folder at `root`.
#[allow(deprecated)]
pub fn initialize_params(root: &Uri, client: &ClientIdentity) -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        root_uri: Some(root.clone()),
        capabilities: ClientCapabilities {
            workspace: Some(WorkspaceClientCapabilities {
                apply_edit: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: root.clone(),
            name: String::from("workspace"),
        }]),
        client_info: Some(ClientInfo {
            name: client.name.clone(),
            version: Some(client.version.clone()),
        }),
        ..Default::default()
    }
}

pub fn completion_params(document: &Uri, position: Position) -> CompletionParams {
    CompletionParams {
        text_document_position: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier {
                uri: document.clone(),
            },
            position,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: None,
    }
}

/// Number of items in a completion response, whichever shape the server chose.
#[must_use]
pub fn completion_item_count(response: &CompletionResponse) -> usize {
    match response {
        CompletionResponse::Array(items) => items.len(),
        CompletionResponse::List(list) => list.items.len(),
    }
}

pub fn path_to_file_uri(path: &Path) -> Result<Uri, UriError> {
    let url = url::Url::from_file_path(path).map_err(|()| UriError::NotAbsolute {
        path: path.to_path_buf(),
    })?;
    parse_uri(url.as_str())
}

pub fn parse_uri(raw: &str) -> Result<Uri, UriError> {
    Uri::from_str(raw).map_err(|_| UriError::Invalid {
        uri: raw.to_string(),
    })
}
