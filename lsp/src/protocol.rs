//! LSP message serde types for the server side of JSON-RPC.
//!
//! Only the handful of methods the server understands are modelled; every
//! other request is answered with "method not found".

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::types::Diagnostic;

/// Text documents are always synced in full.
const TEXT_DOCUMENT_SYNC_FULL: u8 = 1;

/// `MessageType.Error` for `window/logMessage`.
pub(crate) const MESSAGE_TYPE_ERROR: u8 = 1;

/// JSON-RPC error returned in a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Server not initialized")]
    ServerNotInitialized,
}

impl ProtocolError {
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::ServerNotInitialized => -32002,
        }
    }
}

/// A frame received from the editor.
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Reply to a server-initiated request. The server sends none, so these
    /// are only logged.
    Response { id: Value },
}

pub(crate) fn parse_incoming(frame: &Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();
    let params = frame.get("params").cloned();

    match (id, method, has_result_or_error) {
        (Some(id), None, true) => Some(Incoming::Response { id: id.clone() }),
        (Some(id), Some(method), _) => Some(Incoming::Request {
            id: id.clone(),
            method,
            params,
        }),
        (None, Some(method), _) => Some(Incoming::Notification { method, params }),
        _ => None,
    }
}

/// Decode request/notification params, treating absent params as `null`.
pub(crate) fn decode_params<T: for<'de> Deserialize<'de>>(
    params: Option<Value>,
) -> Result<T, ProtocolError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: &ProtocolError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LspPosition {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LspRange {
    pub start: LspPosition,
    pub end: LspPosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkspaceFolder {
    pub uri: Url,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    #[serde(default)]
    pub root_uri: Option<Url>,
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default)]
    pub workspace_folders: Option<Vec<WorkspaceFolder>>,
}

impl InitializeParams {
    /// `rootUri`, then the first workspace folder, then the legacy `rootPath`.
    pub fn workspace_root(&self) -> Option<PathBuf> {
        self.root_uri
            .as_ref()
            .and_then(file_uri_to_path)
            .or_else(|| {
                self.workspace_folders
                    .as_deref()
                    .and_then(<[WorkspaceFolder]>::first)
                    .and_then(|folder| file_uri_to_path(&folder.uri))
            })
            .or_else(|| {
                self.root_path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextDocumentItem {
    pub uri: Url,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidOpenParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionedTextDocumentIdentifier {
    pub uri: Url,
    pub version: i32,
}

/// One entry of `contentChanges`. No range means full replacement.
#[derive(Debug, Deserialize)]
pub struct ContentChange {
    #[serde(default)]
    pub range: Option<LspRange>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidChangeParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentIdentifier {
    pub uri: Url,
}

/// Shape shared by `didClose` and `textDocument/diagnostic`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEvent {
    pub uri: Url,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DidChangeWatchedFilesParams {
    #[serde(default)]
    pub changes: Vec<FileEvent>,
}

pub(crate) fn initialize_result() -> Value {
    serde_json::json!({
        "capabilities": {
            "textDocumentSync": TEXT_DOCUMENT_SYNC_FULL,
            "diagnosticProvider": {
                "interFileDependencies": true,
                "workspaceDiagnostics": false
            }
        },
        "serverInfo": {
            "name": "rgbds-language-server",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

pub(crate) fn publish_diagnostics_params(uri: &Url, diagnostics: &[Diagnostic]) -> Value {
    serde_json::json!({
        "uri": uri,
        "diagnostics": diagnostics,
    })
}

/// A `full` document diagnostic report.
pub(crate) fn full_report(items: &[Diagnostic]) -> Value {
    serde_json::json!({
        "kind": "full",
        "items": items,
    })
}

pub(crate) fn log_message_params(message_type: u8, message: &str) -> Value {
    serde_json::json!({
        "type": message_type,
        "message": message,
    })
}

/// Decoded filesystem path for a `file:` URI; `None` for any other scheme.
pub fn file_uri_to_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosticSeverity;

    #[test]
    fn test_parse_request() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "textDocument/diagnostic",
            "params": { "textDocument": { "uri": "file:///a.asm" } }
        });
        match parse_incoming(&frame) {
            Some(Incoming::Request { id, method, params }) => {
                assert_eq!(id, 7);
                assert_eq!(method, "textDocument/diagnostic");
                assert!(params.is_some());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_string_id_request() {
        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": "abc", "method": "shutdown" });
        assert_eq!(
            parse_incoming(&frame),
            Some(Incoming::Request {
                id: Value::from("abc"),
                method: "shutdown".to_string(),
                params: None,
            })
        );
    }

    #[test]
    fn test_parse_notification() {
        let frame = serde_json::json!({ "jsonrpc": "2.0", "method": "exit" });
        assert_eq!(
            parse_incoming(&frame),
            Some(Incoming::Notification {
                method: "exit".to_string(),
                params: None,
            })
        );
    }

    #[test]
    fn test_parse_response() {
        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": 3, "result": null });
        assert_eq!(
            parse_incoming(&frame),
            Some(Incoming::Response { id: Value::from(3) })
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(parse_incoming(&serde_json::json!({ "jsonrpc": "2.0" })), None);
        assert_eq!(parse_incoming(&serde_json::json!({ "id": 1 })), None);
    }

    #[test]
    fn test_error_response_serialization() {
        let resp = Response::err(
            Value::from(5),
            &ProtocolError::MethodNotFound("textDocument/hover".to_string()),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], 5);
        assert_eq!(json["error"]["code"], -32601);
        assert_eq!(
            json["error"]["message"],
            "Method not found: textDocument/hover"
        );
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ProtocolError::Parse(String::new()).code(), -32700);
        assert_eq!(ProtocolError::InvalidRequest.code(), -32600);
        assert_eq!(ProtocolError::ServerNotInitialized.code(), -32002);
    }

    #[test]
    fn test_null_result_is_serialized() {
        // `shutdown` must answer with an explicit `"result": null`.
        let resp = Response::ok(Value::from(1), Value::Null);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\":null"), "{json}");
    }

    #[test]
    fn test_notification_without_params() {
        let notif = Notification::new("exit", None);
        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["method"], "exit");
        assert!(json.get("params").is_none(), "params must be omitted, not null");
    }

    #[test]
    fn test_initialize_result_capabilities() {
        let result = initialize_result();
        assert_eq!(result["capabilities"]["textDocumentSync"], 1);
        assert_eq!(
            result["capabilities"]["diagnosticProvider"]["interFileDependencies"],
            true
        );
        assert_eq!(result["serverInfo"]["name"], "rgbds-language-server");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_workspace_root_precedence() {
        let params: InitializeParams = serde_json::from_value(serde_json::json!({
            "rootUri": "file:///from/uri",
            "rootPath": "/from/path",
            "workspaceFolders": [{ "uri": "file:///from/folder", "name": "f" }]
        }))
        .unwrap();
        assert_eq!(params.workspace_root(), Some(PathBuf::from("/from/uri")));

        let params: InitializeParams = serde_json::from_value(serde_json::json!({
            "rootUri": null,
            "rootPath": "/from/path",
            "workspaceFolders": [{ "uri": "file:///from/folder", "name": "f" }]
        }))
        .unwrap();
        assert_eq!(params.workspace_root(), Some(PathBuf::from("/from/folder")));

        let params: InitializeParams = serde_json::from_value(serde_json::json!({
            "rootPath": "/from/path"
        }))
        .unwrap();
        assert_eq!(params.workspace_root(), Some(PathBuf::from("/from/path")));

        let params: InitializeParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.workspace_root(), None);
    }

    #[test]
    fn test_did_change_params() {
        let params: DidChangeParams = decode_params(Some(serde_json::json!({
            "textDocument": { "uri": "file:///a.asm", "version": 4 },
            "contentChanges": [
                { "text": "full" },
                { "range": { "start": { "line": 0, "character": 1 }, "end": { "line": 0, "character": 2 } }, "text": "x" }
            ]
        })))
        .unwrap();
        assert_eq!(params.text_document.version, 4);
        assert!(params.content_changes[0].range.is_none());
        assert_eq!(params.content_changes[1].range.unwrap().start.character, 1);
    }

    #[test]
    fn test_decode_params_reports_invalid() {
        let err = decode_params::<TextDocumentParams>(Some(serde_json::json!({ "nope": 1 })))
            .unwrap_err();
        assert_eq!(err.code(), -32602);
        let err = decode_params::<TextDocumentParams>(None).unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn test_full_report_shape() {
        let items = vec![Diagnostic::whole_line(DiagnosticSeverity::Error, 0, "bad")];
        let report = full_report(&items);
        assert_eq!(report["kind"], "full");
        assert_eq!(report["items"][0]["message"], "bad");

        let empty = full_report(&[]);
        assert_eq!(empty["items"], serde_json::json!([]));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_file_uri_to_path_decodes() {
        let uri = Url::parse("file:///home/test/src/main%20bank.asm").unwrap();
        assert_eq!(
            file_uri_to_path(&uri),
            Some(PathBuf::from("/home/test/src/main bank.asm"))
        );
    }

    #[test]
    fn test_file_uri_to_path_non_file_scheme() {
        let uri = Url::parse("https://example.com/test.asm").unwrap();
        assert!(file_uri_to_path(&uri).is_none());
    }
}
