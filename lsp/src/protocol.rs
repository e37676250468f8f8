//! JSON-RPC message shapes and the Linterhub protocol extensions.

use std::path::PathBuf;

use linterhub_types::{Diagnostic, EngineDescriptor, EngineMode, OperationId, StatusState};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const INVALID_REQUEST: i64 = -32600;
pub const SERVER_NOT_INITIALIZED: i64 = -32002;

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";
    pub const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_SAVE: &str = "textDocument/didSave";
    pub const DID_CLOSE: &str = "textDocument/didClose";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

    pub const CATALOG: &str = "linterhub/catalog";
    pub const ACTIVATE: &str = "linterhub/activate";
    pub const ANALYZE: &str = "linterhub/analyze";
    pub const VERSION: &str = "linterhub/version";
    pub const LINTER_VERSION: &str = "linterhub/linterVersion";
    pub const LINTER_INSTALL: &str = "linterhub/linterInstall";
    pub const INSTALL: &str = "linterhub/install";
    pub const ACTIVE_DOCUMENT: &str = "linterhub/activeDocument";
    pub const CONFIG: &str = "linterhub/config";
    pub const STATUS: &str = "linterhub/status";
    pub const PROGRESS: &str = "linterhub/progress";
    pub const UPDATE_CONFIG: &str = "linterhub/updateConfig";
}

/// A parsed incoming frame.
#[derive(Debug)]
pub enum Incoming {
    /// Reply to a request this server sent.
    Response { id: u64, body: Value },
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification { method: String, params: Value },
}

/// Classify a raw frame. Returns `None` for frames that are none of the three.
#[must_use]
pub fn parse_incoming(frame: &Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame.get("method").and_then(Value::as_str).map(String::from);
    let params = frame.get("params").cloned().unwrap_or(Value::Null);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), None, true) => Some(Incoming::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(Incoming::Request {
            id: id.clone(),
            method,
            params,
        }),
        (None, Some(method), _) => Some(Incoming::Notification { method, params }),
        _ => None,
    }
}

#[must_use]
pub fn request(id: u64, method: &str, params: &Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

#[must_use]
pub fn notification(method: &str, params: &Value) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params})
}

#[must_use]
pub fn response(id: &Value, result: &Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

#[must_use]
pub fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub root_uri: Option<String>,
    pub root_path: Option<String>,
}

impl InitializeParams {
    /// Project directory named by the client; `rootUri` wins over `rootPath`.
    #[must_use]
    pub fn project_root(&self) -> Option<PathBuf> {
        let from_uri = self
            .root_uri
            .as_deref()
            .and_then(|uri| Url::parse(uri).ok())
            .and_then(|url| url.to_file_path().ok());
        from_uri.or_else(|| {
            self.root_path
                .as_deref()
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
        })
    }
}

#[must_use]
pub fn initialize_result() -> Value {
    json!({
        "capabilities": {
            "textDocumentSync": {
                "openClose": true,
                "change": 1,
                "save": {"includeText": false},
            },
        },
        "serverInfo": {
            "name": "linterhub",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct DidChangeConfigurationParams {
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

/// Shared shape of `didOpen`, `didChange`, `didSave` and `didClose`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
pub struct ActivateParams {
    pub linter: String,
    pub activate: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeParams {
    #[serde(default)]
    pub full: bool,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinterParams {
    pub linter: String,
}

#[derive(Debug, Deserialize)]
pub struct ActiveDocumentParams {
    pub uri: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogResult {
    pub linters: Vec<EngineDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct InstallResult {
    pub path: String,
}

/// Client answer to `linterhub/config`.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigResult {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default, rename = "strictSSL")]
    pub strict_ssl: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StatusParams<'a> {
    pub id: Option<&'a OperationId>,
    pub state: StatusState,
}

#[derive(Debug, Serialize)]
pub struct ProgressParams<'a> {
    pub visible: bool,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigParams {
    pub cli_path: String,
    pub mode: EngineMode,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// One diagnostic in LSP wire form.
#[derive(Debug, Serialize)]
pub struct LspDiagnostic {
    pub range: Range,
    pub severity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub source: String,
    pub message: String,
}

impl From<&Diagnostic> for LspDiagnostic {
    fn from(diagnostic: &Diagnostic) -> Self {
        let message = diagnostic.message();
        let span = message.span();
        Self {
            range: Range {
                start: Position {
                    line: span.line,
                    character: span.column,
                },
                end: Position {
                    line: span.line_end,
                    character: span.column_end,
                },
            },
            severity: diagnostic.severity().to_lsp(),
            code: message.rule_id().map(String::from),
            source: format!("linterhub:{}", diagnostic.source()),
            message: message.text().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

impl PublishDiagnosticsParams {
    #[must_use]
    pub fn new(uri: &str, diagnostics: &[Diagnostic]) -> Self {
        Self {
            uri: uri.to_string(),
            diagnostics: diagnostics.iter().map(LspDiagnostic::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linterhub_types::{Message, Severity, Span};

    #[test]
    fn frames_are_classified() {
        let reply = json!({"jsonrpc": "2.0", "id": 3, "result": {"proxy": null}});
        assert!(matches!(parse_incoming(&reply), Some(Incoming::Response { id: 3, .. })));

        let call = json!({"jsonrpc": "2.0", "id": "a", "method": "linterhub/catalog"});
        match parse_incoming(&call) {
            Some(Incoming::Request { id, method, params }) => {
                assert_eq!(id, json!("a"));
                assert_eq!(method, methods::CATALOG);
                assert!(params.is_null());
            }
            other => panic!("expected request, got {other:?}"),
        }

        let note = json!({"jsonrpc": "2.0", "method": "exit"});
        assert!(matches!(parse_incoming(&note), Some(Incoming::Notification { .. })));

        assert!(parse_incoming(&json!({"jsonrpc": "2.0"})).is_none());
        assert!(parse_incoming(&json!({"id": "x", "result": 1})).is_none());
    }

    #[test]
    fn root_uri_wins_over_root_path() {
        let params: InitializeParams = serde_json::from_value(json!({
            "rootUri": "file:///work/project",
            "rootPath": "/elsewhere",
        }))
        .unwrap();
        assert_eq!(params.project_root(), Some(PathBuf::from("/work/project")));

        let params: InitializeParams =
            serde_json::from_value(json!({"rootUri": null, "rootPath": "/work/p"})).unwrap();
        assert_eq!(params.project_root(), Some(PathBuf::from("/work/p")));

        assert_eq!(InitializeParams::default().project_root(), None);
    }

    #[test]
    fn diagnostics_take_lsp_shape() {
        let span = Span {
            line: 4,
            line_end: 4,
            column: 0,
            column_end: 1000,
        };
        let message = Message::new(
            Severity::Warning,
            span,
            "Missing semicolon.".into(),
            Some("W033".into()),
        );
        let params = PublishDiagnosticsParams::new(
            "file:///project/a.js",
            &[Diagnostic::new(message, "jshint")],
        );

        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(
            value,
            json!({
                "uri": "file:///project/a.js",
                "diagnostics": [{
                    "range": {
                        "start": {"line": 4, "character": 0},
                        "end": {"line": 4, "character": 1000},
                    },
                    "severity": 2,
                    "code": "W033",
                    "source": "linterhub:jshint",
                    "message": "Missing semicolon.",
                }],
            })
        );
    }

    #[test]
    fn status_and_update_config_wire_names() {
        let id = OperationId::system();
        let status = StatusParams {
            id: Some(&id),
            state: StatusState::ProgressStart,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"id": "_system", "state": 1})
        );
        let no_cli = StatusParams {
            id: None,
            state: StatusState::NoCli,
        };
        assert_eq!(
            serde_json::to_value(&no_cli).unwrap(),
            json!({"id": null, "state": 10})
        );

        let update = UpdateConfigParams {
            cli_path: "/home/u/.linterhub/cli/bin/linux-x64".into(),
            mode: EngineMode::NativeBinary,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["cliPath"], "/home/u/.linterhub/cli/bin/linux-x64");
        assert_eq!(value["mode"], serde_json::to_value(EngineMode::NativeBinary).unwrap());
    }

    #[test]
    fn config_result_accepts_partial_answers() {
        let config: ConfigResult =
            serde_json::from_value(json!({"proxy": "http://proxy:3128"})).unwrap();
        assert_eq!(config.proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(config.strict_ssl, None);

        let config: ConfigResult = serde_json::from_value(json!({"strictSSL": false})).unwrap();
        assert_eq!(config.strict_ssl, Some(false));
    }
}
