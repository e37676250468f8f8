//! The editor side of the orchestrator, spoken over JSON-RPC.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use linterhub_engine::{Host, HostFut, InstallConfig, ProgressSink};
use linterhub_types::{Diagnostic, EngineMode, OperationId, StatusState};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{
    self, ConfigResult, ProgressParams, PublishDiagnosticsParams, StatusParams,
    UpdateConfigParams, methods,
};

/// How long to wait for the client to answer a server request.
pub const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) enum WriterCommand {
    Send(Value),
    Shutdown,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Cloneable handle for everything the server writes to the client.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<WriterCommand>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WriterCommand>) -> Self {
        Self {
            tx,
            pending: Arc::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, frame: Value) {
        if self.tx.send(WriterCommand::Send(frame)).is_err() {
            tracing::debug!("Writer closed; dropping outgoing frame");
        }
    }

    pub fn notify<T: Serialize + ?Sized>(&self, method: &str, params: &T) {
        match serde_json::to_value(params) {
            Ok(params) => self.send(protocol::notification(method, &params)),
            Err(e) => tracing::warn!(method, "Failed to encode notification: {e}"),
        }
    }

    pub fn respond<T: Serialize + ?Sized>(&self, id: &Value, result: &T) {
        match serde_json::to_value(result) {
            Ok(result) => self.send(protocol::response(id, &result)),
            Err(e) => {
                tracing::warn!("Failed to encode response: {e}");
                self.respond_error(id, protocol::INTERNAL_ERROR, "failed to encode result");
            }
        }
    }

    pub fn respond_error(&self, id: &Value, code: i64, message: &str) {
        self.send(protocol::error_response(id, code, message));
    }

    /// Send a request to the client and wait for its `result`.
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        self.send(protocol::request(id, method, &params));

        let reply = tokio::time::timeout(timeout, rx).await;
        self.pending().remove(&id);
        let mut body = reply
            .with_context(|| format!("{method} timed out after {timeout:?}"))?
            .with_context(|| format!("{method} was abandoned"))?;

        if let Some(error) = body.get("error") {
            return Err(anyhow!("{method} failed: {error}"));
        }
        Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }

    /// Deliver a client response. Returns false for unknown ids.
    pub fn resolve(&self, id: u64, body: Value) -> bool {
        match self.pending().remove(&id) {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
    }
}

struct ProgressView {
    visible: bool,
    text: String,
}

/// [`Host`] implementation that forwards to the connected client.
pub struct ClientHost {
    out: Outbound,
    fallback: InstallConfig,
    request_timeout: Duration,
    progress: Mutex<ProgressView>,
}

impl ClientHost {
    #[must_use]
    pub fn new(out: Outbound, fallback: InstallConfig) -> Self {
        Self {
            out,
            fallback,
            request_timeout: CLIENT_REQUEST_TIMEOUT,
            progress: Mutex::new(ProgressView {
                visible: false,
                text: String::new(),
            }),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn view(&self) -> MutexGuard<'_, ProgressView> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_install_config(&self) -> InstallConfig {
        let answer = self
            .out
            .request(methods::CONFIG, Value::Null, self.request_timeout)
            .await
            .and_then(|value| {
                serde_json::from_value::<Option<ConfigResult>>(value)
                    .context("decoding linterhub/config answer")
            });
        match answer {
            Ok(Some(config)) => InstallConfig {
                proxy: config
                    .proxy
                    .filter(|proxy| !proxy.is_empty())
                    .or_else(|| self.fallback.proxy.clone()),
                strict_ssl: config.strict_ssl.unwrap_or(self.fallback.strict_ssl),
            },
            Ok(None) => self.fallback.clone(),
            Err(e) => {
                tracing::warn!("Client did not answer install config, using defaults: {e:#}");
                self.fallback.clone()
            }
        }
    }
}

impl ProgressSink for ClientHost {
    fn visibility(&self, visible: bool) {
        let mut view = self.view();
        view.visible = visible;
        self.out.notify(
            methods::PROGRESS,
            &ProgressParams {
                visible,
                text: &view.text,
            },
        );
    }

    fn text(&self, text: &str) {
        let mut view = self.view();
        text.clone_into(&mut view.text);
        self.out.notify(
            methods::PROGRESS,
            &ProgressParams {
                visible: view.visible,
                text,
            },
        );
    }

    fn operation(&self, id: &OperationId, started: bool) {
        let state = if started {
            StatusState::ProgressStart
        } else {
            StatusState::ProgressEnd
        };
        self.status(Some(id), state);
    }
}

impl Host for ClientHost {
    fn status(&self, id: Option<&OperationId>, state: StatusState) {
        self.out.notify(methods::STATUS, &StatusParams { id, state });
    }

    fn publish_diagnostics(&self, uri: &str, diagnostics: &[Diagnostic]) {
        self.out.notify(
            methods::PUBLISH_DIAGNOSTICS,
            &PublishDiagnosticsParams::new(uri, diagnostics),
        );
    }

    fn install_config(&self) -> HostFut<'_, InstallConfig> {
        Box::pin(self.fetch_install_config())
    }

    fn save_settings(&self, cli_path: &Path, mode: EngineMode) {
        self.out.notify(
            methods::UPDATE_CONFIG,
            &UpdateConfigParams {
                cli_path: cli_path.display().to_string(),
                mode,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outbound() -> (Outbound, mpsc::UnboundedReceiver<WriterCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbound::new(tx), rx)
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<WriterCommand>) -> Value {
        match rx.try_recv() {
            Ok(WriterCommand::Send(frame)) => frame,
            Ok(WriterCommand::Shutdown) => panic!("unexpected shutdown"),
            Err(e) => panic!("no frame queued: {e}"),
        }
    }

    fn fallback() -> InstallConfig {
        InstallConfig {
            proxy: Some("http://fallback:8080".into()),
            strict_ssl: true,
        }
    }

    #[tokio::test]
    async fn request_resolves_with_result() {
        let (out, mut rx) = outbound();
        let waiter = {
            let out = out.clone();
            tokio::spawn(async move {
                out.request(methods::CONFIG, Value::Null, Duration::from_secs(5))
                    .await
            })
        };

        let frame = loop {
            if let Ok(WriterCommand::Send(frame)) = rx.try_recv() {
                break frame;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(frame["method"], methods::CONFIG);
        let id = frame["id"].as_u64().unwrap();
        assert!(out.resolve(id, json!({"jsonrpc": "2.0", "id": id, "result": {"proxy": "p"}})));
        assert!(!out.resolve(id, json!({})));

        assert_eq!(waiter.await.unwrap().unwrap(), json!({"proxy": "p"}));
    }

    #[tokio::test]
    async fn request_error_and_timeout_are_errors() {
        let (out, mut rx) = outbound();
        let err = out
            .request(methods::CONFIG, Value::Null, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        next_frame(&mut rx);

        let waiter = {
            let out = out.clone();
            tokio::spawn(async move {
                out.request(methods::CONFIG, Value::Null, Duration::from_secs(5))
                    .await
            })
        };
        let id = loop {
            if let Ok(WriterCommand::Send(frame)) = rx.try_recv() {
                break frame["id"].as_u64().unwrap();
            }
            tokio::task::yield_now().await;
        };
        out.resolve(id, json!({"id": id, "error": {"code": -32601, "message": "nope"}}));
        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn install_config_falls_back_when_client_is_silent() {
        let (out, _rx) = outbound();
        let host = ClientHost::new(out, fallback()).with_request_timeout(Duration::from_millis(10));
        assert_eq!(host.install_config().await, fallback());
    }

    #[tokio::test]
    async fn progress_messages_carry_visibility_and_text() {
        let (out, mut rx) = outbound();
        let host = ClientHost::new(out, fallback());

        host.visibility(true);
        host.text("⠋");
        host.visibility(false);

        let params: Vec<Value> = (0..3).map(|_| next_frame(&mut rx)["params"].clone()).collect();
        assert_eq!(
            params,
            vec![
                json!({"visible": true, "text": ""}),
                json!({"visible": true, "text": "⠋"}),
                json!({"visible": false, "text": "⠋"}),
            ]
        );
    }

    #[tokio::test]
    async fn operation_hook_sends_status() {
        let (out, mut rx) = outbound();
        let host = ClientHost::new(out, fallback());

        host.operation(&OperationId::from("/p/a.js"), true);
        host.operation(&OperationId::from("/p/a.js"), false);
        host.status(None, StatusState::NoCli);

        let frames: Vec<Value> = (0..3).map(|_| next_frame(&mut rx)).collect();
        assert!(frames.iter().all(|f| f["method"] == methods::STATUS));
        assert_eq!(frames[0]["params"], json!({"id": "/p/a.js", "state": 1}));
        assert_eq!(frames[1]["params"], json!({"id": "/p/a.js", "state": 2}));
        assert_eq!(frames[2]["params"], json!({"id": null, "state": 10}));
    }

    #[tokio::test]
    async fn save_settings_sends_update_config() {
        let (out, mut rx) = outbound();
        let host = ClientHost::new(out, fallback());

        host.save_settings(Path::new("/opt/linterhub/bin/linux-x64"), EngineMode::NativeBinary);

        let frame = next_frame(&mut rx);
        assert_eq!(frame["method"], methods::UPDATE_CONFIG);
        assert_eq!(frame["params"]["cliPath"], "/opt/linterhub/bin/linux-x64");
        assert!(frame.get("id").is_none());
    }
}
