//! Language server session: reads client frames, dispatches them to one
//! [`Orchestrator`] and writes replies and notifications back.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use linterhub_config::{EngineDefaults, Settings};
use linterhub_engine::{Host, InstallConfig, Orchestrator};
use linterhub_types::RunTrigger;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::codec::{FrameReader, FrameWriter};
use crate::host::{ClientHost, Outbound, WriterCommand};
use crate::protocol::{
    self, ActivateParams, ActiveDocumentParams, AnalyzeParams, CatalogResult,
    DidChangeConfigurationParams, Incoming, InitializeParams, InstallResult, LinterParams,
    TextDocumentParams, methods,
};

/// Builds the orchestrator for a session once the project root is known.
pub type OrchestratorFactory =
    Arc<dyn Fn(Arc<dyn Host>, PathBuf) -> Orchestrator + Send + Sync>;

struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_params(e: impl ToString) -> Self {
        Self {
            code: protocol::INVALID_PARAMS,
            message: e.to_string(),
        }
    }

    fn internal(e: impl ToString) -> Self {
        Self {
            code: protocol::INTERNAL_ERROR,
            message: e.to_string(),
        }
    }
}

fn params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct Server {
    defaults: EngineDefaults,
    factory: OrchestratorFactory,
}

impl Server {
    /// Server whose sessions run real engine processes.
    #[must_use]
    pub fn new(defaults: EngineDefaults) -> Self {
        let engine_defaults = defaults.clone();
        let factory: OrchestratorFactory =
            Arc::new(move |host: Arc<dyn Host>, project: PathBuf| {
                Orchestrator::new(host, engine_defaults.clone(), project)
            });
        Self { defaults, factory }
    }

    #[must_use]
    pub fn with_factory(defaults: EngineDefaults, factory: OrchestratorFactory) -> Self {
        Self { defaults, factory }
    }

    /// Serve one client until `exit` or end of input.
    ///
    /// Returns `Ok(true)` when the client asked for `shutdown` before leaving.
    pub async fn serve<R, W>(&self, input: R, output: W) -> Result<bool>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(output);
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("Client write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let out = Outbound::new(writer_tx);
        let mut session = Session::new(self, out.clone());
        let mut reader = FrameReader::new(input);

        let result = loop {
            session.reap();
            let frame = match reader.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("Client closed the connection");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };
            let Some(incoming) = protocol::parse_incoming(&frame) else {
                tracing::debug!("Ignoring malformed JSON-RPC frame");
                continue;
            };
            match incoming {
                Incoming::Response { id, body } => {
                    if !out.resolve(id, body) {
                        tracing::debug!(id, "Response for unknown request");
                    }
                }
                Incoming::Request { id, method, params } => {
                    session.handle_request(id, &method, params);
                }
                Incoming::Notification { method, params } => {
                    if session.handle_notification(&method, params) == Flow::Exit {
                        break Ok(());
                    }
                }
            }
        };

        let clean = session.shutdown_requested;
        session.close().await;
        out.shutdown();
        if let Err(e) = writer_handle.await {
            tracing::warn!("Writer task failed: {e}");
        }
        result.map(|()| clean)
    }
}

struct Session {
    defaults: EngineDefaults,
    factory: OrchestratorFactory,
    out: Outbound,
    host: Arc<ClientHost>,
    orchestrator: Option<Arc<Orchestrator>>,
    shutdown_requested: bool,
    tasks: JoinSet<()>,
}

impl Session {
    fn new(server: &Server, out: Outbound) -> Self {
        let fallback = InstallConfig {
            proxy: server.defaults.proxy.clone(),
            strict_ssl: server.defaults.strict_ssl,
        };
        Self {
            defaults: server.defaults.clone(),
            factory: Arc::clone(&server.factory),
            host: Arc::new(ClientHost::new(out.clone(), fallback)),
            out,
            orchestrator: None,
            shutdown_requested: false,
            tasks: JoinSet::new(),
        }
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined
                && e.is_panic()
            {
                tracing::error!("Request task panicked: {e}");
            }
        }
    }

    fn handle_request(&mut self, id: Value, method: &str, params: Value) {
        tracing::debug!(method, "Request");
        if method == methods::INITIALIZE {
            self.initialize(&id, params);
            return;
        }
        let Some(orchestrator) = self.orchestrator.clone() else {
            self.out.respond_error(
                &id,
                protocol::SERVER_NOT_INITIALIZED,
                "server not initialized",
            );
            return;
        };
        if self.shutdown_requested {
            self.out
                .respond_error(&id, protocol::INVALID_REQUEST, "server is shutting down");
            return;
        }

        match method {
            methods::SHUTDOWN => {
                self.shutdown_requested = true;
                orchestrator.shutdown();
                self.out.respond(&id, &Value::Null);
            }
            methods::CATALOG
            | methods::ACTIVATE
            | methods::ANALYZE
            | methods::VERSION
            | methods::LINTER_VERSION
            | methods::LINTER_INSTALL
            | methods::INSTALL => {
                let out = self.out.clone();
                let method = method.to_string();
                self.tasks.spawn(async move {
                    match engine_request(&orchestrator, &method, params).await {
                        Ok(result) => out.respond(&id, &result),
                        Err(e) => out.respond_error(&id, e.code, &e.message),
                    }
                });
            }
            _ => {
                tracing::debug!(method, "Unhandled request");
                self.out.respond_error(
                    &id,
                    protocol::METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                );
            }
        }
    }

    fn initialize(&mut self, id: &Value, raw: Value) {
        if self.orchestrator.is_some() {
            self.out
                .respond_error(id, protocol::INVALID_REQUEST, "initialize sent twice");
            return;
        }
        let init: InitializeParams = match params(raw) {
            Ok(init) => init,
            Err(e) => {
                self.out.respond_error(id, e.code, &e.message);
                return;
            }
        };
        let project = init.project_root().unwrap_or_else(|| {
            tracing::warn!("Client sent no workspace root; using the working directory");
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        });
        tracing::info!(project = %project.display(), "Session initialized");

        let host: Arc<dyn Host> = Arc::<ClientHost>::clone(&self.host);
        self.orchestrator = Some(Arc::new((self.factory)(host, project)));
        self.out.respond(id, &protocol::initialize_result());
    }

    fn handle_notification(&mut self, method: &str, params: Value) -> Flow {
        if method == methods::EXIT {
            if !self.shutdown_requested {
                tracing::warn!("Exit without shutdown");
            }
            return Flow::Exit;
        }
        let Some(orchestrator) = self.orchestrator.clone() else {
            tracing::debug!(method, "Notification before initialize ignored");
            return Flow::Continue;
        };

        match method {
            methods::INITIALIZED => tracing::debug!("Client initialized"),
            methods::DID_CHANGE_CONFIGURATION => self.configure(orchestrator, params),
            methods::DID_OPEN => self.analyze_document(orchestrator, params, RunTrigger::OnOpen),
            methods::DID_CHANGE => self.analyze_document(orchestrator, params, RunTrigger::OnType),
            methods::DID_SAVE => self.analyze_document(orchestrator, params, RunTrigger::OnSave),
            methods::ACTIVE_DOCUMENT => match serde_json::from_value::<ActiveDocumentParams>(params)
            {
                Ok(active) => {
                    orchestrator.active_document(&active.uri);
                }
                Err(e) => tracing::debug!("Bad activeDocument params: {e}"),
            },
            methods::DID_CLOSE | methods::CANCEL_REQUEST => {}
            _ => tracing::trace!(method, "Ignoring notification"),
        }
        Flow::Continue
    }

    fn configure(&mut self, orchestrator: Arc<Orchestrator>, raw: Value) {
        let settings = serde_json::from_value::<DidChangeConfigurationParams>(raw)
            .map_err(|e| e.to_string())
            .and_then(|change| {
                Settings::from_host(&change.settings, &self.defaults).map_err(|e| e.to_string())
            });
        let settings = match settings {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring configuration change: {e}");
                return;
            }
        };
        self.tasks.spawn(async move {
            let state = orchestrator.initialize(settings).await;
            tracing::debug!(state = %state, "Configuration applied");
        });
    }

    fn analyze_document(
        &mut self,
        orchestrator: Arc<Orchestrator>,
        raw: Value,
        trigger: RunTrigger,
    ) {
        let document = match serde_json::from_value::<TextDocumentParams>(raw) {
            Ok(document) => document.text_document.uri,
            Err(e) => {
                tracing::debug!(%trigger, "Bad text document params: {e}");
                return;
            }
        };
        self.tasks.spawn(async move {
            let outcome = orchestrator.analyze_file(&document, trigger).await;
            tracing::debug!(%trigger, %document, ?outcome, "Document analysis finished");
        });
    }

    async fn close(mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.shutdown();
        }
    }
}

async fn engine_request(
    orchestrator: &Orchestrator,
    method: &str,
    raw: Value,
) -> Result<Value, RpcError> {
    match method {
        methods::CATALOG => to_value(&CatalogResult {
            linters: orchestrator.catalog().await,
        }),
        methods::ACTIVATE => {
            let request: ActivateParams = params(raw)?;
            let changed = if request.activate {
                orchestrator.activate(&request.linter).await
            } else {
                orchestrator.deactivate(&request.linter).await
            };
            to_value(&changed)
        }
        methods::ANALYZE => {
            let request: AnalyzeParams = params(raw)?;
            let outcome = match request.path {
                Some(path) if !request.full => {
                    orchestrator.analyze_file(&path, RunTrigger::Force).await
                }
                _ => orchestrator.analyze(RunTrigger::Force).await,
            };
            tracing::debug!(?outcome, "Requested analysis finished");
            Ok(Value::Null)
        }
        methods::VERSION => {
            let version = orchestrator
                .engine_version()
                .await
                .map_err(RpcError::internal)?;
            Ok(Value::String(version))
        }
        methods::LINTER_VERSION => {
            let request: LinterParams = params(raw)?;
            to_value(&orchestrator.linter_version(&request.linter, false).await)
        }
        methods::LINTER_INSTALL => {
            let request: LinterParams = params(raw)?;
            to_value(&orchestrator.linter_version(&request.linter, true).await)
        }
        methods::INSTALL => {
            let path = orchestrator.install().await.map_err(RpcError::internal)?;
            to_value(&InstallResult {
                path: path.display().to_string(),
            })
        }
        _ => Err(RpcError {
            code: protocol::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(RpcError::internal)
}
