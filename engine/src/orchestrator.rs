//! Session state machine tying the engine pieces together.
//!
//! One [`Orchestrator`] exists per host session. It owns the engine client,
//! the install lifecycle and the progress tracker, and reports back through
//! the [`Host`] seam. Operation-scoped failures are logged and turned into
//! empty results; only a failed initialize surfaces to the host, as a
//! `noCli` status.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use linterhub_config::{EngineDefaults, ProjectConfig, Settings};
use linterhub_types::{
    Diagnostic, EngineDescriptor, EngineMode, LinterVersion, OperationId, RunTrigger, StatusState,
};
use tokio_util::sync::CancellationToken;

use crate::client::{CommandBuilder, EngineClient};
use crate::converter;
use crate::error::EngineError;
use crate::install::{EngineInstaller, InstallRequest, Installer};
use crate::process::{CommandLine, CommandRunner, ProcessRunner};
use crate::progress::{ProgressSink, ProgressTracker};

pub type HostFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Network policy for engine downloads, as answered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    pub proxy: Option<String>,
    pub strict_ssl: bool,
}

/// The editor side of a session.
///
/// Progress callbacks come from the embedded [`ProgressSink`]; the
/// `operation` hook is where hosts emit per-id start/end status.
pub trait Host: ProgressSink {
    /// Session-level status. `id` is `None` for [`StatusState::NoCli`].
    fn status(&self, id: Option<&OperationId>, state: StatusState);

    /// Replace the diagnostics shown for `uri`.
    fn publish_diagnostics(&self, uri: &str, diagnostics: &[Diagnostic]);

    /// Download policy for an install. Hosts answer with defaults on failure.
    fn install_config(&self) -> HostFut<'_, InstallConfig>;

    /// Persist the engine location after a successful install.
    fn save_settings(&self, cli_path: &Path, mode: EngineMode);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    /// Engine missing and install failed; cleared by the next initialize.
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Error => "error",
        })
    }
}

/// What happened to one analyze request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// The trigger is not in the allow-list; nothing ran.
    Filtered,
    /// No ready engine.
    Unavailable,
    Published { files: usize },
    /// The engine run or its output failed; details are in the log.
    Failed,
}

struct Session {
    state: EngineState,
    settings: Settings,
    client: Option<Arc<EngineClient>>,
    cancel: CancellationToken,
    generation: u64,
}

type Bootstrapped = (Arc<EngineClient>, Settings, String);

pub struct Orchestrator {
    host: Arc<dyn Host>,
    defaults: EngineDefaults,
    project: PathBuf,
    runner: Arc<dyn CommandRunner>,
    installer: Arc<dyn Installer>,
    progress: ProgressTracker,
    root: CancellationToken,
    session: Mutex<Session>,
}

impl Orchestrator {
    /// Orchestrator backed by real processes and HTTP downloads.
    #[must_use]
    pub fn new(host: Arc<dyn Host>, defaults: EngineDefaults, project: PathBuf) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(ProcessRunner::new(defaults.max_output_bytes));
        let installer = Arc::new(EngineInstaller::new(&defaults, Arc::clone(&runner)));
        Self::with_components(host, defaults, project, runner, installer)
    }

    #[must_use]
    pub fn with_components(
        host: Arc<dyn Host>,
        defaults: EngineDefaults,
        project: PathBuf,
        runner: Arc<dyn CommandRunner>,
        installer: Arc<dyn Installer>,
    ) -> Self {
        let sink: Arc<dyn ProgressSink> = Arc::<dyn Host>::clone(&host);
        let progress = ProgressTracker::new(sink, defaults.spinner_interval);
        let root = CancellationToken::new();
        let session = Session {
            state: EngineState::Uninitialized,
            settings: Settings::from_defaults(&defaults),
            client: None,
            cancel: root.child_token(),
            generation: 0,
        };
        Self {
            host,
            defaults,
            project,
            runner,
            installer,
            progress,
            root,
            session: Mutex::new(session),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    /// Whether any operation is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.progress.is_busy()
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    #[must_use]
    pub fn project(&self) -> &Path {
        &self.project
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    fn ready_client(&self) -> Option<Arc<EngineClient>> {
        let session = self.lock();
        match session.state {
            EngineState::Ready => session.client.clone(),
            _ => None,
        }
    }

    fn client_for(&self, settings: &Settings, cancel: &CancellationToken) -> EngineClient {
        let builder = CommandBuilder::new(
            settings.engine_dir(),
            self.project.clone(),
            settings.mode(),
            self.defaults.image.clone(),
        );
        EngineClient::new(builder, Arc::clone(&self.runner), cancel.clone())
    }

    /// (Re)start the session with `settings`.
    ///
    /// Probes the engine version; if that fails, installs the runtime and
    /// probes again. Any previous client and its caches are dropped and its
    /// in-flight operations cancelled.
    pub async fn initialize(&self, settings: Settings) -> EngineState {
        self.start(settings, true).await
    }

    async fn start(&self, settings: Settings, allow_install: bool) -> EngineState {
        let (generation, cancel) = {
            let mut session = self.lock();
            session.cancel.cancel();
            session.cancel = self.root.child_token();
            session.generation += 1;
            session.state = EngineState::Initializing;
            session.client = None;
            session.settings = settings.clone();
            (session.generation, session.cancel.clone())
        };
        let _progress = self.progress.track(OperationId::system());

        tracing::info!(
            mode = %settings.mode(),
            engine_dir = %settings.engine_dir().display(),
            project = %self.project.display(),
            "Initializing engine"
        );

        let client = Arc::new(self.client_for(&settings, &cancel));
        let result = match client.version().await {
            Ok(version) => Ok((client, settings, version)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) if allow_install => {
                tracing::warn!("Engine version probe failed, installing runtime: {e}");
                self.bootstrap(settings, &cancel).await
            }
            Err(e) => Err(e),
        };

        self.finish_start(generation, result)
    }

    async fn bootstrap(
        &self,
        mut settings: Settings,
        cancel: &CancellationToken,
    ) -> Result<Bootstrapped, EngineError> {
        let mode = settings.mode();
        let path = self
            .run_installer(mode, settings.cli_root().to_path_buf(), cancel)
            .await?;
        settings.set_installed(mode, path);

        let client = Arc::new(self.client_for(&settings, cancel));
        let version = client.version().await?;
        self.record_install(settings.engine_dir(), mode);
        Ok((client, settings, version))
    }

    /// Persist a fresh install in `.linterhub.json` and the editor settings.
    fn record_install(&self, path: &Path, mode: EngineMode) {
        self.update_project_config(|config| {
            let changed = config.mode != Some(mode);
            config.mode = Some(mode);
            changed
        });
        self.host.save_settings(path, mode);
    }

    fn finish_start(&self, generation: u64, result: Result<Bootstrapped, EngineError>) -> EngineState {
        let mut session = self.lock();
        if session.generation != generation {
            tracing::debug!("Initialize superseded by a newer session");
            return session.state;
        }

        match result {
            Ok((client, settings, version)) => {
                tracing::info!(version = %version, mode = %settings.mode(), "Engine ready");
                session.client = Some(client);
                session.settings = settings;
                session.state = EngineState::Ready;
                EngineState::Ready
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Initialize cancelled");
                session.state = EngineState::Uninitialized;
                EngineState::Uninitialized
            }
            Err(e) => {
                tracing::error!("No engine runtime available: {e}");
                session.state = EngineState::Error;
                drop(session);
                self.host.status(None, StatusState::NoCli);
                EngineState::Error
            }
        }
    }

    async fn run_installer(
        &self,
        mode: EngineMode,
        target_dir: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, EngineError> {
        let config = self.host.install_config().await;
        let request = InstallRequest {
            mode,
            target_dir,
            proxy: config.proxy.or_else(|| self.defaults.proxy.clone()),
            strict_ssl: config.strict_ssl,
        };
        let path = self.installer.install(&request, cancel).await?;
        tracing::info!(path = %path.display(), mode = %mode, "Engine runtime installed");
        Ok(path)
    }

    fn filters(&self, trigger: RunTrigger) -> bool {
        let session = self.lock();
        if !session.settings.enabled() {
            tracing::trace!(%trigger, "Analysis disabled in settings");
            return true;
        }
        if !session.settings.allows(trigger) {
            tracing::trace!(%trigger, "Analysis filtered by run settings");
            return true;
        }
        false
    }

    /// Analyze the whole project.
    pub async fn analyze(&self, trigger: RunTrigger) -> AnalysisOutcome {
        if self.filters(trigger) {
            return AnalysisOutcome::Filtered;
        }
        let Some(client) = self.ready_client() else {
            tracing::debug!("Analysis requested with no ready engine");
            return AnalysisOutcome::Unavailable;
        };

        let _progress = self.progress.track(OperationId::for_path(&self.project));
        let diagnostics = match client.analyze().await {
            Ok(raw) => converter::convert(&raw, &self.project),
            Err(e) => Err(e),
        };
        match diagnostics {
            Ok(diagnostics) => {
                let files = diagnostics.len();
                let total = diagnostics.total_count();
                let errors = diagnostics.error_count();
                for (uri, items) in diagnostics {
                    self.host.publish_diagnostics(&uri, &items);
                }
                tracing::info!(files, total, errors, "Project analysis published");
                AnalysisOutcome::Published { files }
            }
            Err(e) => {
                tracing::warn!(project = %self.project.display(), "Project analysis failed: {e}");
                AnalysisOutcome::Failed
            }
        }
    }

    /// Analyze one document, given as a `file://` URI or a path.
    ///
    /// The document is always published, with an empty list when the engine
    /// reported nothing for it, so stale diagnostics are cleared.
    pub async fn analyze_file(&self, document: &str, trigger: RunTrigger) -> AnalysisOutcome {
        if self.filters(trigger) {
            return AnalysisOutcome::Filtered;
        }
        let Some(client) = self.ready_client() else {
            tracing::debug!(document, "Analysis requested with no ready engine");
            return AnalysisOutcome::Unavailable;
        };

        let _progress = self.progress.track(OperationId::new(document));
        let diagnostics = match client.analyze_file(document).await {
            Ok(raw) => converter::convert(&raw, &self.project),
            Err(e) => Err(e),
        };
        let diagnostics = match diagnostics {
            Ok(diagnostics) => diagnostics,
            Err(e) => {
                tracing::warn!(document, "File analysis failed: {e}");
                return AnalysisOutcome::Failed;
            }
        };
        tracing::debug!(
            document,
            total = diagnostics.total_count(),
            errors = diagnostics.error_count(),
            "File analysis finished"
        );

        let relative = client.builder().relative_path(document);
        let converted_uri = converter::file_uri(&self.project, &relative);
        let document_uri = if document.starts_with("file:") {
            document.to_string()
        } else {
            converted_uri.clone()
        };

        let mut files = 0;
        let mut seen_document = false;
        for (uri, items) in diagnostics {
            let uri = if uri == converted_uri {
                seen_document = true;
                document_uri.clone()
            } else {
                uri
            };
            self.host.publish_diagnostics(&uri, &items);
            files += 1;
        }
        if !seen_document {
            self.host.publish_diagnostics(&document_uri, &[]);
            files += 1;
        }
        AnalysisOutcome::Published { files }
    }

    /// Engines known to the runtime. Empty when the engine is unavailable.
    pub async fn catalog(&self) -> Vec<EngineDescriptor> {
        let Some(client) = self.ready_client() else {
            return Vec::new();
        };
        let _progress = self.progress.track(OperationId::system());
        client.catalog().await.unwrap_or_else(|e| {
            tracing::warn!("Catalog request failed: {e}");
            Vec::new()
        })
    }

    /// Activate `linter` and record it in the project config.
    ///
    /// Returns the linter name on success.
    pub async fn activate(&self, linter: &str) -> Option<String> {
        self.set_active(linter, true).await
    }

    pub async fn deactivate(&self, linter: &str) -> Option<String> {
        self.set_active(linter, false).await
    }

    async fn set_active(&self, linter: &str, active: bool) -> Option<String> {
        let client = self.ready_client()?;
        let _progress = self.progress.track(OperationId::system());

        let result = if active {
            client.activate(linter).await
        } else {
            client.deactivate(linter).await
        };
        if let Err(e) = result {
            tracing::warn!(linter, active, "Engine activation failed: {e}");
            return None;
        }

        self.update_project_config(|config| {
            if active {
                config.activate(linter)
            } else {
                config.deactivate(linter)
            }
        });
        tracing::info!(linter, active, "Engine activation changed");
        Some(linter.to_string())
    }

    fn update_project_config(&self, change: impl FnOnce(&mut ProjectConfig) -> bool) {
        let mut config = match ProjectConfig::load(&self.project) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Project config unreadable, starting fresh: {e}");
                ProjectConfig::default()
            }
        };
        if !change(&mut config) {
            return;
        }
        if let Err(e) = config.save(&self.project) {
            tracing::warn!("Failed to save project config: {e}");
        }
    }

    /// Installed version of one engine, optionally installing it first.
    ///
    /// Never fails; an unreachable engine reports as not installed.
    pub async fn linter_version(&self, linter: &str, install: bool) -> LinterVersion {
        let Some(client) = self.ready_client() else {
            return LinterVersion::missing(linter);
        };
        let _progress = self.progress.track(OperationId::system());
        let result = if install {
            client.linter_install(linter).await
        } else {
            client.linter_version(linter).await
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(linter, install, "Linter version query failed: {e}");
            LinterVersion::missing(linter)
        })
    }

    /// Engine runtime version of the ready client.
    pub async fn engine_version(&self) -> Result<String, EngineError> {
        let client = self.ready_client().ok_or(EngineError::NotInitialized)?;
        let _progress = self.progress.track(OperationId::system());
        client.version().await
    }

    /// Explicit re-bootstrap of the engine runtime.
    ///
    /// Picks the managed runtime when `dotnet` answers, the native binary
    /// otherwise; container mode is kept if configured and docker answers.
    /// On success the session restarts against the new install.
    pub async fn install(&self) -> Result<PathBuf, EngineError> {
        let _progress = self.progress.track(OperationId::system());
        let (mut settings, cancel) = {
            let session = self.lock();
            (session.settings.clone(), session.cancel.clone())
        };

        let mode = self.select_mode(settings.mode(), &cancel).await;
        let path = self
            .run_installer(mode, settings.cli_root().to_path_buf(), &cancel)
            .await?;

        settings.set_installed(mode, path.clone());
        self.record_install(&path, mode);

        let state = self.start(settings, false).await;
        tracing::info!(state = %state, "Session restarted after install");
        Ok(path)
    }

    async fn select_mode(&self, configured: EngineMode, cancel: &CancellationToken) -> EngineMode {
        if configured == EngineMode::Container {
            let docker =
                CommandLine::new("docker").args(["version", "--format", "{{.Server.Version}}"]);
            if let Some(version) = self.probe(&docker, cancel).await {
                tracing::info!(version = %version, "Using container engine");
                return EngineMode::Container;
            }
            tracing::warn!("Docker is not available; choosing another engine mode");
        }

        let dotnet = CommandLine::new("dotnet").arg("--version");
        match self.probe(&dotnet, cancel).await {
            Some(version) => {
                tracing::info!(version = %version, "Using managed runtime");
                EngineMode::ManagedRuntime
            }
            None => EngineMode::NativeBinary,
        }
    }

    async fn probe(&self, command: &CommandLine, cancel: &CancellationToken) -> Option<String> {
        match self.runner.run(command, cancel).await {
            Ok(out) => Some(out.trim().to_string()),
            Err(e) => {
                tracing::debug!(command = %command, "Probe failed: {e}");
                None
            }
        }
    }

    /// Re-scope progress visibility to the newly focused document.
    pub fn active_document(&self, uri: &str) -> bool {
        self.progress.update(&OperationId::new(uri))
    }

    /// Cancel in-flight work, stop the spinner and forget the client.
    pub fn shutdown(&self) {
        {
            let mut session = self.lock();
            session.cancel.cancel();
            session.generation += 1;
            session.client = None;
            session.state = EngineState::Uninitialized;
        }
        self.progress.clear();
        tracing::info!("Engine session shut down");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
