//! Session scenarios against a scripted engine runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use linterhub_config::{EngineDefaults, PROJECT_CONFIG_FILE, ProjectConfig, Settings};
use linterhub_engine::{
    AnalysisOutcome, CommandLine, CommandRunner, EngineError, EngineState, Host, HostFut,
    InstallConfig, InstallError, InstallFut, InstallRequest, Installer, Orchestrator,
    ProgressSink, RunFut,
};
use linterhub_types::{Diagnostic, EngineMode, OperationId, RunTrigger, Severity, StatusState};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Visible(bool),
    Operation(String, bool),
    Status(Option<String>, StatusState),
    Published(String, Vec<Diagnostic>),
    Saved(PathBuf, EngineMode),
}

#[derive(Default)]
struct RecordingHost {
    events: Mutex<Vec<Event>>,
}

impl RecordingHost {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn published(&self) -> Vec<(String, Vec<Diagnostic>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Published(uri, items) => Some((uri, items)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProgressSink for RecordingHost {
    fn visibility(&self, visible: bool) {
        self.push(Event::Visible(visible));
    }

    fn text(&self, _text: &str) {}

    fn operation(&self, id: &OperationId, started: bool) {
        self.push(Event::Operation(id.to_string(), started));
    }
}

impl Host for RecordingHost {
    fn status(&self, id: Option<&OperationId>, state: StatusState) {
        self.push(Event::Status(id.map(ToString::to_string), state));
    }

    fn publish_diagnostics(&self, uri: &str, diagnostics: &[Diagnostic]) {
        self.push(Event::Published(uri.to_string(), diagnostics.to_vec()));
    }

    fn install_config(&self) -> HostFut<'_, InstallConfig> {
        Box::pin(async {
            InstallConfig {
                proxy: None,
                strict_ssl: true,
            }
        })
    }

    fn save_settings(&self, cli_path: &Path, mode: EngineMode) {
        self.push(Event::Saved(cli_path.to_path_buf(), mode));
    }
}

type Script = dyn Fn(&CommandLine) -> Result<String, EngineError> + Send + Sync;

/// Answers every command through a closure and records what ran.
struct ScriptedRunner {
    script: Box<Script>,
    calls: Mutex<Vec<CommandLine>>,
}

impl ScriptedRunner {
    fn new(
        script: impl Fn(&CommandLine) -> Result<String, EngineError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::default(),
        })
    }

    fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, mode: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| mode_of(c) == Some(mode))
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, command: &'a CommandLine, _cancel: &'a CancellationToken) -> RunFut<'a> {
        self.calls.lock().unwrap().push(command.clone());
        let reply = (self.script)(command);
        Box::pin(async move { reply })
    }
}

fn mode_of(command: &CommandLine) -> Option<&str> {
    command
        .get_args()
        .iter()
        .find_map(|arg| arg.strip_prefix("--mode="))
}

fn missing() -> EngineError {
    EngineError::Unavailable("engine not found".into())
}

struct FakeInstaller {
    result: Result<PathBuf, ()>,
    requests: Mutex<Vec<InstallRequest>>,
}

impl FakeInstaller {
    fn new(result: Result<PathBuf, ()>) -> Arc<Self> {
        Arc::new(Self {
            result,
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<InstallRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Installer for FakeInstaller {
    fn install<'a>(
        &'a self,
        request: &'a InstallRequest,
        _cancel: &'a CancellationToken,
    ) -> InstallFut<'a> {
        self.requests.lock().unwrap().push(request.clone());
        let result = self
            .result
            .clone()
            .map_err(|()| InstallError::HttpStatus {
                url: "https://releases.invalid/cli.zip".into(),
                status: 404,
            });
        Box::pin(async move { result })
    }
}

struct Fixture {
    host: Arc<RecordingHost>,
    runner: Arc<ScriptedRunner>,
    installer: Arc<FakeInstaller>,
    orchestrator: Orchestrator,
    defaults: EngineDefaults,
}

fn defaults(cli_root: &Path) -> EngineDefaults {
    EngineDefaults {
        cli_root: cli_root.to_path_buf(),
        install_dir: cli_root.to_path_buf(),
        spinner_interval: Duration::from_millis(5),
        ..EngineDefaults::default()
    }
}

fn fixture(
    project: &Path,
    runner: Arc<ScriptedRunner>,
    installer: Arc<FakeInstaller>,
) -> Fixture {
    let host = Arc::new(RecordingHost::default());
    let defaults = defaults(Path::new("/opt/linterhub"));
    let orchestrator = Orchestrator::with_components(
        Arc::clone(&host) as Arc<dyn Host>,
        defaults.clone(),
        project.to_path_buf(),
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::clone(&installer) as Arc<dyn Installer>,
    );
    Fixture {
        host,
        runner,
        installer,
        orchestrator,
        defaults,
    }
}

impl Fixture {
    async fn ready(&self) {
        let settings = Settings::from_defaults(&self.defaults);
        assert_eq!(
            self.orchestrator.initialize(settings).await,
            EngineState::Ready
        );
    }
}

const JSHINT_OUTPUT: &str = r#"[{"Name":"jshint","Model":{"Files":[{"Path":"a.js","Errors":[{"Severity":1,"Row":{"Start":5,"End":5},"Column":{"Start":0,"End":10},"Message":"missing semicolon"}]}]}}]"#;

fn healthy_engine() -> Arc<ScriptedRunner> {
    ScriptedRunner::new(|cmd| match mode_of(cmd) {
        Some("version") => Ok("0.3.3\n".into()),
        Some("catalog") => Ok(r#"[{"name":"jshint"},{"name":"csslint","active":true}]"#.into()),
        Some("analyze") => Ok(JSHINT_OUTPUT.into()),
        Some("activate") => Ok(String::new()),
        Some("linterVersion") => Ok(r#"{"LinterName":"jshint","Installed":true,"Version":"2.9"}"#.into()),
        _ => Err(missing()),
    })
}

#[tokio::test]
async fn probe_success_makes_session_ready() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    assert_eq!(f.orchestrator.state(), EngineState::Uninitialized);

    f.ready().await;
    assert!(f.installer.requests().is_empty());
    assert!(!f.orchestrator.is_busy());
    assert!(
        f.host
            .events()
            .contains(&Event::Operation(OperationId::system().to_string(), true))
    );
}

#[tokio::test]
async fn failed_probe_installs_and_retries() {
    let installed = PathBuf::from("/opt/linterhub/bin/debian.8-x64");
    let installed_dir = installed.display().to_string();
    let runner = ScriptedRunner::new(move |cmd| {
        if cmd.program().starts_with(&installed_dir) && mode_of(cmd) == Some("version") {
            Ok("0.3.3".into())
        } else {
            Err(EngineError::Process {
                command: cmd.to_string(),
                code: Some(1),
                stderr: "unsupported engine version".into(),
            })
        }
    });
    let project = tempfile::tempdir().unwrap();
    let f = fixture(
        project.path(),
        runner,
        FakeInstaller::new(Ok(installed.clone())),
    );

    f.ready().await;

    let requests = f.installer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mode, EngineMode::NativeBinary);
    assert_eq!(requests[0].target_dir, PathBuf::from("/opt/linterhub"));
    assert_eq!(f.runner.count("version"), 2);
    assert_eq!(f.orchestrator.settings().engine_dir(), installed.as_path());
    assert!(
        f.host
            .events()
            .contains(&Event::Saved(installed, EngineMode::NativeBinary))
    );
    assert_eq!(
        ProjectConfig::load(project.path()).unwrap().mode,
        Some(EngineMode::NativeBinary)
    );
}

#[tokio::test]
async fn failed_install_reports_no_engine() {
    let runner = ScriptedRunner::new(|_| Err(missing()));
    let f = fixture(Path::new("/project"), runner, FakeInstaller::new(Err(())));

    let state = f
        .orchestrator
        .initialize(Settings::from_defaults(&f.defaults))
        .await;

    assert_eq!(state, EngineState::Error);
    assert!(
        f.host
            .events()
            .contains(&Event::Status(None, StatusState::NoCli))
    );
    assert_eq!(
        f.orchestrator.analyze(RunTrigger::Force).await,
        AnalysisOutcome::Unavailable
    );
    assert!(f.orchestrator.catalog().await.is_empty());
}

#[tokio::test]
async fn triggers_outside_the_allow_list_run_nothing() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;
    let before = f.runner.calls().len();

    assert_eq!(
        f.orchestrator
            .analyze_file("/project/a.js", RunTrigger::OnType)
            .await,
        AnalysisOutcome::Filtered
    );
    assert_eq!(
        f.orchestrator.analyze(RunTrigger::OnStart).await,
        AnalysisOutcome::Filtered
    );
    assert_eq!(f.runner.calls().len(), before);
    assert!(f.host.published().is_empty());
}

#[tokio::test]
async fn disabled_settings_filter_even_forced_runs() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    let settings =
        Settings::from_host(&json!({"linterhub": {"enable": false}}), &f.defaults).unwrap();
    assert_eq!(f.orchestrator.initialize(settings).await, EngineState::Ready);

    assert_eq!(
        f.orchestrator.analyze(RunTrigger::Force).await,
        AnalysisOutcome::Filtered
    );
    assert_eq!(f.runner.count("analyze"), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn file_analysis_publishes_zero_based_warning() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;

    let outcome = f
        .orchestrator
        .analyze_file("/project/a.js", RunTrigger::OnSave)
        .await;
    assert_eq!(outcome, AnalysisOutcome::Published { files: 1 });

    let published = f.host.published();
    assert_eq!(published.len(), 1);
    let (uri, items) = &published[0];
    assert_eq!(uri, "file:///project/a.js");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].severity(), Severity::Warning);
    assert_eq!(items[0].message().line(), 4);
    assert_eq!(items[0].source(), "jshint");

    let analyze = f
        .runner
        .calls()
        .into_iter()
        .find(|c| mode_of(c) == Some("analyze"))
        .unwrap();
    assert!(analyze.get_args().contains(&"--file=a.js".to_string()));
    assert!(!f.orchestrator.is_busy());
}

#[cfg(unix)]
#[tokio::test]
async fn clean_document_is_cleared_under_its_own_uri() {
    let runner = ScriptedRunner::new(|cmd| match mode_of(cmd) {
        Some("version") => Ok("0.3.3".into()),
        Some("analyze") => Ok("[]".into()),
        _ => Err(missing()),
    });
    let f = fixture(Path::new("/project"), runner, FakeInstaller::new(Err(())));
    f.ready().await;

    f.orchestrator
        .analyze_file("file:///project/src/b.js", RunTrigger::OnOpen)
        .await;
    assert_eq!(
        f.host.published(),
        vec![("file:///project/src/b.js".to_string(), Vec::new())]
    );
}

#[tokio::test]
async fn engine_failure_is_scoped_to_one_analysis() {
    let runner = ScriptedRunner::new(|cmd| match mode_of(cmd) {
        Some("version") => Ok("0.3.3".into()),
        Some("analyze") => Ok("this is not json".into()),
        _ => Err(missing()),
    });
    let f = fixture(Path::new("/project"), runner, FakeInstaller::new(Err(())));
    f.ready().await;

    assert_eq!(
        f.orchestrator.analyze(RunTrigger::Force).await,
        AnalysisOutcome::Failed
    );
    assert_eq!(f.orchestrator.state(), EngineState::Ready);
    assert!(!f.orchestrator.is_busy());
    assert!(f.host.published().is_empty());
}

#[tokio::test]
async fn catalog_is_memoized_until_reinitialize() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;

    let first = f.orchestrator.catalog().await;
    let second = f.orchestrator.catalog().await;
    assert_eq!(first, second);
    assert_eq!(first[0].name, "csslint");
    assert_eq!(f.runner.count("catalog"), 1);

    f.ready().await;
    f.orchestrator.catalog().await;
    assert_eq!(f.runner.count("catalog"), 2);
}

#[tokio::test]
async fn catalog_failure_is_empty() {
    let runner = ScriptedRunner::new(|cmd| match mode_of(cmd) {
        Some("version") => Ok("0.3.3".into()),
        _ => Err(missing()),
    });
    let f = fixture(Path::new("/project"), runner, FakeInstaller::new(Err(())));
    f.ready().await;

    assert!(f.orchestrator.catalog().await.is_empty());
}

#[tokio::test]
async fn activation_is_recorded_in_project_config() {
    let project = tempfile::tempdir().unwrap();
    let f = fixture(project.path(), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;

    assert_eq!(
        f.orchestrator.activate("jshint").await.as_deref(),
        Some("jshint")
    );
    assert!(project.path().join(PROJECT_CONFIG_FILE).is_file());
    assert!(ProjectConfig::load(project.path()).unwrap().is_active("jshint"));

    assert_eq!(
        f.orchestrator.deactivate("jshint").await.as_deref(),
        Some("jshint")
    );
    assert!(!ProjectConfig::load(project.path()).unwrap().is_active("jshint"));

    let args: Vec<_> = f
        .runner
        .calls()
        .into_iter()
        .filter(|c| mode_of(c) == Some("activate"))
        .map(|c| c.get_args().to_vec())
        .collect();
    assert!(args[0].contains(&"--active=true".to_string()));
    assert!(args[1].contains(&"--active=false".to_string()));
}

#[tokio::test]
async fn linter_version_never_fails() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;

    let installed = f.orchestrator.linter_version("jshint", false).await;
    assert!(installed.installed);
    assert_eq!(installed.version, "2.9");

    let failed = f.orchestrator.linter_version("eslint", true).await;
    assert_eq!(failed.linter_name, "eslint");
    assert!(!failed.installed);
    assert!(failed.version.is_empty());
}

#[tokio::test]
async fn explicit_install_prefers_managed_runtime() {
    let installed = PathBuf::from("/opt/linterhub/bin/portable");
    let runner = ScriptedRunner::new(|cmd| {
        if cmd.program() == "dotnet" && cmd.get_args() == ["--version"] {
            return Ok("8.0.100\n".into());
        }
        match mode_of(cmd) {
            Some("version") => Ok("0.3.3".into()),
            _ => Err(missing()),
        }
    });
    let project = tempfile::tempdir().unwrap();
    let f = fixture(
        project.path(),
        runner,
        FakeInstaller::new(Ok(installed.clone())),
    );
    f.ready().await;

    let path = f.orchestrator.install().await.unwrap();
    assert_eq!(path, installed);
    assert_eq!(f.installer.requests()[0].mode, EngineMode::ManagedRuntime);
    assert_eq!(f.orchestrator.state(), EngineState::Ready);
    assert_eq!(f.orchestrator.settings().mode(), EngineMode::ManagedRuntime);
    assert_eq!(
        ProjectConfig::load(project.path()).unwrap().mode,
        Some(EngineMode::ManagedRuntime)
    );
    assert!(
        f.host
            .events()
            .contains(&Event::Saved(installed, EngineMode::ManagedRuntime))
    );

    let version = f
        .runner
        .calls()
        .into_iter()
        .rev()
        .find(|c| mode_of(c) == Some("version"))
        .unwrap();
    assert_eq!(version.program(), "dotnet");
}

#[tokio::test]
async fn explicit_install_falls_back_to_native_binary() {
    let runner = ScriptedRunner::new(|cmd| match mode_of(cmd) {
        Some("version") => Ok("0.3.3".into()),
        _ => Err(missing()),
    });
    let project = tempfile::tempdir().unwrap();
    let f = fixture(
        project.path(),
        runner,
        FakeInstaller::new(Ok(PathBuf::from("/opt/linterhub/bin/debian.8-x64"))),
    );
    f.ready().await;

    f.orchestrator.install().await.unwrap();
    assert_eq!(f.installer.requests()[0].mode, EngineMode::NativeBinary);
}

#[tokio::test]
async fn explicit_install_failure_is_returned() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;

    let err = f.orchestrator.install().await.unwrap_err();
    assert!(matches!(err, EngineError::Install(_)));
    assert_eq!(f.orchestrator.state(), EngineState::Ready);
}

#[tokio::test]
async fn active_document_rescopes_the_spinner() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;

    let progress = f.orchestrator.progress().clone();
    let a = progress.track(OperationId::new("file:///project/a.js"));
    let b = progress.track(OperationId::new("file:///project/b.js"));
    assert!(f.orchestrator.is_busy());

    drop(a);
    assert!(progress.is_visible());
    assert!(!f.orchestrator.active_document("file:///project/a.js"));
    assert!(!progress.is_visible());
    assert!(f.orchestrator.active_document("file:///project/b.js"));
    assert!(progress.is_visible());

    drop(b);
    assert!(!f.orchestrator.is_busy());
    assert!(!progress.is_visible());
}

#[tokio::test]
async fn shutdown_resets_the_session() {
    let f = fixture(Path::new("/project"), healthy_engine(), FakeInstaller::new(Err(())));
    f.ready().await;

    f.orchestrator.shutdown();
    assert_eq!(f.orchestrator.state(), EngineState::Uninitialized);
    assert!(!f.orchestrator.is_busy());
    assert_eq!(
        f.orchestrator.analyze(RunTrigger::Force).await,
        AnalysisOutcome::Unavailable
    );
    assert!(matches!(
        f.orchestrator.engine_version().await,
        Err(EngineError::NotInitialized)
    ));
}
