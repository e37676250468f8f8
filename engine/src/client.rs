//! Engine runtime driver.
//!
//! Builds engine command lines and runs them through a [`CommandRunner`].
//! `version` and `catalog` are memoized per client instance; everything else
//! spawns one process per call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use linterhub_types::{EngineDescriptor, EngineMode, LinterVersion};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cacheable::Cacheable;
use crate::error::EngineError;
use crate::process::{CommandLine, CommandRunner};

const MANAGED_RUNTIME: &str = "dotnet";
const MANAGED_ENTRY: &str = "cli.dll";
#[cfg(windows)]
const NATIVE_BINARY: &str = "cli.exe";
#[cfg(not(windows))]
const NATIVE_BINARY: &str = "cli";
const CONTAINER_RUNTIME: &str = "docker";
/// Mount point of the project inside the engine container.
const CONTAINER_PROJECT: &str = "/data";

/// One engine runtime request. Renders to the mode-independent argument suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Version,
    Catalog,
    Analyze,
    AnalyzeFile(String),
    Activate { linter: String, active: bool },
    LinterVersion(String),
    LinterInstall(String),
}

impl Operation {
    fn args(&self, project: &str) -> Vec<String> {
        match self {
            Self::Version => vec!["--mode=version".into()],
            Self::Catalog => vec!["--mode=catalog".into()],
            Self::Analyze => vec!["--mode=analyze".into(), format!("--project={project}")],
            Self::AnalyzeFile(file) => vec![
                "--mode=analyze".into(),
                format!("--project={project}"),
                format!("--file={file}"),
            ],
            Self::Activate { linter, active } => vec![
                "--mode=activate".into(),
                format!("--active={active}"),
                format!("--linter={linter}"),
            ],
            Self::LinterVersion(linter) => {
                vec!["--mode=linterVersion".into(), format!("--linter={linter}")]
            }
            Self::LinterInstall(linter) => {
                vec!["--mode=linterInstall".into(), format!("--linter={linter}")]
            }
        }
    }
}

/// Mode-specific command prefix plus the operation suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    engine_dir: PathBuf,
    project: PathBuf,
    mode: EngineMode,
    image: String,
}

impl CommandBuilder {
    #[must_use]
    pub fn new(
        engine_dir: impl Into<PathBuf>,
        project: impl Into<PathBuf>,
        mode: EngineMode,
        image: impl Into<String>,
    ) -> Self {
        Self {
            engine_dir: engine_dir.into(),
            project: project.into(),
            mode,
            image: image.into(),
        }
    }

    #[must_use]
    pub fn command(&self, operation: &Operation) -> CommandLine {
        let project = self.project.display().to_string();
        match self.mode {
            EngineMode::ManagedRuntime => CommandLine::new(MANAGED_RUNTIME)
                .arg(self.engine_dir.join(MANAGED_ENTRY).display().to_string())
                .args(operation.args(&project))
                .current_dir(self.engine_dir.clone()),
            EngineMode::NativeBinary => {
                CommandLine::new(self.engine_dir.join(NATIVE_BINARY).display().to_string())
                    .args(operation.args(&project))
                    .current_dir(self.engine_dir.clone())
            }
            EngineMode::Container => CommandLine::new(CONTAINER_RUNTIME)
                .args(["run", "--rm", "-v"])
                .arg(format!("{project}:{CONTAINER_PROJECT}:ro"))
                .arg(self.image.as_str())
                .args(operation.args(CONTAINER_PROJECT))
                .current_dir(self.project.clone()),
        }
    }

    /// Project-relative form of a document URI or path.
    ///
    /// `file://` URIs are decoded; paths outside the project are returned as-is.
    #[must_use]
    pub fn relative_path(&self, path: &str) -> String {
        let absolute = Url::parse(path)
            .ok()
            .filter(|url| url.scheme() == "file")
            .and_then(|url| url.to_file_path().ok())
            .unwrap_or_else(|| PathBuf::from(path));
        match absolute.strip_prefix(&self.project) {
            Ok(relative) => relative.display().to_string(),
            Err(_) => absolute.display().to_string(),
        }
    }
}

#[derive(Clone)]
struct Invocation {
    builder: Arc<CommandBuilder>,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
}

impl Invocation {
    async fn run(&self, operation: &Operation) -> Result<String, EngineError> {
        let command = self.builder.command(operation);
        tracing::debug!(?operation, "Invoking engine runtime");
        self.runner.run(&command, &self.cancel).await
    }

    fn memoized<T, P>(&self, operation: Operation, parse: P) -> Cacheable<T, EngineError>
    where
        T: Clone + Send + Sync + 'static,
        P: Fn(&str) -> Result<T, EngineError> + Send + Sync + 'static,
    {
        let invocation = self.clone();
        let parse = Arc::new(parse);
        Cacheable::new(move || {
            let invocation = invocation.clone();
            let operation = operation.clone();
            let parse = Arc::clone(&parse);
            async move { parse(&invocation.run(&operation).await?) }
        })
    }
}

/// Driver for one engine runtime bound to one project.
pub struct EngineClient {
    invocation: Invocation,
    version: Cacheable<String, EngineError>,
    catalog: Cacheable<Vec<EngineDescriptor>, EngineError>,
}

impl EngineClient {
    #[must_use]
    pub fn new(
        builder: CommandBuilder,
        runner: Arc<dyn CommandRunner>,
        cancel: CancellationToken,
    ) -> Self {
        let invocation = Invocation {
            builder: Arc::new(builder),
            runner,
            cancel,
        };
        let version = invocation.memoized(Operation::Version, parse_version);
        let catalog = invocation.memoized(Operation::Catalog, parse_catalog);
        Self {
            invocation,
            version,
            catalog,
        }
    }

    #[must_use]
    pub fn builder(&self) -> &CommandBuilder {
        &self.invocation.builder
    }

    #[must_use]
    pub fn project(&self) -> &Path {
        &self.invocation.builder.project
    }

    #[must_use]
    pub fn mode(&self) -> EngineMode {
        self.invocation.builder.mode
    }

    /// Engine runtime version string.
    pub async fn version(&self) -> Result<String, EngineError> {
        self.version.get_value().await
    }

    /// Engines known to the runtime, sorted by name.
    pub async fn catalog(&self) -> Result<Vec<EngineDescriptor>, EngineError> {
        self.catalog.get_value().await
    }

    /// Raw engine JSON for the whole project.
    pub async fn analyze(&self) -> Result<String, EngineError> {
        self.invocation.run(&Operation::Analyze).await
    }

    /// Raw engine JSON for one document URI or path.
    pub async fn analyze_file(&self, path: &str) -> Result<String, EngineError> {
        let relative = self.invocation.builder.relative_path(path);
        self.invocation.run(&Operation::AnalyzeFile(relative)).await
    }

    pub async fn activate(&self, linter: &str) -> Result<String, EngineError> {
        self.set_active(linter, true).await
    }

    pub async fn deactivate(&self, linter: &str) -> Result<String, EngineError> {
        self.set_active(linter, false).await
    }

    async fn set_active(&self, linter: &str, active: bool) -> Result<String, EngineError> {
        let operation = Operation::Activate {
            linter: linter.to_string(),
            active,
        };
        let out = self.invocation.run(&operation).await?;
        // Activation state is part of the catalog.
        self.catalog.invalidate();
        Ok(out)
    }

    pub async fn linter_version(&self, linter: &str) -> Result<LinterVersion, EngineError> {
        let out = self
            .invocation
            .run(&Operation::LinterVersion(linter.to_string()))
            .await?;
        Ok(serde_json::from_str(out.trim())?)
    }

    pub async fn linter_install(&self, linter: &str) -> Result<LinterVersion, EngineError> {
        let out = self
            .invocation
            .run(&Operation::LinterInstall(linter.to_string()))
            .await?;
        self.catalog.invalidate();
        Ok(serde_json::from_str(out.trim())?)
    }
}

fn parse_version(out: &str) -> Result<String, EngineError> {
    let version = out.trim();
    if version.is_empty() {
        return Err(EngineError::Unavailable(
            "engine runtime reported no version".into(),
        ));
    }
    Ok(version.to_string())
}

fn parse_catalog(out: &str) -> Result<Vec<EngineDescriptor>, EngineError> {
    let mut engines: Vec<EngineDescriptor> = serde_json::from_str(out.trim())?;
    engines.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(engines)
}
