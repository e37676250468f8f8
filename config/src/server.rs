use std::env;
use std::path::PathBuf;
use std::time::Duration;

use linterhub_types::{EngineMode, RunTrigger};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_ENGINE_VERSION: &str = "0.3.3";
pub const DEFAULT_RELEASE_BASE_URL: &str =
    "https://github.com/Repometric/linterhub-cli/releases/download";
pub const DEFAULT_CONTAINER_IMAGE: &str = "repometric/linterhub-cli";
/// Engine output can be large on big projects; 500 MiB before giving up.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 500 * 1024 * 1024;
pub const DEFAULT_SPINNER_INTERVAL_MS: u64 = 80;

/// Contents of `~/.linterhub/config.toml`. Every section is optional.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerConfig {
    pub engine: Option<EngineSection>,
    pub install: Option<InstallSection>,
    pub analysis: Option<AnalysisSection>,
    pub progress: Option<ProgressSection>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct EngineSection {
    /// Directory holding the engine runtime. Supports `${VAR}` expansion.
    pub cli_root: Option<String>,
    pub mode: Option<EngineMode>,
    /// Pinned engine release.
    pub version: Option<String>,
    pub image: Option<String>,
    pub max_output_bytes: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct InstallSection {
    pub base_url: Option<String>,
    /// Install target. Defaults to the engine root.
    pub dir: Option<String>,
    pub proxy: Option<String>,
    pub strict_ssl: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AnalysisSection {
    #[serde(default)]
    pub run: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProgressSection {
    pub interval_ms: Option<u64>,
}

/// Fully resolved server defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDefaults {
    pub cli_root: PathBuf,
    pub mode: EngineMode,
    pub version: String,
    pub image: String,
    pub base_url: String,
    pub install_dir: PathBuf,
    pub proxy: Option<String>,
    pub strict_ssl: bool,
    pub run: Vec<RunTrigger>,
    pub max_output_bytes: usize,
    pub spinner_interval: Duration,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        let cli_root = default_cli_root();
        Self {
            install_dir: cli_root.clone(),
            cli_root,
            mode: EngineMode::default(),
            version: DEFAULT_ENGINE_VERSION.to_string(),
            image: DEFAULT_CONTAINER_IMAGE.to_string(),
            base_url: DEFAULT_RELEASE_BASE_URL.to_string(),
            proxy: None,
            strict_ssl: true,
            run: RunTrigger::defaults(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            spinner_interval: Duration::from_millis(DEFAULT_SPINNER_INTERVAL_MS),
        }
    }
}

fn default_cli_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".linterhub").join("cli"))
        .unwrap_or_else(|| PathBuf::from(".linterhub").join("cli"))
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

impl ServerConfig {
    /// Load the user config file.
    ///
    /// `Ok(None)` when there is no home directory or no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Overlay this file on the built-in defaults.
    #[must_use]
    pub fn defaults(&self) -> EngineDefaults {
        let mut out = EngineDefaults::default();

        if let Some(engine) = &self.engine {
            if let Some(root) = engine.cli_root.as_deref() {
                out.cli_root = PathBuf::from(expand_env_vars(root));
                out.install_dir = out.cli_root.clone();
            }
            if let Some(mode) = engine.mode {
                out.mode = mode;
            }
            if let Some(version) = &engine.version {
                out.version = version.clone();
            }
            if let Some(image) = &engine.image {
                out.image = image.clone();
            }
            if let Some(max) = engine.max_output_bytes {
                out.max_output_bytes = max;
            }
        }

        if let Some(install) = &self.install {
            if let Some(base_url) = &install.base_url {
                out.base_url = base_url.trim_end_matches('/').to_string();
            }
            if let Some(dir) = install.dir.as_deref() {
                out.install_dir = PathBuf::from(expand_env_vars(dir));
            }
            out.proxy = install
                .proxy
                .as_deref()
                .map(expand_env_vars)
                .filter(|p| !p.trim().is_empty());
            if let Some(strict) = install.strict_ssl {
                out.strict_ssl = strict;
            }
        }

        if let Some(analysis) = &self.analysis {
            let run: Vec<RunTrigger> = analysis
                .run
                .iter()
                .filter_map(|name| match name.parse() {
                    Ok(trigger) => Some(trigger),
                    Err(e) => {
                        tracing::warn!("Ignoring run trigger in config: {e}");
                        None
                    }
                })
                .collect();
            if !run.is_empty() {
                out.run = run;
            }
        }

        if let Some(interval) = self.progress.as_ref().and_then(|p| p.interval_ms) {
            out.spinner_interval = Duration::from_millis(interval.max(1));
        }

        out
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".linterhub").join("config.toml"))
}
