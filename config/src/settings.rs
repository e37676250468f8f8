use std::path::{Path, PathBuf};

use linterhub_types::{EngineMode, RunTrigger};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::server::{EngineDefaults, expand_env_vars};

/// Raw `linterhub` section as the editor sends it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostSection {
    enable: Option<bool>,
    #[serde(default)]
    run: Vec<String>,
    mode: Option<String>,
    cli_path: Option<String>,
    cli_root: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostEnvelope {
    linterhub: HostSection,
}

/// Normalized editor settings.
///
/// The run allow-list always contains [`RunTrigger::Force`] so explicit user
/// requests are never filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    enable: bool,
    run: Vec<RunTrigger>,
    mode: EngineMode,
    cli_root: PathBuf,
    cli_path: Option<PathBuf>,
}

impl Settings {
    /// Settings used before the editor has pushed any configuration.
    #[must_use]
    pub fn from_defaults(defaults: &EngineDefaults) -> Self {
        Self::normalized(
            true,
            defaults.run.clone(),
            defaults.mode,
            defaults.cli_root.clone(),
            None,
        )
    }

    /// Parse `workspace/didChangeConfiguration` settings.
    ///
    /// Accepts either `{ "linterhub": { .. } }` or the bare section. Unknown
    /// trigger names and modes are logged and ignored.
    pub fn from_host(
        value: &serde_json::Value,
        defaults: &EngineDefaults,
    ) -> Result<Self, ConfigError> {
        let section = if value.get("linterhub").is_some() {
            serde_json::from_value::<HostEnvelope>(value.clone())
                .map_err(ConfigError::Settings)?
                .linterhub
        } else if value.is_null() {
            HostSection::default()
        } else {
            serde_json::from_value::<HostSection>(value.clone()).map_err(ConfigError::Settings)?
        };

        let run: Vec<RunTrigger> = section
            .run
            .iter()
            .filter_map(|name| match name.parse() {
                Ok(trigger) => Some(trigger),
                Err(e) => {
                    tracing::warn!("Ignoring editor run setting: {e}");
                    None
                }
            })
            .collect();
        let run = if run.is_empty() {
            defaults.run.clone()
        } else {
            run
        };

        let mode = match section.mode.as_deref().map(str::parse::<EngineMode>) {
            Some(Ok(mode)) => mode,
            Some(Err(e)) => {
                tracing::warn!("{e}; using {}", defaults.mode);
                defaults.mode
            }
            None => defaults.mode,
        };

        let non_empty = |s: Option<String>| {
            s.map(|s| expand_env_vars(&s))
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
        };
        let cli_root = non_empty(section.cli_root).unwrap_or_else(|| defaults.cli_root.clone());
        let cli_path = non_empty(section.cli_path);

        Ok(Self::normalized(
            section.enable.unwrap_or(true),
            run,
            mode,
            cli_root,
            cli_path,
        ))
    }

    fn normalized(
        enable: bool,
        mut run: Vec<RunTrigger>,
        mode: EngineMode,
        cli_root: PathBuf,
        cli_path: Option<PathBuf>,
    ) -> Self {
        if !run.contains(&RunTrigger::Force) {
            run.push(RunTrigger::Force);
        }
        let mut seen = Vec::with_capacity(run.len());
        run.retain(|t| {
            if seen.contains(t) {
                false
            } else {
                seen.push(*t);
                true
            }
        });
        Self {
            enable,
            run,
            mode,
            cli_root,
            cli_path,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enable
    }

    /// Whether an analysis with this trigger may run.
    #[must_use]
    pub fn allows(&self, trigger: RunTrigger) -> bool {
        self.enable && self.run.contains(&trigger)
    }

    #[must_use]
    pub fn run(&self) -> &[RunTrigger] {
        &self.run
    }

    #[must_use]
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Install location of the engine runtime.
    #[must_use]
    pub fn cli_root(&self) -> &Path {
        &self.cli_root
    }

    /// Directory the engine is launched from: the explicit `cliPath` if set.
    #[must_use]
    pub fn engine_dir(&self) -> &Path {
        self.cli_path.as_deref().unwrap_or(&self.cli_root)
    }

    /// Switch to a freshly installed runtime.
    pub fn set_installed(&mut self, mode: EngineMode, path: PathBuf) {
        self.mode = mode;
        self.cli_path = Some(path);
    }
}
