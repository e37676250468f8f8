//! Per-project engine configuration (`.linterhub.json`).
//!
//! Records which engines are activated for the project and their
//! engine-specific settings. Written with a temp file + rename so a crash
//! never leaves a truncated file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use linterhub_types::EngineMode;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::ConfigError;

pub const PROJECT_CONFIG_FILE: &str = ".linterhub.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLinter {
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<EngineMode>,
    #[serde(default)]
    pub linters: Vec<ProjectLinter>,
}

impl ProjectConfig {
    #[must_use]
    pub fn path_for(project: &Path) -> PathBuf {
        project.join(PROJECT_CONFIG_FILE)
    }

    /// Read the project's config; a missing file is an empty config.
    pub fn load(project: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_for(project);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ConfigError::Read { path, source: err }),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|source| ConfigError::Json { path, source })
    }

    pub fn save(&self, project: &Path) -> Result<(), ConfigError> {
        let path = Self::path_for(project);
        let mut body = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;
        body.push(b'\n');

        let write = || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(project)?;
            tmp.write_all(&body)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), linters = self.linters.len(), "Saved project config");
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.linters.iter().any(|l| l.name == name)
    }

    /// Add `name` to the active set. Returns false if it was already there.
    pub fn activate(&mut self, name: &str) -> bool {
        if self.is_active(name) {
            return false;
        }
        self.linters.push(ProjectLinter {
            name: name.to_string(),
            config: serde_json::Value::Null,
        });
        true
    }

    /// Remove `name` from the active set. Returns false if it was not active.
    pub fn deactivate(&mut self, name: &str) -> bool {
        let before = self.linters.len();
        self.linters.retain(|l| l.name != name);
        before != self.linters.len()
    }
}
