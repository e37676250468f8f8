use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Execution strategy for the engine runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineMode {
    /// Framework-dependent build launched through `dotnet`.
    #[serde(alias = "dotnet")]
    ManagedRuntime,
    /// Self-contained executable for the current platform.
    #[default]
    #[serde(alias = "native")]
    NativeBinary,
    /// Engine image run through docker.
    #[serde(alias = "docker")]
    Container,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown engine mode: {0}")]
pub struct UnknownModeError(pub String);

impl EngineMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EngineMode::ManagedRuntime => "managedRuntime",
            EngineMode::NativeBinary => "nativeBinary",
            EngineMode::Container => "container",
        }
    }

    /// Short name used on the command line and in older config files.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            EngineMode::ManagedRuntime => "dotnet",
            EngineMode::NativeBinary => "native",
            EngineMode::Container => "docker",
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        [
            EngineMode::ManagedRuntime,
            EngineMode::NativeBinary,
            EngineMode::Container,
        ]
        .into_iter()
        .find(|mode| {
            mode.as_str().eq_ignore_ascii_case(s) || mode.short_name().eq_ignore_ascii_case(s)
        })
        .ok_or_else(|| UnknownModeError(s.to_string()))
    }
}

/// One engine known to the installed runtime.
///
/// Identity is the name; a catalog never lists the same name twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Language selector pattern, e.g. `javascript,typescript`.
    #[serde(default)]
    pub languages: String,
    #[serde(default)]
    pub active: bool,
}

/// Installed version of a single engine, in the casing the host expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinterVersion {
    pub linter_name: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub version: String,
}

impl LinterVersion {
    /// Placeholder reported when the engine could not be queried.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            linter_name: name.into(),
            installed: false,
            version: String::new(),
        }
    }
}
