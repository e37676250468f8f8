use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// When an analysis is permitted to run.
///
/// Every analyze request carries a trigger; the orchestrator compares it
/// against the configured allow-list before spawning anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunTrigger {
    None,
    Force,
    OnStart,
    OnOpen,
    OnType,
    OnSave,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown run trigger: {0}")]
pub struct UnknownTriggerError(pub String);

impl RunTrigger {
    pub const ALL: [RunTrigger; 6] = [
        RunTrigger::None,
        RunTrigger::Force,
        RunTrigger::OnStart,
        RunTrigger::OnOpen,
        RunTrigger::OnType,
        RunTrigger::OnSave,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RunTrigger::None => "none",
            RunTrigger::Force => "force",
            RunTrigger::OnStart => "onStart",
            RunTrigger::OnOpen => "onOpen",
            RunTrigger::OnType => "onType",
            RunTrigger::OnSave => "onSave",
        }
    }

    /// Default allow-list used when nothing is configured.
    #[must_use]
    pub fn defaults() -> Vec<RunTrigger> {
        vec![RunTrigger::OnOpen, RunTrigger::OnSave]
    }
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunTrigger {
    type Err = UnknownTriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunTrigger::ALL
            .into_iter()
            .find(|trigger| trigger.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownTriggerError(s.to_string()))
    }
}
