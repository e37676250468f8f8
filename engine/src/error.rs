use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::install::InstallError;
use crate::platform::UnsupportedPlatformError;

/// Errors from engine invocation and lifecycle.
///
/// `Clone` so one in-flight result can be handed to every waiter of a
/// [`Cacheable`](crate::Cacheable); non-clonable sources are held in `Arc`.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("`{command}` failed{}: {}", exit_suffix(.code), .stderr.trim())]
    Process {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("engine output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
    #[error("malformed engine output: {0}")]
    MalformedOutput(#[source] Arc<serde_json::Error>),
    #[error(transparent)]
    Install(Arc<InstallError>),
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatformError),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("engine not initialized")]
    NotInitialized,
}

#[allow(clippy::ref_option)]
fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => String::new(),
    }
}

impl From<InstallError> for EngineError {
    fn from(err: InstallError) -> Self {
        EngineError::Install(Arc::new(err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::MalformedOutput(Arc::new(err))
    }
}

impl EngineError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
            || matches!(self, EngineError::Install(e) if e.is_cancelled())
    }
}
