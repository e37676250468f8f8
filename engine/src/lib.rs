//! Engine orchestration for Linterhub.
//!
//! This crate runs the external engine runtime, installs it when missing,
//! converts its output into per-file diagnostics and tracks progress. The
//! [`Orchestrator`] is the entry point; everything it talks to on the editor
//! side goes through the [`Host`] trait.

mod cacheable;
mod client;
pub mod converter;
mod error;
pub mod install;
mod orchestrator;
pub mod platform;
mod process;
mod progress;

pub use cacheable::Cacheable;
pub use client::{CommandBuilder, EngineClient, Operation};
pub use error::EngineError;
pub use install::{
    DownloadOptions, EngineInstaller, InstallArtifact, InstallError, InstallFut, InstallRequest,
    Installer,
};
pub use orchestrator::{AnalysisOutcome, EngineState, Host, HostFut, InstallConfig, Orchestrator};
pub use platform::UnsupportedPlatformError;
pub use process::{CommandLine, CommandRunner, DEFAULT_MAX_OUTPUT_BYTES, ProcessRunner, RunFut};
pub use progress::{
    ASCII_SPINNER_FRAMES, IDLE_GLYPH, ProgressGuard, ProgressSink, ProgressTracker,
    SPINNER_FRAMES, default_frames,
};
