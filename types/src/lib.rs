//! Core domain types for Linterhub.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The engine, configuration and protocol layers all speak in these types.

mod diagnostic;
mod engine;
mod ids;
mod platform;
mod status;
mod trigger;

pub use diagnostic::{
    AggregatedDiagnostics, Diagnostic, EngineResult, FileResult, Message, Severity, Span,
    END_OF_LINE_COLUMN,
};
pub use engine::{EngineDescriptor, EngineMode, LinterVersion, UnknownModeError};
pub use ids::OperationId;
pub use platform::{Arch, Os, PlatformInfo};
pub use status::{StatusState, UnknownStatusError};
pub use trigger::{RunTrigger, UnknownTriggerError};
