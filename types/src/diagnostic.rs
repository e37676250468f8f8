//! Engine-agnostic diagnostic model.
//!
//! Raw engine output is normalized into [`EngineResult`]s whose paths stay
//! project-relative. Only [`AggregatedDiagnostics`] is keyed by absolute file
//! URI, since that is the shape handed to the host.

use std::collections::HashMap;
use std::vec::IntoIter;

use serde::{Deserialize, Serialize};

/// Column used when an engine reports no end column: "until end of line".
pub const END_OF_LINE_COLUMN: u32 = 1000;

/// Severity level of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    /// Map an engine severity code (0=error, 1=warning, 2=information, 3=hint).
    ///
    /// Anything else is a warning; unknown codes are never fatal.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Error,
            2 => Self::Information,
            3 => Self::Hint,
            _ => Self::Warning,
        }
    }

    /// Map a textual severity as emitted by newer engine builds.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" => Self::Error,
            "info" | "information" => Self::Information,
            "hint" | "note" => Self::Hint,
            _ => Self::Warning,
        }
    }

    /// LSP numeric severity (1=Error, 2=Warning, 3=Information, 4=Hint).
    #[must_use]
    pub fn to_lsp(self) -> u8 {
        match self {
            Self::Error => 1,
            Self::Warning => 2,
            Self::Information => 3,
            Self::Hint => 4,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

/// Zero-based location of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub line_end: u32,
    pub column: u32,
    pub column_end: u32,
}

/// One normalized engine message.
///
/// Fields are private; external consumers read via accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    severity: Severity,
    span: Span,
    text: String,
    rule_id: Option<String>,
}

impl Message {
    #[must_use]
    pub fn new(severity: Severity, span: Span, text: String, rule_id: Option<String>) -> Self {
        Self {
            severity,
            span,
            text,
            rule_id,
        }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn span(&self) -> Span {
        self.span
    }

    /// 0-indexed start line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.span.line
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn rule_id(&self) -> Option<&str> {
        self.rule_id.as_deref()
    }
}

/// Messages one engine reported for one project-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: String,
    pub messages: Vec<Message>,
}

/// Everything one engine reported in a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineResult {
    pub engine: String,
    pub files: Vec<FileResult>,
}

/// A message tagged with the engine that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    message: Message,
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(message: Message, source: impl Into<String>) -> Self {
        Self {
            message,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.message.severity
    }

    /// Originating engine name.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Per-file diagnostics keyed by absolute file URI.
///
/// Files keep first-seen order and messages are appended in the order they
/// were reported; nothing is deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedDiagnostics {
    files: Vec<(String, Vec<Diagnostic>)>,
    index: HashMap<String, usize>,
}

impl AggregatedDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append diagnostics for `uri`, creating the entry if needed.
    pub fn extend(&mut self, uri: &str, items: impl IntoIterator<Item = Diagnostic>) {
        let slot = match self.index.get(uri) {
            Some(&slot) => slot,
            None => {
                self.files.push((uri.to_string(), Vec::new()));
                self.index.insert(uri.to_string(), self.files.len() - 1);
                self.files.len() - 1
            }
        };
        self.files[slot].1.extend(items);
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&[Diagnostic]> {
        self.index.get(uri).map(|&slot| self.files[slot].1.as_slice())
    }

    #[must_use]
    pub fn files(&self) -> &[(String, Vec<Diagnostic>)] {
        &self.files
    }

    /// Number of distinct files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total diagnostic count across all files.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity().is_error())
            .count()
    }
}

impl IntoIterator for AggregatedDiagnostics {
    type Item = (String, Vec<Diagnostic>);
    type IntoIter = IntoIter<(String, Vec<Diagnostic>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}
