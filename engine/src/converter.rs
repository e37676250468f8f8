//! Raw engine JSON to per-file diagnostics.
//!
//! Two output shapes exist in the wild. Both are parsed into explicit raw
//! structs, normalized into [`EngineResult`]s, and only then keyed by file URI.
//! Legacy `Row`/`Line` numbers are 1-based; current-shape `line`/`lineEnd`
//! and all columns are already 0-based.

use std::path::Path;

use linterhub_types::{
    AggregatedDiagnostics, Diagnostic, END_OF_LINE_COLUMN, EngineResult, FileResult, Message,
    Severity, Span,
};
use serde::Deserialize;
use url::Url;

use crate::error::EngineError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEngine {
    Legacy(LegacyEngine),
    Current(CurrentEngine),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyEngine {
    name: String,
    #[serde(default)]
    model: Option<LegacyModel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyModel {
    #[serde(default)]
    files: Vec<LegacyFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyFile {
    path: String,
    #[serde(default)]
    errors: Vec<LegacyError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyError {
    #[serde(default)]
    severity: Option<RawSeverity>,
    #[serde(default)]
    row: Option<LegacyRange>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    column: Option<LegacyRange>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    rule: Option<LegacyRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyRange {
    #[serde(default)]
    start: i64,
    #[serde(default)]
    end: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyRule {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentEngine {
    engine: String,
    #[serde(default)]
    result: Option<Vec<CurrentFile>>,
}

#[derive(Debug, Deserialize)]
struct CurrentFile {
    path: String,
    #[serde(default)]
    messages: Vec<CurrentMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentMessage {
    #[serde(default)]
    severity: Option<RawSeverity>,
    #[serde(default)]
    line: i64,
    #[serde(default)]
    line_end: Option<i64>,
    #[serde(default)]
    column: i64,
    #[serde(default)]
    column_end: Option<i64>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    rule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSeverity {
    Code(i64),
    Name(String),
}

impl RawSeverity {
    fn resolve(severity: Option<&Self>) -> Severity {
        match severity {
            Some(Self::Code(code)) => Severity::from_code(*code),
            Some(Self::Name(name)) => match name.trim().parse::<i64>() {
                Ok(code) => Severity::from_code(code),
                Err(_) => Severity::from_name(name),
            },
            None => Severity::Warning,
        }
    }
}

fn zero_based_line(line: i64) -> u32 {
    clamp(line.saturating_sub(1))
}

fn clamp(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn column_end(end: Option<i64>) -> u32 {
    match end {
        Some(end) if end > 0 => clamp(end),
        _ => END_OF_LINE_COLUMN,
    }
}

impl LegacyError {
    fn into_message(self) -> Message {
        let (start, end) = match (&self.row, self.line) {
            (Some(row), _) => (row.start, row.end.unwrap_or(row.start)),
            (None, Some(line)) => (line, line),
            (None, None) => (1, 1),
        };
        let (column, end_column) = self
            .column
            .as_ref()
            .map_or((0, None), |c| (c.start, c.end));
        let span = Span {
            line: zero_based_line(start),
            line_end: zero_based_line(end),
            column: clamp(column),
            column_end: column_end(end_column),
        };
        Message::new(
            RawSeverity::resolve(self.severity.as_ref()),
            span,
            self.message,
            self.rule.and_then(|rule| rule.name),
        )
    }
}

impl CurrentMessage {
    fn into_message(self) -> Message {
        let span = Span {
            line: clamp(self.line),
            line_end: clamp(self.line_end.unwrap_or(self.line)),
            column: clamp(self.column),
            column_end: column_end(self.column_end),
        };
        Message::new(
            RawSeverity::resolve(self.severity.as_ref()),
            span,
            self.message,
            self.rule_id.filter(|id| !id.is_empty()),
        )
    }
}

impl RawEngine {
    fn normalize(self) -> Option<EngineResult> {
        let (engine, files) = match self {
            Self::Legacy(legacy) => {
                let files = legacy.model.unwrap_or_default().files;
                let files: Vec<FileResult> = files
                    .into_iter()
                    .map(|file| FileResult {
                        path: file.path,
                        messages: file.errors.into_iter().map(LegacyError::into_message).collect(),
                    })
                    .collect();
                (legacy.name, files)
            }
            Self::Current(current) => {
                let files: Vec<FileResult> = current
                    .result
                    .unwrap_or_default()
                    .into_iter()
                    .map(|file| FileResult {
                        path: file.path,
                        messages: file
                            .messages
                            .into_iter()
                            .map(CurrentMessage::into_message)
                            .collect(),
                    })
                    .collect();
                (current.engine, files)
            }
        };
        if files.is_empty() {
            return None;
        }
        Some(EngineResult { engine, files })
    }
}

/// Parse raw engine output into normalized per-engine results.
///
/// Blank output means no engine reported anything.
pub fn parse(raw: &str) -> Result<Vec<EngineResult>, EngineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let engines: Vec<RawEngine> = serde_json::from_str(raw)?;
    Ok(engines.into_iter().filter_map(RawEngine::normalize).collect())
}

/// `file://` URI for a project-relative path.
#[must_use]
pub fn file_uri(project_root: &Path, path: &str) -> String {
    let absolute = project_root.join(path);
    match Url::from_file_path(&absolute) {
        Ok(url) => url.to_string(),
        Err(()) => {
            tracing::debug!(path = %absolute.display(), "Path is not absolute; using it verbatim");
            absolute.display().to_string()
        }
    }
}

/// Group normalized results by file, preserving engine order.
#[must_use]
pub fn aggregate(results: Vec<EngineResult>, project_root: &Path) -> AggregatedDiagnostics {
    let mut out = AggregatedDiagnostics::new();
    for result in results {
        for file in result.files {
            let uri = file_uri(project_root, &file.path);
            let engine = &result.engine;
            out.extend(
                &uri,
                file.messages
                    .into_iter()
                    .map(|message| Diagnostic::new(message, engine.as_str())),
            );
        }
    }
    out
}

/// Parse and aggregate in one step. Malformed JSON yields no partial result.
pub fn convert(raw: &str, project_root: &Path) -> Result<AggregatedDiagnostics, EngineError> {
    Ok(aggregate(parse(raw)?, project_root))
}
