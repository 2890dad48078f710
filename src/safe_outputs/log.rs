//! Append-only safe-outputs log
//!
//! The agent job owns a single writer; every accepted request becomes one
//! JSON line. Readers tolerate bad lines and report them per line, but a
//! non-empty log with nothing parseable at all is treated as corrupt.

use super::request::{EffectRequest, RecordError};
use crate::error::ErrorCode;
use crate::model::{EffectKind, SafeOutputDeclaration};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LogError {
    #[error("[E6005] failed to access safe-outputs log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("[E6004] safe-outputs log {path} contains no parseable records")]
    Unparsable { path: PathBuf },

    #[error("[E6005] failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl LogError {
    pub fn code(&self) -> u16 {
        match self {
            Self::Io { .. } | Self::Encode(_) => ErrorCode::LOG_IO,
            Self::Unparsable { .. } => ErrorCode::LOG_UNPARSABLE,
            Self::Record(err) => err.code(),
        }
    }
}

/// A parsed request and the 1-based line it came from
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedRequest {
    pub line: usize,
    pub request: EffectRequest,
}

/// Everything read from a log
#[derive(Debug, Default)]
pub struct LogContents {
    pub records: Vec<LoggedRequest>,
    pub errors: Vec<RecordError>,
}

impl LogContents {
    pub fn of_kind(&self, kind: EffectKind) -> impl Iterator<Item = &LoggedRequest> {
        self.records
            .iter()
            .filter(move |record| record.request.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SafeOutputsLog {
    path: PathBuf,
}

impl SafeOutputsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one record as a single line
    pub fn append(&self, request: &EffectRequest) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }
        let mut line = request.to_json_line()?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes()).map_err(|e| self.io_error(e))?;
        debug!("recorded {} request in {}", request.kind(), self.path.display());
        Ok(())
    }

    /// Read every line; a missing log reads as empty
    pub fn read(&self) -> Result<LogContents, LogError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no safe-outputs log at {}", self.path.display());
                return Ok(LogContents::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        parse_log(&text).ok_or_else(|| LogError::Unparsable {
            path: self.path.clone(),
        })
    }
}

/// `None` when there is content but no line is a JSON object
fn parse_log(text: &str) -> Option<LogContents> {
    let mut contents = LogContents::default();
    let mut saw_object = false;
    let mut saw_content = false;

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        saw_content = true;
        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                warn!("skipping malformed record on line {}: {}", line_number, e);
                contents.errors.push(RecordError::Malformed {
                    line: line_number,
                    message: e.to_string(),
                });
                continue;
            }
        };
        saw_object |= value.is_object();
        match EffectRequest::from_value(line_number, value) {
            Ok(request) => contents.records.push(LoggedRequest {
                line: line_number,
                request,
            }),
            Err(err) => {
                warn!("skipping record: {}", err);
                contents.errors.push(err);
            }
        }
    }

    if saw_content && !saw_object {
        return None;
    }
    Some(contents)
}

/// Mediator: accepts only declared kinds with valid fields
pub struct SafeOutputsWriter {
    log: SafeOutputsLog,
    declarations: Vec<SafeOutputDeclaration>,
}

impl SafeOutputsWriter {
    pub fn new(log: SafeOutputsLog, declarations: Vec<SafeOutputDeclaration>) -> Self {
        Self { log, declarations }
    }

    pub fn declarations(&self) -> &[SafeOutputDeclaration] {
        &self.declarations
    }

    pub fn is_declared(&self, kind: EffectKind) -> bool {
        self.declarations.iter().any(|d| d.kind == kind)
    }

    /// Validate a request object and append it
    pub fn emit(&self, value: serde_json::Value) -> Result<EffectRequest, LogError> {
        let request = EffectRequest::from_value(1, value)?;
        let kind = request.kind();
        if !self.is_declared(kind) {
            return Err(RecordError::NotDeclared { kind }.into());
        }
        request.validate()?;
        self.log.append(&request)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = SafeOutputsLog::new(dir.path().join("outputs.jsonl"));
        assert!(log.read().unwrap().is_empty());
    }

    #[test]
    fn test_bad_lines_are_reported_per_line() {
        let contents = parse_log(
            "{\"type\":\"add-comment\",\"body\":\"hi\"}\nnot json\n\n{\"type\":\"bogus\"}\n",
        )
        .unwrap();
        assert_eq!(contents.records.len(), 1);
        assert_eq!(contents.records[0].line, 1);
        assert_eq!(contents.errors.len(), 2);
        assert!(matches!(contents.errors[0], RecordError::Malformed { line: 2, .. }));
        assert!(matches!(contents.errors[1], RecordError::UnknownKind { line: 4, .. }));
    }

    #[test]
    fn test_garbage_log_is_unparsable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outputs.jsonl");
        fs::write(&path, "garbage\n42\n").unwrap();
        let err = SafeOutputsLog::new(&path).read().unwrap_err();
        assert_eq!(err.code(), ErrorCode::LOG_UNPARSABLE);
    }

    #[test]
    fn test_writer_rejects_undeclared_kinds() {
        let dir = TempDir::new().unwrap();
        let log = SafeOutputsLog::new(dir.path().join("nested/outputs.jsonl"));
        let writer = SafeOutputsWriter::new(
            log.clone(),
            vec![SafeOutputDeclaration::new(EffectKind::AddComment)],
        );

        writer
            .emit(json!({"type": "add_comment", "body": "Thanks!"}))
            .unwrap();
        let err = writer
            .emit(json!({"type": "create-issue", "title": "t", "body": "b"}))
            .unwrap_err();
        assert!(matches!(
            err,
            LogError::Record(RecordError::NotDeclared {
                kind: EffectKind::CreateIssue
            })
        ));
        assert!(writer.emit(json!({"type": "add-comment", "body": " "})).is_err());

        let contents = log.read().unwrap();
        assert_eq!(contents.records.len(), 1);
        assert_eq!(contents.of_kind(EffectKind::AddComment).count(), 1);
    }
}
