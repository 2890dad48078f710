//! Collection of the agent's requests at the end of the agent job
//!
//! Reads the raw log the mediator wrote, drops anything undeclared or
//! invalid, neutralizes text that could act on readers (terminal escapes,
//! `@mentions`) and writes the sanitized log that effect jobs consume.

use super::log::{LogError, SafeOutputsLog};
use super::request::RecordError;
use crate::model::{EffectKind, SafeOutputDeclaration};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Longest text field kept, in characters
pub const MAX_TEXT_CHARS: usize = 65_000;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("Valid regex pattern"));

static MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^\w`])@([A-Za-z0-9][A-Za-z0-9-]{0,38}(?:/[A-Za-z0-9._-]+)?)")
        .expect("Valid regex pattern")
});

/// Strip escapes and control characters, quote mentions, cap the length
pub fn sanitize_text(text: &str) -> String {
    let without_ansi = ANSI_ESCAPE.replace_all(text, "");
    let printable: String = without_ansi
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let quoted = MENTION.replace_all(&printable, "$1`@$2`");
    if quoted.chars().count() > MAX_TEXT_CHARS {
        let mut truncated: String = quoted.chars().take(MAX_TEXT_CHARS).collect();
        truncated.push_str("\n\n[content truncated]");
        truncated
    } else {
        quoted.into_owned()
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct CollectSummary {
    pub accepted: usize,
    pub kinds: BTreeSet<EffectKind>,
    pub rejected: Vec<String>,
    pub has_patch: bool,
}

impl CollectSummary {
    /// Comma-delimited kinds (`,add-comment,create-issue,`) so guards can
    /// match whole keys with `contains`
    pub fn output_types(&self) -> String {
        if self.kinds.is_empty() {
            return String::new();
        }
        let keys: Vec<&str> = self.kinds.iter().map(EffectKind::key).collect();
        format!(",{},", keys.join(","))
    }

    pub fn outputs(&self) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        outputs.insert("output_types".to_string(), self.output_types());
        outputs.insert("has_patch".to_string(), self.has_patch.to_string());
        outputs
    }
}

pub fn collect(
    log: &SafeOutputsLog,
    declarations: &[SafeOutputDeclaration],
    output: &Path,
    patch: Option<&Path>,
) -> Result<CollectSummary, LogError> {
    let contents = log.read()?;
    let mut summary = CollectSummary::default();
    let mut lines = String::new();

    for error in &contents.errors {
        summary.rejected.push(error.to_string());
    }
    for logged in &contents.records {
        let kind = logged.request.kind();
        if !declarations.iter().any(|d| d.kind == kind) {
            let err = RecordError::NotDeclared { kind };
            warn!("line {}: {}", logged.line, err);
            summary.rejected.push(format!("line {}: {}", logged.line, err));
            continue;
        }
        if let Err(err) = logged.request.validate() {
            warn!("line {}: {}", logged.line, err);
            summary.rejected.push(format!("line {}: {}", logged.line, err));
            continue;
        }
        let mut request = logged.request.clone();
        request.map_text(sanitize_text);
        lines.push_str(&request.to_json_line()?);
        lines.push('\n');
        summary.accepted += 1;
        summary.kinds.insert(kind);
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|source| LogError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(output, lines).map_err(|source| LogError::Io {
        path: output.to_path_buf(),
        source,
    })?;

    summary.has_patch = patch
        .and_then(|path| fs::metadata(path).ok())
        .is_some_and(|meta| meta.len() > 0);
    info!(
        "collected {} request(s) of {} kind(s), {} rejected",
        summary.accepted,
        summary.kinds.len(),
        summary.rejected.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("ping @octocat now"), "ping `@octocat` now");
        assert_eq!(sanitize_text("mail me@example.com"), "mail me@example.com");
        assert_eq!(sanitize_text("already `@quoted`"), "already `@quoted`");
        assert_eq!(sanitize_text("\x1b[31mred\x1b[0m\x07"), "red");
        assert_eq!(sanitize_text("team @acme/ops"), "team `@acme/ops`");
    }

    #[test]
    fn test_collect_filters_and_reports_types() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("outputs.jsonl");
        fs::write(
            &raw,
            concat!(
                "{\"type\":\"create_issue\",\"title\":\"Hi @team\",\"body\":\"b\"}\n",
                "{\"type\":\"add-labels\",\"labels\":[\"bug\"]}\n",
                "{\"type\":\"create-pull-request\",\"title\":\"x\",\"body\":\"y\"}\n",
                "{\"type\":\"add-comment\",\"body\":\"\"}\n",
            ),
        )
        .unwrap();
        let declarations = vec![
            SafeOutputDeclaration::new(EffectKind::CreateIssue),
            SafeOutputDeclaration::new(EffectKind::AddLabels),
            SafeOutputDeclaration::new(EffectKind::AddComment),
        ];
        let output = dir.path().join("out/agent_output.jsonl");

        let summary = collect(&SafeOutputsLog::new(&raw), &declarations, &output, None).unwrap();
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected.len(), 2);
        assert_eq!(summary.output_types(), ",create-issue,add-labels,");
        assert!(!summary.has_patch);

        let written = fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(written.contains("Hi `@team`"));
    }

    #[test]
    fn test_empty_log_has_no_types() {
        let dir = TempDir::new().unwrap();
        let summary = collect(
            &SafeOutputsLog::new(dir.path().join("missing.jsonl")),
            &[],
            &dir.path().join("agent_output.jsonl"),
            None,
        )
        .unwrap();
        assert_eq!(summary.output_types(), "");
        assert_eq!(summary.outputs()["has_patch"], "false");
    }
}
