//! What an effect job did
//!
//! Serialized as JSON for machines, rendered as markdown into the job
//! summary, and reduced to `key=value` job outputs for downstream jobs.

use super::backend::{AppliedEffect, Operation};
use crate::model::EffectKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Why a request was not applied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum SkipReason {
    Invalid(String),
    /// Every sub-value was outside the allow-list
    Disallowed(String),
    NoTarget(String),
    MissingPatch(String),
    /// Beyond the declared `max`
    Truncated,
    /// A later request with the same key replaced this one
    Superseded { by_line: usize },
    /// A later identical request is applied instead
    Duplicate { of_line: usize },
    AlreadyApplied { url: Option<String> },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(detail) => write!(f, "invalid: {detail}"),
            Self::Disallowed(detail) => write!(f, "disallowed: {detail}"),
            Self::NoTarget(detail) => write!(f, "no target: {detail}"),
            Self::MissingPatch(detail) => write!(f, "no patch: {detail}"),
            Self::Truncated => f.write_str("over the declared max"),
            Self::Superseded { by_line } => write!(f, "superseded by line {by_line}"),
            Self::Duplicate { of_line } => write!(f, "duplicate of line {of_line}"),
            Self::AlreadyApplied { url: Some(url) } => write!(f, "already applied ({url})"),
            Self::AlreadyApplied { url: None } => f.write_str("already applied"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub line: usize,
    pub summary: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// An operation that would have run outside staged mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub line: usize,
    pub summary: String,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub line: usize,
    pub summary: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReport {
    pub kind: EffectKind,
    pub staged: bool,
    pub applied: Vec<AppliedEffect>,
    pub previews: Vec<Preview>,
    pub skipped: Vec<Skipped>,
    pub failures: Vec<Failure>,
    pub warnings: Vec<String>,
}

impl ApplyReport {
    pub fn new(kind: EffectKind, staged: bool) -> Self {
        Self {
            kind,
            staged,
            applied: Vec::new(),
            previews: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Job outputs, taken from the first applied effect
    pub fn outputs(&self) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        let Some(first) = self.applied.first() else {
            return outputs;
        };
        let number = first.number.map(|n| n.to_string());
        let url = first.url.clone();
        let mut set = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                outputs.insert(key.to_string(), value);
            }
        };
        match self.kind {
            EffectKind::CreateIssue => {
                set("issue_number", number);
                set("issue_url", url);
            }
            EffectKind::CreateDiscussion => {
                set("discussion_number", number);
                set("discussion_url", url);
            }
            EffectKind::CreatePullRequest => {
                set("pull_request_number", number);
                set("pull_request_url", url);
                set("branch_name", first.branch.clone());
            }
            EffectKind::AddComment => {
                set("comment_id", number);
                set("comment_url", url);
            }
            EffectKind::UpdateIssue | EffectKind::CloseIssue => set("issue_number", number),
            EffectKind::CreatePullRequestReviewComment => set("review_comment_id", number),
            EffectKind::AddLabels => set("labels_added", Some(first.summary.clone())),
            EffectKind::AssignToUser => set("assigned", Some(first.summary.clone())),
            EffectKind::MissingTool => set("tools_reported", Some(self.applied.len().to_string())),
        }
        outputs
    }

    pub fn to_markdown(&self) -> String {
        let mut md = format!("## {}", self.kind);
        if self.staged {
            md.push_str(" (staged preview)");
        }
        md.push_str("\n\n");

        if self.staged {
            if self.previews.is_empty() {
                md.push_str("Nothing would be applied.\n");
            }
            for preview in &self.previews {
                md.push_str(&format!("- would apply {} (line {})\n", preview.summary, preview.line));
            }
        } else {
            if self.applied.is_empty() && self.failures.is_empty() {
                md.push_str("Nothing was applied.\n");
            }
            for applied in &self.applied {
                match &applied.url {
                    Some(url) => md.push_str(&format!("- applied [{}]({url})\n", applied.summary)),
                    None => md.push_str(&format!("- applied {}\n", applied.summary)),
                }
            }
            for failure in &self.failures {
                md.push_str(&format!(
                    "- **failed** {} (line {}): {}\n",
                    failure.summary, failure.line, failure.error
                ));
            }
        }

        if !self.skipped.is_empty() {
            md.push_str("\n### Skipped\n\n");
            for skipped in &self.skipped {
                md.push_str(&format!(
                    "- line {}: {} ({})\n",
                    skipped.line, skipped.summary, skipped.reason
                ));
            }
        }
        if !self.warnings.is_empty() {
            md.push_str("\n### Warnings\n\n");
            for warning in &self.warnings {
                md.push_str(&format!("- {warning}\n"));
            }
        }
        md
    }

    /// Append the markdown rendering to `$GITHUB_STEP_SUMMARY`
    pub fn write_step_summary(&self, path: &Path) -> io::Result<()> {
        append(path, &format!("{}\n", self.to_markdown()))
    }

    /// Append `key=value` lines to `$GITHUB_OUTPUT`
    pub fn write_outputs(&self, path: &Path) -> io::Result<()> {
        write_outputs(path, &self.outputs())
    }
}

pub fn write_outputs(path: &Path, outputs: &BTreeMap<String, String>) -> io::Result<()> {
    let mut text = String::new();
    for (key, value) in outputs {
        text.push_str(&format!("{key}={value}\n"));
    }
    append(path, &text)
}

fn append(path: &Path, text: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_outputs_from_first_applied() {
        let mut report = ApplyReport::new(EffectKind::CreateIssue, false);
        assert!(report.outputs().is_empty());
        report.applied.push(
            AppliedEffect::new(EffectKind::CreateIssue, "issue \"Flaky\"")
                .with_number(12)
                .with_url("https://github.com/acme/app/issues/12"),
        );
        let outputs = report.outputs();
        assert_eq!(outputs["issue_number"], "12");
        assert_eq!(outputs["issue_url"], "https://github.com/acme/app/issues/12");
    }

    #[test]
    fn test_markdown_lists_skips() {
        let mut report = ApplyReport::new(EffectKind::AddLabels, true);
        report.skipped.push(Skipped {
            line: 4,
            summary: "labels wontfix".into(),
            reason: SkipReason::Truncated,
        });
        let md = report.to_markdown();
        assert!(md.starts_with("## add-labels (staged preview)"));
        assert!(md.contains("- line 4: labels wontfix (over the declared max)"));
    }

    #[test]
    fn test_write_outputs_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output");
        std::fs::write(&path, "existing=1\n").unwrap();
        let mut outputs = BTreeMap::new();
        outputs.insert("success".to_string(), "true".to_string());
        write_outputs(&path, &outputs).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing=1\nsuccess=true\n");
    }
}
