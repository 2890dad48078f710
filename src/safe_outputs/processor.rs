//! Effect processing
//!
//! One effect job processes the requests of its own kind:
//!
//! 1. filter the log to the job's kind
//! 2. validate fields
//! 3. apply the allow-list (`warn` records a warning, `silent` does not)
//! 4. resolve the target entity
//! 5. enforce `max` in log order
//! 6. deduplicate by key, keeping the last request
//! 7. preview (staged) or apply, skipping effects an earlier attempt already made

use super::backend::{dedup_marker, EffectBackend, Operation};
use super::log::LogContents;
use super::report::{ApplyReport, Failure, Preview, SkipReason, Skipped};
use super::request::{EffectRequest, ReviewSide};
use crate::model::{AllowListPolicy, EffectKind, SafeOutputDeclaration, Target};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Facts about the triggering event, taken from the job environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContext {
    pub event_name: Option<String>,
    /// Issue, pull request or discussion number of the triggering event
    pub event_number: Option<u64>,
    /// Entities created by upstream effect jobs
    pub created: BTreeMap<EffectKind, u64>,
}

impl EventContext {
    pub fn from_env() -> Self {
        fn number(name: &str) -> Option<u64> {
            std::env::var(name)
                .ok()
                .and_then(|value| value.trim().parse().ok())
                .filter(|n| *n > 0)
        }

        let mut created = BTreeMap::new();
        for (kind, variable) in [
            (EffectKind::CreateIssue, "AW_CREATED_ISSUE_NUMBER"),
            (EffectKind::CreateDiscussion, "AW_CREATED_DISCUSSION_NUMBER"),
            (EffectKind::CreatePullRequest, "AW_CREATED_PULL_REQUEST_NUMBER"),
        ] {
            if let Some(n) = number(variable) {
                created.insert(kind, n);
            }
        }

        Self {
            event_name: std::env::var("AW_EVENT_NAME").ok().filter(|v| !v.is_empty()),
            event_number: number("AW_EVENT_NUMBER"),
            created,
        }
    }
}

/// A request that survived every policy check
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEffect {
    pub line: usize,
    pub key: String,
    pub summary: String,
    pub operation: Operation,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub effects: Vec<PlannedEffect>,
    pub skipped: Vec<Skipped>,
    pub warnings: Vec<String>,
}

struct Candidate {
    line: usize,
    request: EffectRequest,
    target: Option<u64>,
}

pub struct Processor<'a> {
    declaration: &'a SafeOutputDeclaration,
    context: &'a EventContext,
    patch: Option<PathBuf>,
}

impl<'a> Processor<'a> {
    pub fn new(declaration: &'a SafeOutputDeclaration, context: &'a EventContext) -> Self {
        Self {
            declaration,
            context,
            patch: None,
        }
    }

    /// Patch file used by create-pull-request
    pub fn with_patch(mut self, patch: impl Into<PathBuf>) -> Self {
        self.patch = Some(patch.into());
        self
    }

    fn kind(&self) -> EffectKind {
        self.declaration.kind
    }

    fn warn(&self, plan: &mut Plan, message: String) {
        if self.declaration.allowed_policy == AllowListPolicy::Warn {
            warn!("{}", message);
            plan.warnings.push(message);
        } else {
            debug!("{}", message);
        }
    }

    /// Run every check and return what would be applied
    pub fn plan(&self, contents: &LogContents) -> Plan {
        let mut plan = Plan::default();
        for error in &contents.errors {
            plan.warnings.push(error.to_string());
        }

        let mut candidates = Vec::new();
        for logged in contents.of_kind(self.kind()) {
            let line = logged.line;
            let mut request = logged.request.clone();
            let summary = request.summary();

            if let Err(err) = request.validate() {
                warn!("line {}: {}", line, err);
                plan.skipped.push(Skipped {
                    line,
                    summary,
                    reason: SkipReason::Invalid(err.to_string()),
                });
                continue;
            }
            if let Err(reason) = self.apply_allow_list(&mut request, line, &mut plan) {
                plan.skipped.push(Skipped { line, summary, reason });
                continue;
            }
            match self.resolve_target(&request) {
                Ok(target) => candidates.push(Candidate { line, request, target }),
                Err(reason) => plan.skipped.push(Skipped { line, summary, reason }),
            }
        }

        let max = self.declaration.max as usize;
        if candidates.len() > max {
            let dropped = candidates.split_off(max);
            let message = format!(
                "[E6003] {} requested {} times, max is {}; dropping {} request(s)",
                self.kind(),
                dropped.len() + max,
                max,
                dropped.len()
            );
            warn!("{}", message);
            plan.warnings.push(message);
            for candidate in dropped {
                plan.skipped.push(Skipped {
                    line: candidate.line,
                    summary: candidate.request.summary(),
                    reason: SkipReason::Truncated,
                });
            }
        }

        for (key, candidate) in self.dedup(candidates, &mut plan) {
            let summary = candidate.request.summary();
            match self.operation(&candidate, &key) {
                Ok(operation) => plan.effects.push(PlannedEffect {
                    line: candidate.line,
                    key,
                    summary,
                    operation,
                }),
                Err(reason) => plan.skipped.push(Skipped {
                    line: candidate.line,
                    summary,
                    reason,
                }),
            }
        }
        plan.skipped.sort_by_key(|skipped| skipped.line);
        plan
    }

    /// Report what would be applied without touching a backend
    pub fn preview(&self, contents: &LogContents) -> ApplyReport {
        let plan = self.plan(contents);
        let mut report = ApplyReport::new(self.kind(), true);
        report.skipped = plan.skipped;
        report.warnings = plan.warnings;
        for effect in plan.effects {
            info!("staged: would apply {}", effect.summary);
            report.previews.push(Preview {
                line: effect.line,
                summary: effect.summary,
                operation: effect.operation,
            });
        }
        report
    }

    /// Plan, then preview (staged) or apply
    pub fn run(&self, contents: &LogContents, backend: &dyn EffectBackend) -> ApplyReport {
        if self.declaration.staged {
            return self.preview(contents);
        }
        let plan = self.plan(contents);
        let mut report = ApplyReport::new(self.kind(), false);
        report.skipped = plan.skipped;
        report.warnings = plan.warnings;

        for effect in plan.effects {
            if carries_marker(&effect.operation) {
                match backend.find_marker(&effect.operation, &dedup_marker(&effect.key)) {
                    Ok(Some(existing)) => {
                        info!("{} was already applied", effect.summary);
                        report.skipped.push(Skipped {
                            line: effect.line,
                            summary: effect.summary,
                            reason: SkipReason::AlreadyApplied { url: existing.url },
                        });
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        report.failures.push(Failure {
                            line: effect.line,
                            summary: effect.summary,
                            error: err.to_string(),
                        });
                        continue;
                    }
                }
            }

            match backend.execute(&effect.operation) {
                Ok(applied) => {
                    info!("applied {}", applied.summary);
                    report.applied.push(applied);
                }
                Err(err) => {
                    warn!("failed to apply {}: {}", effect.summary, err);
                    report.failures.push(Failure {
                        line: effect.line,
                        summary: effect.summary,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    fn filter_allowed(&self, values: &mut Vec<String>, what: &str, line: usize, plan: &mut Plan) {
        let (kept, dropped): (Vec<String>, Vec<String>) = values
            .drain(..)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .partition(|value| self.declaration.allows(value));
        *values = kept;
        if !dropped.is_empty() {
            self.warn(
                plan,
                format!(
                    "[E6008] line {line}: {what} not in the allow-list dropped: {}",
                    dropped.join(", ")
                ),
            );
        }
    }

    fn apply_allow_list(
        &self,
        request: &mut EffectRequest,
        line: usize,
        plan: &mut Plan,
    ) -> Result<(), SkipReason> {
        match request {
            EffectRequest::CreateIssue { labels, .. } | EffectRequest::CreatePullRequest { labels, .. } => {
                self.filter_allowed(labels, "labels", line, plan);
            }
            EffectRequest::AddLabels { labels, .. } => {
                self.filter_allowed(labels, "labels", line, plan);
                if labels.is_empty() {
                    return Err(SkipReason::Disallowed("no allowed labels left".to_string()));
                }
            }
            EffectRequest::AssignToUser { assignees, .. } => {
                self.filter_allowed(assignees, "assignees", line, plan);
                if assignees.is_empty() {
                    return Err(SkipReason::Disallowed("no allowed assignees left".to_string()));
                }
            }
            EffectRequest::CreateDiscussion { category, .. } => {
                if let Some(requested) = category.clone() {
                    if !self.declaration.allows(&requested) {
                        *category = None;
                        self.warn(
                            plan,
                            format!("[E6008] line {line}: discussion category `{requested}` is not allowed"),
                        );
                    }
                }
            }
            EffectRequest::UpdateIssue {
                title, body, status, ..
            } => {
                let mut dropped = Vec::new();
                if title.is_some() && !self.declaration.allows("title") {
                    *title = None;
                    dropped.push("title");
                }
                if body.is_some() && !self.declaration.allows("body") {
                    *body = None;
                    dropped.push("body");
                }
                if status.is_some() && !self.declaration.allows("status") {
                    *status = None;
                    dropped.push("status");
                }
                if !dropped.is_empty() {
                    self.warn(
                        plan,
                        format!(
                            "[E6008] line {line}: fields not in the allow-list dropped: {}",
                            dropped.join(", ")
                        ),
                    );
                }
                if title.is_none() && body.is_none() && status.is_none() {
                    return Err(SkipReason::Disallowed("no allowed fields left".to_string()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn resolve_target(&self, request: &EffectRequest) -> Result<Option<u64>, SkipReason> {
        if !self.kind().is_targeted() {
            return Ok(None);
        }
        match self.declaration.target {
            Target::Triggering => {
                let Some(number) = self.context.event_number else {
                    return Err(SkipReason::NoTarget(format!(
                        "event `{}` has no triggering issue, pull request or discussion",
                        self.context.event_name.as_deref().unwrap_or("unknown")
                    )));
                };
                if let Some(requested) = request.item_number().filter(|n| *n != number) {
                    debug!(
                        "ignoring item_number {} in favour of triggering #{}",
                        requested, number
                    );
                }
                Ok(Some(number))
            }
            Target::Any => request.item_number().map(Some).ok_or_else(|| {
                SkipReason::NoTarget("target `*` requires `item_number`".to_string())
            }),
            Target::Number(number) => Ok(Some(number)),
        }
    }

    /// Keep the last request per key, in log order
    fn dedup(&self, candidates: Vec<Candidate>, plan: &mut Plan) -> Vec<(String, Candidate)> {
        let keyed: Vec<(String, Candidate)> = candidates
            .into_iter()
            .map(|candidate| (candidate.request.dedup_key(candidate.target), candidate))
            .collect();

        let mut last: HashMap<&str, usize> = HashMap::new();
        for (index, (key, _)) in keyed.iter().enumerate() {
            last.insert(key.as_str(), index);
        }
        let survivors: Vec<usize> = {
            let mut indices: Vec<usize> = last.values().copied().collect();
            indices.sort_unstable();
            indices
        };

        let mut skipped = Vec::new();
        for (index, (key, candidate)) in keyed.iter().enumerate() {
            let winner = last[key.as_str()];
            if winner == index {
                continue;
            }
            let winner_line = keyed[winner].1.line;
            let reason = if keyed[winner].1.request == candidate.request {
                SkipReason::Duplicate { of_line: winner_line }
            } else {
                SkipReason::Superseded { by_line: winner_line }
            };
            skipped.push(Skipped {
                line: candidate.line,
                summary: candidate.request.summary(),
                reason,
            });
        }
        plan.skipped.extend(skipped);

        let mut keyed: Vec<Option<(String, Candidate)>> = keyed.into_iter().map(Some).collect();
        survivors
            .into_iter()
            .filter_map(|index| keyed[index].take())
            .collect()
    }

    fn title(&self, title: &str) -> String {
        let title = title.trim();
        match &self.declaration.title_prefix {
            Some(prefix) if !title.starts_with(prefix.as_str()) => format!("{prefix}{title}"),
            _ => title.to_string(),
        }
    }

    fn labels(&self, requested: &[String]) -> Vec<String> {
        let mut labels: Vec<String> = self.declaration.labels.clone();
        for label in requested {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        labels
    }

    fn with_marker(body: &str, key: &str) -> String {
        format!("{}\n\n{}", body.trim_end(), dedup_marker(key))
    }

    fn related_footer(&self) -> String {
        let related: Vec<String> = self
            .context
            .created
            .iter()
            .map(|(kind, number)| match kind {
                EffectKind::CreateDiscussion => format!("discussion #{number}"),
                EffectKind::CreatePullRequest => format!("pull request #{number}"),
                _ => format!("issue #{number}"),
            })
            .collect();
        if related.is_empty() {
            String::new()
        } else {
            format!("\n\nRelated: {}", related.join(", "))
        }
    }

    fn operation(&self, candidate: &Candidate, key: &str) -> Result<Operation, SkipReason> {
        let target = candidate.target.unwrap_or_default();
        let operation = match &candidate.request {
            EffectRequest::CreateIssue { title, body, labels } => Operation::CreateIssue {
                title: self.title(title),
                body: Self::with_marker(body, key),
                labels: self.labels(labels),
            },
            EffectRequest::CreateDiscussion { title, body, category } => Operation::CreateDiscussion {
                title: self.title(title),
                body: Self::with_marker(body, key),
                category: category.clone().or_else(|| self.declaration.category.clone()),
            },
            EffectRequest::CreatePullRequest {
                title,
                body,
                branch,
                labels,
            } => {
                let patch = self.checked_patch()?;
                Operation::CreatePullRequest {
                    title: self.title(title),
                    body: Self::with_marker(body, key),
                    branch: branch
                        .clone()
                        .filter(|b| !b.trim().is_empty())
                        .unwrap_or_else(|| branch_name(title, key)),
                    labels: self.labels(labels),
                    draft: self.declaration.draft.unwrap_or(true),
                    patch: Some(patch),
                }
            }
            EffectRequest::AddComment { body, .. } => Operation::AddComment {
                number: target,
                body: Self::with_marker(&format!("{}{}", body.trim_end(), self.related_footer()), key),
            },
            EffectRequest::AddLabels { labels, .. } => Operation::AddLabels {
                number: target,
                labels: labels.clone(),
            },
            EffectRequest::UpdateIssue {
                title, body, status, ..
            } => Operation::UpdateIssue {
                number: target,
                title: title.clone(),
                body: body.clone(),
                state: *status,
            },
            EffectRequest::AssignToUser { assignees, .. } => Operation::AssignToUser {
                number: target,
                assignees: assignees.clone(),
            },
            EffectRequest::CloseIssue { body, .. } => Operation::CloseIssue {
                number: target,
                comment: body
                    .as_deref()
                    .filter(|b| !b.trim().is_empty())
                    .map(|b| Self::with_marker(b, key)),
            },
            EffectRequest::CreatePullRequestReviewComment {
                path,
                line,
                start_line,
                side,
                body,
                ..
            } => Operation::CreateReviewComment {
                number: target,
                path: path.clone(),
                line: *line,
                start_line: *start_line,
                side: side.unwrap_or(ReviewSide::Right),
                body: Self::with_marker(body, key),
            },
            EffectRequest::MissingTool {
                tool,
                reason,
                alternatives,
            } => Operation::ReportMissingTool {
                tool: tool.clone(),
                reason: reason.clone(),
                alternatives: alternatives.clone(),
            },
        };
        Ok(operation)
    }

    fn checked_patch(&self) -> Result<PathBuf, SkipReason> {
        let Some(path) = &self.patch else {
            return Err(SkipReason::MissingPatch("no patch file configured".to_string()));
        };
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(SkipReason::MissingPatch(format!(
                "{} is missing or empty",
                path.display()
            )));
        }
        if let Some(limit) = self.declaration.max_patch_size_kb {
            let kb = size.div_ceil(1024);
            if kb > u64::from(limit) {
                return Err(SkipReason::MissingPatch(format!(
                    "patch is {kb} KB, limit is {limit} KB"
                )));
            }
        }
        Ok(path.clone())
    }
}

fn carries_marker(operation: &Operation) -> bool {
    matches!(
        operation,
        Operation::CreateIssue { .. }
            | Operation::CreateDiscussion { .. }
            | Operation::CreatePullRequest { .. }
            | Operation::AddComment { .. }
            | Operation::CloseIssue { comment: Some(_), .. }
            | Operation::CreateReviewComment { .. }
    )
}

/// `aw/<slug>-<hash>`, stable for a given title and key
pub fn branch_name(title: &str, key: &str) -> String {
    let slug: String = title
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug: Vec<&str> = slug.split('-').filter(|part| !part.is_empty()).collect();
    let slug = slug.join("-");
    let slug: String = slug.chars().take(40).collect();
    let hash = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("aw/{}-{}", slug.trim_end_matches('-'), &hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safe_outputs::log::LoggedRequest;
    use crate::testing::RecordingBackend;

    fn contents(lines: &[&str]) -> LogContents {
        let mut contents = LogContents::default();
        for (index, line) in lines.iter().enumerate() {
            match EffectRequest::parse_line(index + 1, line) {
                Ok(request) => contents.records.push(LoggedRequest {
                    line: index + 1,
                    request,
                }),
                Err(err) => contents.errors.push(err),
            }
        }
        contents
    }

    fn declaration(kind: EffectKind) -> SafeOutputDeclaration {
        SafeOutputDeclaration::new(kind)
    }

    #[test]
    fn test_quota_keeps_first_in_log_order() {
        let mut decl = declaration(EffectKind::CreateIssue);
        decl.max = 2;
        let context = EventContext::default();
        let log = contents(&[
            r#"{"type":"create-issue","title":"one","body":"b"}"#,
            r#"{"type":"create-issue","title":"two","body":"b"}"#,
            r#"{"type":"create-issue","title":"three","body":"b"}"#,
        ]);
        let plan = Processor::new(&decl, &context).plan(&log);
        assert_eq!(plan.effects.len(), 2);
        assert_eq!(plan.effects[0].line, 1);
        assert_eq!(plan.effects[1].line, 2);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].reason, SkipReason::Truncated);
        assert!(plan.warnings.iter().any(|w| w.starts_with("[E6003]")));
    }

    #[test]
    fn test_dedup_last_wins() {
        let mut decl = declaration(EffectKind::CreateIssue);
        decl.max = 5;
        let context = EventContext::default();
        let log = contents(&[
            r#"{"type":"create-issue","title":"Flaky","body":"first draft"}"#,
            r#"{"type":"create-issue","title":"Other","body":"b"}"#,
            r#"{"type":"create-issue","title":"Flaky","body":"final"}"#,
            r#"{"type":"create-issue","title":"Other","body":"b"}"#,
        ]);
        let plan = Processor::new(&decl, &context).plan(&log);
        let lines: Vec<usize> = plan.effects.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert_eq!(plan.skipped[0].reason, SkipReason::Superseded { by_line: 3 });
        assert_eq!(plan.skipped[1].reason, SkipReason::Duplicate { of_line: 4 });
    }

    #[test]
    fn test_allow_list_drops_values() {
        let mut decl = declaration(EffectKind::AddLabels);
        decl.allowed = vec!["bug".into(), "triage".into()];
        decl.max = 3;
        let context = EventContext {
            event_number: Some(9),
            ..Default::default()
        };
        let log = contents(&[
            r#"{"type":"add-labels","labels":["bug","critical"]}"#,
            r#"{"type":"add-labels","labels":["critical"]}"#,
        ]);
        let plan = Processor::new(&decl, &context).plan(&log);
        assert_eq!(
            plan.effects[0].operation,
            Operation::AddLabels {
                number: 9,
                labels: vec!["bug".into()]
            }
        );
        assert!(matches!(plan.skipped[0].reason, SkipReason::Disallowed(_)));
        assert_eq!(plan.warnings.len(), 2);

        decl.allowed_policy = AllowListPolicy::Silent;
        let plan = Processor::new(&decl, &context).plan(&log);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_target_resolution() {
        let mut decl = declaration(EffectKind::AddComment);
        let context = EventContext::default();
        let log = contents(&[r#"{"type":"add-comment","body":"hello","item_number":5}"#]);

        let plan = Processor::new(&decl, &context).plan(&log);
        assert!(matches!(plan.skipped[0].reason, SkipReason::NoTarget(_)));

        decl.target = Target::Any;
        let plan = Processor::new(&decl, &context).plan(&log);
        assert_eq!(plan.effects[0].operation.number(), Some(5));

        decl.target = Target::Number(77);
        let plan = Processor::new(&decl, &context).plan(&log);
        assert_eq!(plan.effects[0].operation.number(), Some(77));
    }

    #[test]
    fn test_staged_run_touches_nothing() {
        let mut decl = declaration(EffectKind::CreateIssue);
        decl.staged = true;
        let context = EventContext::default();
        let backend = RecordingBackend::new();
        let log = contents(&[r#"{"type":"create-issue","title":"t","body":"b"}"#]);

        let report = Processor::new(&decl, &context).run(&log, &backend);
        assert_eq!(report.previews.len(), 1);
        assert!(report.applied.is_empty());
        assert!(backend.operations().is_empty());
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let mut decl = declaration(EffectKind::CreateIssue);
        decl.title_prefix = Some("[bot] ".into());
        decl.labels = vec!["automation".into()];
        let context = EventContext::default();
        let backend = RecordingBackend::new();
        let log = contents(&[r#"{"type":"create-issue","title":"Flaky","body":"b","labels":["ci"]}"#]);
        let processor = Processor::new(&decl, &context);

        let first = processor.run(&log, &backend);
        assert_eq!(first.applied.len(), 1);
        match &backend.operations()[0] {
            Operation::CreateIssue { title, body, labels } => {
                assert_eq!(title, "[bot] Flaky");
                assert!(body.contains("<!-- aw-dedup:"));
                assert_eq!(labels, &vec!["automation".to_string(), "ci".to_string()]);
            }
            other => panic!("unexpected operation {other:?}"),
        }

        let second = processor.run(&log, &backend);
        assert!(second.applied.is_empty());
        assert!(matches!(second.skipped[0].reason, SkipReason::AlreadyApplied { .. }));
        assert_eq!(backend.operations().len(), 1);
    }

    #[test]
    fn test_pull_request_requires_patch() {
        let decl = declaration(EffectKind::CreatePullRequest);
        let context = EventContext::default();
        let dir = tempfile::TempDir::new().unwrap();
        let patch = dir.path().join("aw.patch");
        let log = contents(&[r#"{"type":"create-pull-request","title":"Fix typo","body":"b"}"#]);

        let plan = Processor::new(&decl, &context).with_patch(&patch).plan(&log);
        assert!(matches!(plan.skipped[0].reason, SkipReason::MissingPatch(_)));

        std::fs::write(&patch, "diff --git a/x b/x\n").unwrap();
        let plan = Processor::new(&decl, &context).with_patch(&patch).plan(&log);
        match &plan.effects[0].operation {
            Operation::CreatePullRequest { branch, draft, .. } => {
                assert!(branch.starts_with("aw/fix-typo-"));
                assert!(*draft);
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_branch_name_is_stable() {
        assert_eq!(branch_name("Fix: the  typo!", "k"), branch_name("Fix: the  typo!", "k"));
        assert!(branch_name("Fix: the  typo!", "k").starts_with("aw/fix-the-typo-"));
    }
}
