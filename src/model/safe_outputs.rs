//! Safe-output declarations
//!
//! The untrusted agent job can only *request* side effects. Each effect
//! kind it may request is declared here together with its policy; the
//! compiler emits one privileged job per declaration and the runtime
//! enforces the same policy when applying requests.

use super::permissions::{PermissionLevel, PermissionScope, Permissions};
use super::validation::Collector;
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MAX_PATCH_SIZE_KB: u32 = 1024;

/// The closed set of privileged actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKind {
    CreateIssue,
    CreateDiscussion,
    CreatePullRequest,
    AddComment,
    AddLabels,
    UpdateIssue,
    AssignToUser,
    CloseIssue,
    CreatePullRequestReviewComment,
    MissingTool,
}

impl EffectKind {
    pub const ALL: [EffectKind; 10] = [
        Self::CreateIssue,
        Self::CreateDiscussion,
        Self::CreatePullRequest,
        Self::AddComment,
        Self::AddLabels,
        Self::UpdateIssue,
        Self::AssignToUser,
        Self::CloseIssue,
        Self::CreatePullRequestReviewComment,
        Self::MissingTool,
    ];

    /// Configuration key and record `type`, e.g. `create-issue`
    pub fn key(&self) -> &'static str {
        match self {
            Self::CreateIssue => "create-issue",
            Self::CreateDiscussion => "create-discussion",
            Self::CreatePullRequest => "create-pull-request",
            Self::AddComment => "add-comment",
            Self::AddLabels => "add-labels",
            Self::UpdateIssue => "update-issue",
            Self::AssignToUser => "assign-to-user",
            Self::CloseIssue => "close-issue",
            Self::CreatePullRequestReviewComment => "create-pull-request-review-comment",
            Self::MissingTool => "missing-tool",
        }
    }

    /// Name of the effect job that applies this kind
    pub fn job_name(&self) -> &'static str {
        match self {
            Self::CreateIssue => "create_issue",
            Self::CreateDiscussion => "create_discussion",
            Self::CreatePullRequest => "create_pull_request",
            Self::AddComment => "add_comment",
            Self::AddLabels => "add_labels",
            Self::UpdateIssue => "update_issue",
            Self::AssignToUser => "assign_to_user",
            Self::CloseIssue => "close_issue",
            Self::CreatePullRequestReviewComment => "create_pr_review_comment",
            Self::MissingTool => "missing_tool",
        }
    }

    /// Mediator tool the agent calls for this kind, e.g. `create_issue`
    pub fn tool_name(&self) -> String {
        self.key().replace('-', "_")
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateIssue => "Create a new issue",
            Self::CreateDiscussion => "Start a new discussion",
            Self::CreatePullRequest => "Open a pull request with the changes in the working tree",
            Self::AddComment => "Comment on an issue, pull request or discussion",
            Self::AddLabels => "Add labels to an issue or pull request",
            Self::UpdateIssue => "Update the title, body or status of an issue",
            Self::AssignToUser => "Assign users to an issue or pull request",
            Self::CloseIssue => "Close an issue with a comment",
            Self::CreatePullRequestReviewComment => "Comment on a line of a pull request diff",
            Self::MissingTool => "Report a tool or permission the task needed but did not have",
        }
    }

    pub fn keys() -> Vec<&'static str> {
        Self::ALL.iter().map(Self::key).collect()
    }

    /// Parse a key, accepting `_` in place of `-`
    pub fn from_key(key: &str) -> Option<Self> {
        let normalized = key.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.iter().copied().find(|kind| kind.key() == normalized)
    }

    /// Exactly the grants the effect job needs
    pub fn permissions(&self) -> Permissions {
        use PermissionLevel::{Read, Write};
        use PermissionScope::*;

        match self {
            Self::CreateIssue => Permissions::new().with(Contents, Read).with(Issues, Write),
            Self::CreateDiscussion => Permissions::new().with(Contents, Read).with(Discussions, Write),
            Self::CreatePullRequest => Permissions::new()
                .with(Contents, Write)
                .with(Issues, Write)
                .with(PullRequests, Write),
            Self::AddComment => Permissions::new()
                .with(Contents, Read)
                .with(Issues, Write)
                .with(PullRequests, Write)
                .with(Discussions, Write),
            Self::AddLabels => Permissions::new()
                .with(Contents, Read)
                .with(Issues, Write)
                .with(PullRequests, Write),
            Self::UpdateIssue | Self::CloseIssue => {
                Permissions::new().with(Contents, Read).with(Issues, Write)
            }
            Self::AssignToUser => Permissions::new()
                .with(Contents, Read)
                .with(Issues, Write)
                .with(PullRequests, Write),
            Self::CreatePullRequestReviewComment => {
                Permissions::new().with(Contents, Read).with(PullRequests, Write)
            }
            Self::MissingTool => Permissions::new().with(Contents, Read),
        }
    }

    pub fn default_max(&self) -> u32 {
        match self {
            Self::AddLabels => 3,
            Self::CreatePullRequestReviewComment => 10,
            Self::MissingTool => 20,
            _ => 1,
        }
    }

    /// What an `allowed` list restricts for this kind, if anything
    pub fn allow_list_subject(&self) -> Option<&'static str> {
        match self {
            Self::CreateIssue | Self::CreatePullRequest | Self::AddLabels => Some("labels"),
            Self::AssignToUser => Some("assignees"),
            Self::CreateDiscussion => Some("categories"),
            Self::UpdateIssue => Some("fields"),
            _ => None,
        }
    }

    /// Whether the kind acts on an existing issue, pull request or discussion
    pub fn is_targeted(&self) -> bool {
        matches!(
            self,
            Self::AddComment
                | Self::AddLabels
                | Self::UpdateIssue
                | Self::AssignToUser
                | Self::CloseIssue
                | Self::CreatePullRequestReviewComment
        )
    }

    /// Whether the kind creates a new entity other jobs can refer to
    pub fn creates_entity(&self) -> bool {
        matches!(
            self,
            Self::CreateIssue | Self::CreateDiscussion | Self::CreatePullRequest
        )
    }

    /// Outputs published by the effect job
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::CreateIssue => &["issue_number", "issue_url"],
            Self::CreateDiscussion => &["discussion_number", "discussion_url"],
            Self::CreatePullRequest => &["pull_request_number", "pull_request_url", "branch_name"],
            Self::AddComment => &["comment_id", "comment_url"],
            Self::AddLabels => &["labels_added"],
            Self::UpdateIssue | Self::CloseIssue => &["issue_number"],
            Self::AssignToUser => &["assigned"],
            Self::CreatePullRequestReviewComment => &["review_comment_id"],
            Self::MissingTool => &["tools_reported"],
        }
    }

    /// Settings accepted under this kind besides the common ones
    fn extra_keys(&self) -> &'static [&'static str] {
        match self {
            Self::CreateIssue => &["title-prefix", "labels"],
            Self::CreatePullRequest => &["title-prefix", "labels", "draft"],
            Self::CreateDiscussion => &["title-prefix", "category"],
            _ => &[],
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for EffectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| format!("unknown safe-output kind `{s}`"))
    }
}

/// Which entity a targeted effect may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Target {
    /// The issue, pull request or discussion that triggered the run
    #[default]
    Triggering,
    /// Any entity; each request names its own
    Any,
    /// One fixed entity
    Number(u64),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triggering => f.write_str("triggering"),
            Self::Any => f.write_str("*"),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "triggering" => Ok(Self::Triggering),
            "*" => Ok(Self::Any),
            other => match other.parse::<u64>() {
                Ok(number) if number > 0 => Ok(Self::Number(number)),
                _ => Err(format!(
                    "invalid target `{other}` (expected `triggering`, `*` or a positive number)"
                )),
            },
        }
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

impl TryFrom<String> for Target {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What happens to sub-values outside an allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowListPolicy {
    /// Drop the value and record a warning
    #[default]
    Warn,
    /// Drop the value quietly
    Silent,
}

/// Policy for one effect kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SafeOutputDeclaration {
    pub kind: EffectKind,
    pub max: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub allowed_policy: AllowListPolicy,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub staged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_prefix: Option<String>,
    /// Labels always applied to created entities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_patch_size_kb: Option<u32>,
    /// Token expression for the effect job; never handed to the runtime config
    #[serde(skip)]
    pub github_token: Option<String>,
}

impl SafeOutputDeclaration {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            max: kind.default_max(),
            allowed: Vec::new(),
            allowed_policy: AllowListPolicy::default(),
            target: Target::default(),
            staged: false,
            title_prefix: None,
            labels: Vec::new(),
            draft: None,
            category: None,
            max_patch_size_kb: None,
            github_token: None,
        }
    }

    /// Whether `value` passes the allow-list (an empty list allows everything)
    pub fn allows(&self, value: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|allowed| allowed == value)
    }
}

/// Threat-detection settings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThreatDetection {
    /// Extra instructions appended to the built-in analysis prompt
    pub prompt: Option<String>,
    /// Additional steps run after the analysis
    pub steps: Vec<Value>,
}

/// Every declaration plus settings shared by all effect jobs
#[derive(Debug, Clone, PartialEq)]
pub struct SafeOutputsConfig {
    /// Ordered by [`EffectKind`]
    pub declarations: Vec<SafeOutputDeclaration>,
    pub staged: bool,
    pub github_token: Option<String>,
    pub runs_on: Option<String>,
    pub env: BTreeMap<String, String>,
    pub max_patch_size_kb: u32,
    pub threat_detection: Option<ThreatDetection>,
}

impl SafeOutputsConfig {
    pub fn declaration(&self, kind: EffectKind) -> Option<&SafeOutputDeclaration> {
        self.declarations.iter().find(|declaration| declaration.kind == kind)
    }

    pub fn is_declared(&self, kind: EffectKind) -> bool {
        self.declaration(kind).is_some()
    }

    pub fn kinds(&self) -> impl Iterator<Item = EffectKind> + '_ {
        self.declarations.iter().map(|declaration| declaration.kind)
    }

    /// Staged if either the run or the declaration says so
    pub fn is_staged(&self, declaration: &SafeOutputDeclaration) -> bool {
        self.staged || declaration.staged
    }

    /// Token expression used by the effect job for `declaration`
    pub fn token_for<'b>(&'b self, declaration: &'b SafeOutputDeclaration) -> Option<&'b str> {
        declaration
            .github_token
            .as_deref()
            .or(self.github_token.as_deref())
    }

    /// Declaration as handed to the runtime, with run-level settings folded in
    pub fn runtime_declaration(&self, declaration: &SafeOutputDeclaration) -> SafeOutputDeclaration {
        let mut effective = declaration.clone();
        effective.staged = self.is_staged(declaration);
        if declaration.kind == EffectKind::CreatePullRequest {
            effective.max_patch_size_kb = Some(self.max_patch_size_kb);
        }
        effective
    }
}

const GLOBAL_KEYS: &[&str] = &[
    "staged",
    "github-token",
    "runs-on",
    "env",
    "max-patch-size",
    "threat-detection",
];

const COMMON_KEYS: &[&str] = &["max", "allowed", "allowed-policy", "target", "staged", "github-token"];

const UPDATABLE_FIELDS: &[&str] = &["status", "title", "body"];

/// Parse the `safe-outputs` block and the threat-detection setting.
/// Returns `None` when no effect kind is declared.
pub fn parse(
    value: Option<&Value>,
    threat_detection: Option<&Value>,
    errors: &mut Collector,
) -> Option<SafeOutputsConfig> {
    let value = value?;
    let empty = Mapping::new();
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => &empty,
        _ => {
            errors.push(
                ErrorCode::VALIDATION_INVALID_VALUE,
                "safe-outputs",
                "safe-outputs must be a mapping of effect kinds",
            );
            return None;
        }
    };

    let mut config = SafeOutputsConfig {
        declarations: Vec::new(),
        staged: false,
        github_token: None,
        runs_on: None,
        env: BTreeMap::new(),
        max_patch_size_kb: DEFAULT_MAX_PATCH_SIZE_KB,
        threat_detection: None,
    };
    let mut nested_detection = None;

    for (key, entry) in mapping {
        let Some(key) = key.as_str() else {
            errors.push(ErrorCode::VALIDATION_INVALID_VALUE, "safe-outputs", "keys must be strings");
            continue;
        };
        let path = format!("safe-outputs.{key}");

        match key {
            "staged" => config.staged = bool_value(entry, &path, errors),
            "github-token" => config.github_token = string_value(entry, &path, errors),
            "runs-on" => config.runs_on = string_value(entry, &path, errors),
            "env" => config.env = string_map(entry, &path, errors),
            "max-patch-size" => {
                if let Some(size) = positive_int(entry, &path, errors) {
                    config.max_patch_size_kb = size;
                }
            }
            "threat-detection" => nested_detection = Some(entry),
            _ => match EffectKind::from_key(key) {
                Some(kind) => {
                    if config.is_declared(kind) {
                        errors.push(
                            ErrorCode::VALIDATION_INVALID_VALUE,
                            path,
                            format!("`{}` is declared more than once", kind.key()),
                        );
                        continue;
                    }
                    if let Some(declaration) = parse_declaration(kind, entry, &path, errors) {
                        config.declarations.push(declaration);
                    }
                }
                None => {
                    let mut candidates = EffectKind::keys();
                    candidates.extend_from_slice(GLOBAL_KEYS);
                    errors.push_unknown(
                        ErrorCode::VALIDATION_UNKNOWN_EFFECT_KIND,
                        path,
                        format!("unknown safe-output kind `{key}`"),
                        key,
                        &candidates,
                    );
                }
            },
        }
    }

    if config.declarations.is_empty() {
        return None;
    }
    config.declarations.sort_by_key(|declaration| declaration.kind);
    config.threat_detection = parse_threat_detection(threat_detection.or(nested_detection), errors);
    Some(config)
}

fn parse_declaration(
    kind: EffectKind,
    value: &Value,
    path: &str,
    errors: &mut Collector,
) -> Option<SafeOutputDeclaration> {
    let mut declaration = SafeOutputDeclaration::new(kind);
    let mapping = match value {
        Value::Null | Value::Bool(true) => return Some(declaration),
        Value::Bool(false) => return None,
        Value::Mapping(mapping) => mapping,
        _ => {
            errors.push(
                ErrorCode::VALIDATION_INVALID_VALUE,
                path,
                format!("`{}` must be a mapping, `true` or empty", kind.key()),
            );
            return None;
        }
    };

    for (key, entry) in mapping {
        let Some(key) = key.as_str() else {
            errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "keys must be strings");
            continue;
        };
        let entry_path = format!("{path}.{key}");

        match key {
            "max" => {
                if let Some(max) = positive_int(entry, &entry_path, errors) {
                    declaration.max = max;
                }
            }
            "allowed" => declaration.allowed = string_list(entry, &entry_path, errors),
            "allowed-policy" => match entry.as_str().map(str::to_ascii_lowercase).as_deref() {
                Some("warn") => declaration.allowed_policy = AllowListPolicy::Warn,
                Some("silent") => declaration.allowed_policy = AllowListPolicy::Silent,
                _ => errors.push(
                    ErrorCode::VALIDATION_INVALID_VALUE,
                    entry_path,
                    "allowed-policy must be `warn` or `silent`",
                ),
            },
            "target" => {
                let raw = match entry {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                match raw.map(|raw| raw.parse::<Target>()) {
                    Some(Ok(target)) => declaration.target = target,
                    Some(Err(message)) => errors.push(ErrorCode::VALIDATION_INVALID_VALUE, entry_path, message),
                    None => errors.push(
                        ErrorCode::VALIDATION_INVALID_VALUE,
                        entry_path,
                        "target must be `triggering`, `*` or a number",
                    ),
                }
            }
            "staged" => declaration.staged = bool_value(entry, &entry_path, errors),
            "github-token" => declaration.github_token = string_value(entry, &entry_path, errors),
            "title-prefix" if kind.extra_keys().contains(&key) => {
                declaration.title_prefix = string_value(entry, &entry_path, errors)
            }
            "labels" if kind.extra_keys().contains(&key) => {
                declaration.labels = string_list(entry, &entry_path, errors)
            }
            "draft" if kind.extra_keys().contains(&key) => {
                declaration.draft = Some(bool_value(entry, &entry_path, errors))
            }
            "category" if kind.extra_keys().contains(&key) => {
                declaration.category = string_value(entry, &entry_path, errors)
            }
            _ => {
                let mut candidates: Vec<&str> = COMMON_KEYS.to_vec();
                candidates.extend_from_slice(kind.extra_keys());
                errors.push_unknown(
                    ErrorCode::VALIDATION_UNKNOWN_KEY,
                    entry_path,
                    format!("unknown setting `{key}` for `{}`", kind.key()),
                    key,
                    &candidates,
                );
            }
        }
    }

    if !declaration.allowed.is_empty() {
        match kind.allow_list_subject() {
            None => errors.push(
                ErrorCode::VALIDATION_INVALID_VALUE,
                format!("{path}.allowed"),
                format!("`{}` does not support an allow-list", kind.key()),
            ),
            Some("fields") => {
                for field in &declaration.allowed {
                    if !UPDATABLE_FIELDS.contains(&field.as_str()) {
                        errors.push_unknown(
                            ErrorCode::VALIDATION_INVALID_VALUE,
                            format!("{path}.allowed"),
                            format!("`{field}` is not an updatable field (status, title, body)"),
                            field,
                            UPDATABLE_FIELDS,
                        );
                    }
                }
            }
            Some(_) => {}
        }
    }

    if declaration.target != Target::Triggering && !kind.is_targeted() {
        errors.push(
            ErrorCode::VALIDATION_INVALID_VALUE,
            format!("{path}.target"),
            format!("`{}` creates new entities and does not take a target", kind.key()),
        );
    }

    if kind == EffectKind::CreatePullRequest && declaration.max > 1 {
        errors.push(
            ErrorCode::VALIDATION_INVALID_VALUE,
            format!("{path}.max"),
            "create-pull-request opens at most one pull request per run",
        );
    }

    Some(declaration)
}

/// `None` when detection is disabled
fn parse_threat_detection(value: Option<&Value>, errors: &mut Collector) -> Option<ThreatDetection> {
    let path = "threat-detection";
    match value {
        None | Some(Value::Null) | Some(Value::Bool(true)) => Some(ThreatDetection::default()),
        Some(Value::Bool(false)) => None,
        Some(Value::Mapping(mapping)) => {
            let mut detection = ThreatDetection::default();
            let mut enabled = true;
            for (key, entry) in mapping {
                let key = key.as_str().unwrap_or_default();
                let entry_path = format!("{path}.{key}");
                match key {
                    "enabled" => enabled = bool_value(entry, &entry_path, errors),
                    "prompt" => detection.prompt = string_value(entry, &entry_path, errors),
                    "steps" => match entry {
                        Value::Sequence(steps) => detection.steps = steps.clone(),
                        _ => errors.push(ErrorCode::VALIDATION_INVALID_VALUE, entry_path, "steps must be a list"),
                    },
                    other => errors.push_unknown(
                        ErrorCode::VALIDATION_UNKNOWN_KEY,
                        entry_path,
                        format!("unknown threat-detection setting `{other}`"),
                        other,
                        &["enabled", "prompt", "steps"],
                    ),
                }
            }
            enabled.then_some(detection)
        }
        Some(_) => {
            errors.push(
                ErrorCode::VALIDATION_INVALID_VALUE,
                path,
                "threat-detection must be a boolean or a mapping",
            );
            None
        }
    }
}

pub(crate) fn bool_value(value: &Value, path: &str, errors: &mut Collector) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Null => true,
        _ => {
            errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "expected a boolean");
            false
        }
    }
}

pub(crate) fn string_value(value: &Value, path: &str, errors: &mut Collector) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => {
            errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "expected a string");
            None
        }
    }
}

pub(crate) fn string_list(value: &Value, path: &str, errors: &mut Collector) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(single) => vec![single.clone()],
        Value::Sequence(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => {
                    errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "list entries must be strings");
                    None
                }
            })
            .collect(),
        _ => {
            errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "expected a list of strings");
            Vec::new()
        }
    }
}

pub(crate) fn string_map(value: &Value, path: &str, errors: &mut Collector) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Value::Null => {}
        Value::Mapping(mapping) => {
            for (key, entry) in mapping {
                let Some(key) = key.as_str() else {
                    errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "keys must be strings");
                    continue;
                };
                if let Some(entry) = string_value(entry, &format!("{path}.{key}"), errors) {
                    out.insert(key.to_string(), entry);
                }
            }
        }
        _ => errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "expected a mapping"),
    }
    out
}

pub(crate) fn positive_int(value: &Value, path: &str, errors: &mut Collector) -> Option<u32> {
    match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
        Some(n) if n > 0 => Some(n),
        _ => {
            errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "expected a positive integer");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_yaml(yaml: &str) -> (Option<SafeOutputsConfig>, Collector) {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let mut errors = Collector::new();
        let config = parse(Some(&value), None, &mut errors);
        (config, errors)
    }

    #[test]
    fn test_effect_kind_keys_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(EffectKind::from_key("create_issue"), Some(EffectKind::CreateIssue));
        assert_eq!(EffectKind::from_key("deploy"), None);
    }

    #[test]
    fn test_effect_permissions_hold_one_write_family() {
        let permissions = EffectKind::CreateIssue.permissions();
        assert_eq!(permissions.writes().collect::<Vec<_>>(), vec![PermissionScope::Issues]);
        assert!(!EffectKind::MissingTool.permissions().has_write());
    }

    #[test]
    fn test_defaults_for_bare_declaration() {
        let (config, errors) = parse_yaml("create-issue:\nadd-labels: true\n");
        assert!(errors.is_empty());
        let config = config.unwrap();
        assert_eq!(config.declarations.len(), 2);
        assert_eq!(config.declaration(EffectKind::CreateIssue).unwrap().max, 1);
        assert_eq!(config.declaration(EffectKind::AddLabels).unwrap().max, 3);
        assert!(config.threat_detection.is_some());
        assert_eq!(config.max_patch_size_kb, DEFAULT_MAX_PATCH_SIZE_KB);
    }

    #[test]
    fn test_full_declaration() {
        let (config, errors) = parse_yaml(
            r#"
staged: true
add-labels:
  max: 5
  allowed: [bug, enhancement]
  allowed-policy: silent
  target: "*"
create-issue:
  title-prefix: "[bot] "
  labels: [automation]
threat-detection: false
"#,
        );
        assert!(errors.is_empty(), "{errors:?}");
        let config = config.unwrap();
        assert!(config.staged);
        assert!(config.threat_detection.is_none());

        // sorted by kind, not by declaration order
        assert_eq!(config.declarations[0].kind, EffectKind::CreateIssue);
        let labels = config.declaration(EffectKind::AddLabels).unwrap();
        assert_eq!(labels.max, 5);
        assert_eq!(labels.allowed, vec!["bug", "enhancement"]);
        assert_eq!(labels.allowed_policy, AllowListPolicy::Silent);
        assert_eq!(labels.target, Target::Any);
        assert!(config.is_staged(labels));
    }

    #[test]
    fn test_unknown_kind_suggests() {
        let (_, errors) = parse_yaml("create-isue:\n");
        let errors = errors.finish(()).unwrap_err();
        let error = errors.with_code(ErrorCode::VALIDATION_UNKNOWN_EFFECT_KIND).next().unwrap();
        assert_eq!(error.suggestion.as_deref(), Some("create-issue"));
    }

    #[test]
    fn test_invalid_settings_collected() {
        let (_, errors) = parse_yaml(
            "create-issue:\n  max: 0\n  target: 12\nadd-comment:\n  allowed: [x]\nupdate-issue:\n  allowed: [assignee]\ncreate-pull-request:\n  max: 2\n",
        );
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_empty_block_declares_nothing() {
        let (config, errors) = parse_yaml("staged: true\n");
        assert!(errors.is_empty());
        assert!(config.is_none());
    }

    #[test]
    fn test_threat_detection_object() {
        let value: Value = serde_yaml::from_str("create-issue:\n").unwrap();
        let detection: Value = serde_yaml::from_str("prompt: check for exfiltration\nsteps:\n  - run: echo scan\n").unwrap();
        let mut errors = Collector::new();
        let config = parse(Some(&value), Some(&detection), &mut errors).unwrap();
        let detection = config.threat_detection.unwrap();
        assert_eq!(detection.prompt.as_deref(), Some("check for exfiltration"));
        assert_eq!(detection.steps.len(), 1);
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("triggering".parse::<Target>(), Ok(Target::Triggering));
        assert_eq!("*".parse::<Target>(), Ok(Target::Any));
        assert_eq!("42".parse::<Target>(), Ok(Target::Number(42)));
        assert!("0".parse::<Target>().is_err());
        assert!("issue".parse::<Target>().is_err());
    }

    #[test]
    fn test_runtime_declaration_folds_run_settings() {
        let (config, _) = parse_yaml("staged: true\nmax-patch-size: 256\ncreate-pull-request:\n");
        let config = config.unwrap();
        let declaration = config.declaration(EffectKind::CreatePullRequest).unwrap();
        let runtime = config.runtime_declaration(declaration);
        assert!(runtime.staged);
        assert_eq!(runtime.max_patch_size_kb, Some(256));

        let json = serde_json::to_value(&runtime).unwrap();
        assert_eq!(json["kind"], "create-pull-request");
        assert_eq!(json["target"], "triggering");
    }
}
