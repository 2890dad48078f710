//! Effect requests
//!
//! One record per line in the safe-outputs log. The `type` field selects
//! the variant and accepts `_` in place of `-`; unknown fields are ignored
//! so newer agents can add fields without breaking older runtimes.

use crate::error::ErrorCode;
use crate::model::EffectKind;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A record that could not be accepted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("[E6001] line {line}: malformed record: {message}")]
    Malformed { line: usize, message: String },

    #[error("[E6002] line {line}: unknown effect kind `{kind}`")]
    UnknownKind { line: usize, kind: String },

    #[error("[E6001] invalid {kind} request: {message}")]
    Invalid { kind: EffectKind, message: String },

    #[error("[E6002] `{kind}` is not declared for this workflow")]
    NotDeclared { kind: EffectKind },
}

impl RecordError {
    pub fn code(&self) -> u16 {
        match self {
            Self::Malformed { .. } | Self::Invalid { .. } => ErrorCode::RECORD_MALFORMED,
            Self::UnknownKind { .. } | Self::NotDeclared { .. } => ErrorCode::RECORD_UNKNOWN_KIND,
        }
    }

    fn invalid(kind: EffectKind, message: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewSide {
    Left,
    Right,
}

/// An effect the agent asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EffectRequest {
    CreateIssue {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
    },
    CreateDiscussion {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    CreatePullRequest {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
    },
    AddComment {
        body: String,
        #[serde(default, deserialize_with = "number", skip_serializing_if = "Option::is_none")]
        item_number: Option<u64>,
    },
    AddLabels {
        labels: Vec<String>,
        #[serde(default, deserialize_with = "number", skip_serializing_if = "Option::is_none")]
        item_number: Option<u64>,
    },
    UpdateIssue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<IssueState>,
        #[serde(default, deserialize_with = "number", skip_serializing_if = "Option::is_none")]
        item_number: Option<u64>,
    },
    AssignToUser {
        #[serde(alias = "assignee", deserialize_with = "one_or_many")]
        assignees: Vec<String>,
        #[serde(default, deserialize_with = "number", skip_serializing_if = "Option::is_none")]
        item_number: Option<u64>,
    },
    CloseIssue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, deserialize_with = "number", skip_serializing_if = "Option::is_none")]
        item_number: Option<u64>,
    },
    CreatePullRequestReviewComment {
        path: String,
        #[serde(deserialize_with = "required_number")]
        line: u64,
        #[serde(default, deserialize_with = "number", skip_serializing_if = "Option::is_none")]
        start_line: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<ReviewSide>,
        body: String,
        #[serde(
            default,
            alias = "pull_request_number",
            deserialize_with = "number",
            skip_serializing_if = "Option::is_none"
        )]
        item_number: Option<u64>,
    },
    MissingTool {
        tool: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alternatives: Option<String>,
    },
}

fn parse_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().trim_start_matches('#').parse().ok(),
        _ => None,
    }
}

/// Numbers may arrive as JSON numbers or strings like `"42"` or `"#42"`
fn number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        other => parse_number(&other)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a number, found {other}"))),
    }
}

fn required_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    number(deserializer)?.ok_or_else(|| serde::de::Error::custom("expected a number"))
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

fn require(kind: EffectKind, field: &str, value: &str) -> Result<(), RecordError> {
    if value.trim().is_empty() {
        Err(RecordError::invalid(kind, format!("`{field}` must not be empty")))
    } else {
        Ok(())
    }
}

impl EffectRequest {
    /// Parse one log line (1-based `line` for error messages)
    pub fn parse_line(line: usize, text: &str) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_str(text).map_err(|e| RecordError::Malformed {
            line,
            message: e.to_string(),
        })?;
        Self::from_value(line, value)
    }

    /// Parse a JSON object, normalizing its `type`
    pub fn from_value(line: usize, mut value: Value) -> Result<Self, RecordError> {
        let Some(object) = value.as_object_mut() else {
            return Err(RecordError::Malformed {
                line,
                message: "expected a JSON object".to_string(),
            });
        };
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => {
                return Err(RecordError::Malformed {
                    line,
                    message: "missing `type`".to_string(),
                })
            }
        };
        let Some(normalized) = EffectKind::from_key(&kind) else {
            return Err(RecordError::UnknownKind { line, kind });
        };
        object.insert("type".to_string(), Value::from(normalized.key()));

        serde_json::from_value(value).map_err(|e| RecordError::Malformed {
            line,
            message: e.to_string(),
        })
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Self::CreateIssue { .. } => EffectKind::CreateIssue,
            Self::CreateDiscussion { .. } => EffectKind::CreateDiscussion,
            Self::CreatePullRequest { .. } => EffectKind::CreatePullRequest,
            Self::AddComment { .. } => EffectKind::AddComment,
            Self::AddLabels { .. } => EffectKind::AddLabels,
            Self::UpdateIssue { .. } => EffectKind::UpdateIssue,
            Self::AssignToUser { .. } => EffectKind::AssignToUser,
            Self::CloseIssue { .. } => EffectKind::CloseIssue,
            Self::CreatePullRequestReviewComment { .. } => EffectKind::CreatePullRequestReviewComment,
            Self::MissingTool { .. } => EffectKind::MissingTool,
        }
    }

    /// Explicit target chosen by the agent
    pub fn item_number(&self) -> Option<u64> {
        match self {
            Self::AddComment { item_number, .. }
            | Self::AddLabels { item_number, .. }
            | Self::UpdateIssue { item_number, .. }
            | Self::AssignToUser { item_number, .. }
            | Self::CloseIssue { item_number, .. }
            | Self::CreatePullRequestReviewComment { item_number, .. } => *item_number,
            _ => None,
        }
    }

    /// Field-level checks beyond what deserialization enforces
    pub fn validate(&self) -> Result<(), RecordError> {
        let kind = self.kind();
        match self {
            Self::CreateIssue { title, body, .. }
            | Self::CreateDiscussion { title, body, .. }
            | Self::CreatePullRequest { title, body, .. } => {
                require(kind, "title", title)?;
                require(kind, "body", body)
            }
            Self::AddComment { body, .. } => require(kind, "body", body),
            Self::AddLabels { labels, .. } => {
                if labels.iter().all(|label| label.trim().is_empty()) {
                    return Err(RecordError::invalid(kind, "`labels` must not be empty"));
                }
                Ok(())
            }
            Self::UpdateIssue {
                title, body, status, ..
            } => {
                if title.is_none() && body.is_none() && status.is_none() {
                    return Err(RecordError::invalid(
                        kind,
                        "one of `title`, `body` or `status` is required",
                    ));
                }
                if let Some(title) = title {
                    require(kind, "title", title)?;
                }
                Ok(())
            }
            Self::AssignToUser { assignees, .. } => {
                if assignees.iter().all(|user| user.trim().is_empty()) {
                    return Err(RecordError::invalid(kind, "`assignees` must not be empty"));
                }
                Ok(())
            }
            Self::CloseIssue { .. } => Ok(()),
            Self::CreatePullRequestReviewComment {
                path,
                line,
                start_line,
                body,
                ..
            } => {
                require(kind, "path", path)?;
                require(kind, "body", body)?;
                if *line == 0 {
                    return Err(RecordError::invalid(kind, "`line` must be at least 1"));
                }
                if start_line.is_some_and(|start| start == 0 || start > *line) {
                    return Err(RecordError::invalid(
                        kind,
                        "`start_line` must be between 1 and `line`",
                    ));
                }
                Ok(())
            }
            Self::MissingTool { tool, reason, .. } => {
                require(kind, "tool", tool)?;
                require(kind, "reason", reason)
            }
        }
    }

    /// Fields that make two requests "the same effect"
    fn identity(&self) -> String {
        fn sorted(values: &[String]) -> String {
            let mut values: Vec<&str> = values.iter().map(|v| v.trim()).collect();
            values.sort_unstable();
            values.dedup();
            values.join(",")
        }

        match self {
            Self::CreateIssue { title, .. }
            | Self::CreateDiscussion { title, .. }
            | Self::CreatePullRequest { title, .. } => title.trim().to_string(),
            Self::AddComment { body, .. } => body.trim().to_string(),
            Self::AddLabels { labels, .. } => sorted(labels),
            Self::AssignToUser { assignees, .. } => sorted(assignees),
            Self::UpdateIssue { .. } | Self::CloseIssue { .. } => String::new(),
            Self::CreatePullRequestReviewComment { path, line, .. } => format!("{path}:{line}"),
            Self::MissingTool { tool, .. } => tool.trim().to_string(),
        }
    }

    /// Dedup key: SHA-256 over kind, resolved target and identity fields
    pub fn dedup_key(&self, target: Option<u64>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().key().as_bytes());
        hasher.update([0]);
        hasher.update(target.map(|t| t.to_string()).unwrap_or_default().as_bytes());
        hasher.update([0]);
        hasher.update(self.identity().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Apply `f` to every free-text field
    pub fn map_text(&mut self, f: impl Fn(&str) -> String) {
        let apply = |value: &mut String| *value = f(value.as_str());
        match self {
            Self::CreateIssue { title, body, .. }
            | Self::CreateDiscussion { title, body, .. }
            | Self::CreatePullRequest { title, body, .. } => {
                apply(title);
                apply(body);
            }
            Self::AddComment { body, .. } | Self::CreatePullRequestReviewComment { body, .. } => {
                apply(body)
            }
            Self::UpdateIssue { title, body, .. } => {
                title.iter_mut().for_each(apply);
                body.iter_mut().for_each(apply);
            }
            Self::CloseIssue { body, .. } => body.iter_mut().for_each(apply),
            Self::MissingTool {
                reason,
                alternatives,
                ..
            } => {
                apply(reason);
                alternatives.iter_mut().for_each(apply);
            }
            Self::AddLabels { .. } | Self::AssignToUser { .. } => {}
        }
    }

    /// One-line description for reports
    pub fn summary(&self) -> String {
        match self {
            Self::CreateIssue { title, .. } => format!("issue \"{title}\""),
            Self::CreateDiscussion { title, .. } => format!("discussion \"{title}\""),
            Self::CreatePullRequest { title, .. } => format!("pull request \"{title}\""),
            Self::AddComment { body, .. } => {
                let first = body.lines().next().unwrap_or_default();
                format!("comment \"{}\"", truncate(first, 60))
            }
            Self::AddLabels { labels, .. } => format!("labels {}", labels.join(", ")),
            Self::UpdateIssue { .. } => "issue update".to_string(),
            Self::AssignToUser { assignees, .. } => format!("assign {}", assignees.join(", ")),
            Self::CloseIssue { .. } => "close issue".to_string(),
            Self::CreatePullRequestReviewComment { path, line, .. } => {
                format!("review comment on {path}:{line}")
            }
            Self::MissingTool { tool, .. } => format!("missing tool `{tool}`"),
        }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
