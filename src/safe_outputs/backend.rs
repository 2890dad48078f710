//! The privileged API effect jobs call
//!
//! The processor turns each surviving request into an [`Operation`] with
//! its target resolved and policy applied. Backends only execute
//! operations; they never see raw agent output.

use crate::model::EffectKind;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use super::request::{IssueState, ReviewSide};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("[E6006] {operation} failed with HTTP {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("[E6006] {operation} failed: {message}")]
    Request { operation: String, message: String },

    #[error("[E6006] git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("[E6006] backend is not configured: {0}")]
    NotConfigured(String),
}

/// A fully resolved effect
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Operation {
    CreateIssue {
        title: String,
        body: String,
        labels: Vec<String>,
    },
    CreateDiscussion {
        title: String,
        body: String,
        category: Option<String>,
    },
    CreatePullRequest {
        title: String,
        body: String,
        branch: String,
        labels: Vec<String>,
        draft: bool,
        patch: Option<PathBuf>,
    },
    AddComment {
        number: u64,
        body: String,
    },
    AddLabels {
        number: u64,
        labels: Vec<String>,
    },
    UpdateIssue {
        number: u64,
        title: Option<String>,
        body: Option<String>,
        state: Option<IssueState>,
    },
    AssignToUser {
        number: u64,
        assignees: Vec<String>,
    },
    CloseIssue {
        number: u64,
        comment: Option<String>,
    },
    CreateReviewComment {
        number: u64,
        path: String,
        line: u64,
        start_line: Option<u64>,
        side: ReviewSide,
        body: String,
    },
    ReportMissingTool {
        tool: String,
        reason: String,
        alternatives: Option<String>,
    },
}

impl Operation {
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
            Self::CreateReviewComment { .. } => EffectKind::CreatePullRequestReviewComment,
            Self::ReportMissingTool { .. } => EffectKind::MissingTool,
        }
    }

    /// Existing entity the operation acts on
    pub fn number(&self) -> Option<u64> {
        match self {
            Self::AddComment { number, .. }
            | Self::AddLabels { number, .. }
            | Self::UpdateIssue { number, .. }
            | Self::AssignToUser { number, .. }
            | Self::CloseIssue { number, .. }
            | Self::CreateReviewComment { number, .. } => Some(*number),
            _ => None,
        }
    }
}

/// Result of one applied operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedEffect {
    pub kind: EffectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub summary: String,
}

impl AppliedEffect {
    pub fn new(kind: EffectKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            number: None,
            url: None,
            branch: None,
            summary: summary.into(),
        }
    }

    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Executes operations against the hosting platform
pub trait EffectBackend {
    /// Look for an entity carrying `marker` created by an earlier attempt
    fn find_marker(&self, operation: &Operation, marker: &str) -> Result<Option<AppliedEffect>, BackendError>;

    fn execute(&self, operation: &Operation) -> Result<AppliedEffect, BackendError>;
}

/// Hidden marker embedded in created bodies so retries can detect them
pub fn dedup_marker(key: &str) -> String {
    format!("<!-- aw-dedup:{key} -->")
}
