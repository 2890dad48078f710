//! Safe-Outputs Runtime
//!
//! The runtime half of the privilege split. Inside the agent job the
//! mediator ([`McpServer`] / [`SafeOutputsWriter`]) appends requests to an
//! append-only log and [`collect`] sanitizes it. Inside each effect job the
//! [`Processor`] enforces the declared policy and hands resolved
//! operations to an [`EffectBackend`].

use crate::error::{Error, ErrorCode, Result};
use crate::model::SafeOutputDeclaration;
use std::fs;
use std::path::Path;

pub mod backend;
pub mod collect;
pub mod github;
pub mod log;
pub mod mcp;
pub mod processor;
pub mod report;
pub mod request;
pub mod verdict;

pub use backend::{dedup_marker, AppliedEffect, BackendError, EffectBackend, Operation};
pub use collect::{collect, sanitize_text, CollectSummary};
pub use github::GitHubBackend;
pub use log::{LogContents, LogError, LoggedRequest, SafeOutputsLog, SafeOutputsWriter};
pub use mcp::McpServer;
pub use processor::{EventContext, Plan, PlannedEffect, Processor};
pub use report::{ApplyReport, SkipReason, Skipped};
pub use request::{EffectRequest, RecordError};
pub use verdict::{ThreatVerdict, VerdictError};

/// Raw log written by the mediator, or the sanitized log in effect jobs
pub const ENV_LOG: &str = "AW_SAFE_OUTPUTS";
/// File holding every declaration, for the mediator and collector
pub const ENV_CONFIG: &str = "AW_SAFE_OUTPUTS_CONFIG";
/// Inline JSON of the one declaration an effect job applies
pub const ENV_EFFECT_CONFIG: &str = "AW_EFFECT_CONFIG";
pub const ENV_STAGED: &str = "AW_SAFE_OUTPUTS_STAGED";
pub const ENV_PATCH: &str = "AW_PATCH_FILE";

/// Read the declarations file written by the agent job
pub fn load_declarations(path: &Path) -> Result<Vec<SafeOutputDeclaration>> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::config_at(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("cannot read safe-outputs config {}", path.display()),
            path,
        )
        .with_source(e)
    })?;
    serde_json::from_str(&text).map_err(|e| {
        Error::config_at(
            ErrorCode::CONFIG_PARSE_ERROR,
            format!("invalid safe-outputs config {}", path.display()),
            path,
        )
        .with_source(e)
    })
}

/// Parse the declaration handed to an effect job
pub fn parse_effect_config(json: &str) -> Result<SafeOutputDeclaration> {
    serde_json::from_str(json).map_err(|e| {
        Error::Config {
            code: ErrorCode::CONFIG_PARSE_ERROR,
            message: format!("invalid {ENV_EFFECT_CONFIG}"),
            path: None,
            source: None,
        }
        .with_source(e)
    })
}
