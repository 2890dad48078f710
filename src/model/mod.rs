//! Workflow model
//!
//! The typed, validated representation of a merged workflow document.
//! [`build`] is the only way to obtain a [`WorkflowModel`]; it either
//! returns a model that satisfies every rule or the full list of
//! problems it found.

use crate::config::CompilerConfig;
use crate::parser::SourceDocument;
use serde_yaml::Value;
use std::collections::BTreeMap;

pub mod builder;
pub mod engine;
pub mod network;
pub mod permissions;
pub mod safe_outputs;
pub mod schedule;
pub mod tools;
pub mod triggers;
pub mod validation;

pub use builder::ModelBuilder;
pub use engine::{EngineConfig, EngineId};
pub use network::{Gateway, GatewayNetworkMode, Mount, MountMode, NetworkPolicy, SandboxAgent, SandboxPolicy};
pub use permissions::{PermissionLevel, PermissionScope, Permissions};
pub use safe_outputs::{
    AllowListPolicy, EffectKind, SafeOutputDeclaration, SafeOutputsConfig, Target, ThreatDetection,
};
pub use tools::{BashTool, GitHubTool, McpServer, Tools};
pub use triggers::{CommandFilter, LabelEntity, LabelFilter, Triggers};
pub use validation::{ValidationError, ValidationErrors};

/// Where a model came from, for the pipeline header
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub file: String,
    /// Import displays with resolved versions, in merge order
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowModel {
    pub name: String,
    pub description: Option<String>,
    pub source: SourceInfo,
    pub triggers: Triggers,
    /// Permissions of the agent job
    pub permissions: Permissions,
    pub engine: EngineConfig,
    pub tools: Tools,
    pub network: NetworkPolicy,
    pub sandbox: SandboxPolicy,
    pub safe_outputs: Option<SafeOutputsConfig>,
    pub runs_on: Value,
    pub timeout_minutes: u32,
    pub concurrency: Option<Value>,
    pub env: BTreeMap<String, String>,
    /// Top-level `if`, attached to the activation job
    pub condition: Option<String>,
    pub steps: Vec<Value>,
    pub post_steps: Vec<Value>,
    pub body: String,
    pub strict: bool,
}

impl WorkflowModel {
    pub fn has_safe_outputs(&self) -> bool {
        self.safe_outputs.is_some()
    }

    pub fn threat_detection(&self) -> Option<&ThreatDetection> {
        self.safe_outputs
            .as_ref()
            .and_then(|config| config.threat_detection.as_ref())
    }

    pub fn is_declared(&self, kind: EffectKind) -> bool {
        self.safe_outputs
            .as_ref()
            .is_some_and(|config| config.is_declared(kind))
    }
}

/// Build and validate the model for a merged document
pub fn build(doc: &SourceDocument, config: &CompilerConfig) -> Result<WorkflowModel, ValidationErrors> {
    ModelBuilder::new(config).build(doc)
}
