//! Projects a merged [`SourceDocument`] into a [`WorkflowModel`]
//!
//! Every section is parsed against one shared [`Collector`] so a single
//! pass reports all problems. The model is only returned when nothing
//! was collected.

use super::engine::{engine_name, EngineConfig};
use super::network::{NetworkPolicy, SandboxPolicy};
use super::permissions::{PermissionLevel, Permissions};
use super::safe_outputs::{self, positive_int, string_map, string_value};
use super::tools::{BashTool, Tools};
use super::triggers::Triggers;
use super::validation::{Collector, ValidationErrors};
use super::{SourceInfo, WorkflowModel};
use crate::config::CompilerConfig;
use crate::error::ErrorCode;
use crate::parser::SourceDocument;
use serde_yaml::Value;
use tracing::debug;

pub const DEFAULT_TIMEOUT_MINUTES: u32 = 20;

const KNOWN_KEYS: &[&str] = &[
    "name",
    "description",
    "on",
    "permissions",
    "engine",
    "tools",
    "network",
    "sandbox",
    "safe-outputs",
    "threat-detection",
    "imports",
    "runs-on",
    "timeout-minutes",
    "concurrency",
    "env",
    "if",
    "steps",
    "post-steps",
    "strict",
];

pub struct ModelBuilder<'a> {
    config: &'a CompilerConfig,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, doc: &SourceDocument) -> Result<WorkflowModel, ValidationErrors> {
        let mut errors = Collector::new();
        let config = &doc.config;

        for key in config.keys() {
            match key.as_str() {
                Some(name) if KNOWN_KEYS.contains(&name) => {}
                Some(name) => errors.push_unknown(
                    ErrorCode::VALIDATION_UNKNOWN_KEY,
                    name,
                    format!("unknown frontmatter key `{name}`"),
                    name,
                    KNOWN_KEYS,
                ),
                None => errors.push(
                    ErrorCode::VALIDATION_UNKNOWN_KEY,
                    "frontmatter",
                    "frontmatter keys must be strings",
                ),
            }
        }

        let name = match config.get("name") {
            Some(value) => string_value(value, "name", &mut errors).unwrap_or_default(),
            None => first_heading(&doc.body).unwrap_or_else(|| doc.stem()),
        };
        let description = config
            .get("description")
            .and_then(|value| string_value(value, "description", &mut errors));
        let strict = match config.get("strict") {
            Some(value) => safe_outputs::bool_value(value, "strict", &mut errors),
            None => self.config.strict,
        };

        let triggers = Triggers::parse(config.get("on"), &mut errors);

        check_single_engine(doc, &mut errors);
        let engine = EngineConfig::parse(
            config.get("engine"),
            self.config.get_default_engine(),
            &mut errors,
        );

        let tools = Tools::parse(config.get("tools"), &mut errors);
        let permissions = self.agent_permissions(config.get("permissions"), &tools, &mut errors);

        let network = NetworkPolicy::parse(config.get("network"), &mut errors);
        let sandbox = SandboxPolicy::parse(config.get("sandbox"), &mut errors);
        sandbox.check_against(&network, &mut errors);

        let safe_outputs = safe_outputs::parse(
            config.get("safe-outputs"),
            config.get("threat-detection"),
            &mut errors,
        );

        let runs_on = match config.get("runs-on") {
            None => Value::from(self.config.runs_on.clone()),
            Some(value @ (Value::String(_) | Value::Sequence(_) | Value::Mapping(_))) => value.clone(),
            Some(_) => {
                errors.push(
                    ErrorCode::VALIDATION_INVALID_VALUE,
                    "runs-on",
                    "runs-on must be a runner label, a list of labels or a mapping",
                );
                Value::Null
            }
        };
        let timeout_minutes = config
            .get("timeout-minutes")
            .map(|value| positive_int(value, "timeout-minutes", &mut errors))
            .unwrap_or(Some(DEFAULT_TIMEOUT_MINUTES))
            .unwrap_or(DEFAULT_TIMEOUT_MINUTES);
        let concurrency = match config.get("concurrency") {
            None => None,
            Some(value @ (Value::String(_) | Value::Mapping(_))) => Some(value.clone()),
            Some(_) => {
                errors.push(
                    ErrorCode::VALIDATION_INVALID_VALUE,
                    "concurrency",
                    "concurrency must be a group name or a mapping",
                );
                None
            }
        };
        let env = config
            .get("env")
            .map(|value| string_map(value, "env", &mut errors))
            .unwrap_or_default();
        let condition = config
            .get("if")
            .and_then(|value| string_value(value, "if", &mut errors));
        let steps = step_list(config.get("steps"), "steps", &mut errors);
        let post_steps = step_list(config.get("post-steps"), "post-steps", &mut errors);

        let body = doc.body.trim().to_string();
        if body.is_empty() {
            errors.push(
                ErrorCode::VALIDATION_MISSING_FIELD,
                "body",
                "the workflow has no task body for the agent",
            );
        }

        if strict {
            check_strict(&network, &tools, &mut errors);
        }

        debug!(
            "Built model for {} with {} error(s)",
            doc.path.display(),
            errors.len()
        );

        let source = SourceInfo {
            file: doc
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            imports: doc.imports.iter().map(|import| import.display.clone()).collect(),
        };

        errors.finish(WorkflowModel {
            name,
            description,
            source,
            triggers,
            permissions,
            engine,
            tools,
            network,
            sandbox,
            safe_outputs,
            runs_on,
            timeout_minutes,
            concurrency,
            env,
            condition,
            steps,
            post_steps,
            body,
            strict,
        })
    }

    /// Declared grants plus tool-implied grants. Writes must come from tools.
    fn agent_permissions(&self, declared: Option<&Value>, tools: &Tools, errors: &mut Collector) -> Permissions {
        let implied = tools.implied_permissions();
        let Some(declared) = declared else {
            return implied;
        };
        let declared = Permissions::parse(declared, "permissions", errors);

        let unjustified: Vec<&str> = declared
            .writes()
            .filter(|scope| implied.level(*scope) < PermissionLevel::Write)
            .map(|scope| scope.as_str())
            .collect();
        if !unjustified.is_empty() {
            errors.push(
                ErrorCode::VALIDATION_PERMISSION,
                "permissions",
                format!(
                    "write access to {} is not required by any declared tool; the agent job stays read-only, declare a safe output for writes instead",
                    unjustified.join(", ")
                ),
            );
        }

        let mut permissions = implied;
        for (scope, level) in declared.iter() {
            permissions.grant(scope, level.min(PermissionLevel::Read));
        }
        permissions
    }
}

/// Reject engine disagreements between the document and its imports
fn check_single_engine(doc: &SourceDocument, errors: &mut Collector) {
    let mut selected = doc.engine.as_ref().and_then(engine_name).map(|name| (name, doc.id.to_string()));
    for import in &doc.imports {
        let Some(name) = import.engine.as_ref().and_then(engine_name) else {
            continue;
        };
        match &selected {
            Some((chosen, origin)) if chosen != &name => errors.push(
                ErrorCode::VALIDATION_ENGINE,
                "engine",
                format!(
                    "`{}` selects engine `{name}` but `{origin}` selects `{chosen}`; a workflow runs exactly one engine",
                    import.display
                ),
            ),
            Some(_) => {}
            None => selected = Some((name, import.display.clone())),
        }
    }
}

fn check_strict(network: &NetworkPolicy, tools: &Tools, errors: &mut Collector) {
    if !network.declared {
        errors.push(
            ErrorCode::VALIDATION_NETWORK,
            "network",
            "strict mode requires an explicit network policy",
        );
    }
    if tools.bash == Some(BashTool::Any) {
        errors.push(
            ErrorCode::VALIDATION_TOOLS,
            "tools.bash",
            "strict mode does not allow unrestricted bash; list the commands instead",
        );
    }
}

fn step_list(value: Option<&Value>, path: &str, errors: &mut Collector) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(steps)) => {
            for (index, step) in steps.iter().enumerate() {
                if !step.is_mapping() {
                    errors.push(
                        ErrorCode::VALIDATION_INVALID_VALUE,
                        format!("{path}[{index}]"),
                        "each step must be a mapping",
                    );
                }
            }
            steps.clone()
        }
        Some(_) => {
            errors.push(ErrorCode::VALIDATION_INVALID_VALUE, path, "expected a list of steps");
            Vec::new()
        }
    }
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|heading| heading.trim().to_string())
        .filter(|heading| !heading.is_empty())
}
