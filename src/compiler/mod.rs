//! Job Graph Compiler
//!
//! Turns a validated [`WorkflowModel`] into a pipeline of jobs:
//!
//! - `activation` evaluates filters the CI platform cannot express
//! - `agent` runs the engine with read-only grants and records effect requests
//! - `detection` screens the requests when threat detection is enabled
//! - one job per declared effect kind applies the requests with scoped writes
//!
//! Jobs are placed in a [`JobGraph`] that rejects cycles and dangling
//! dependencies before anything is rendered.

use crate::config::CompilerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::imports::{ImportCache, RemoteSource};
use crate::model::WorkflowModel;
use crate::parser::DocumentLoader;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod activation;
pub mod agent;
pub mod detection;
pub mod effects;
pub mod engines;
pub mod expressions;
pub mod graph;
pub mod job;
pub mod paths;
pub mod render;
pub mod steps;

pub use engines::{engine_for, AgenticEngine};
pub use graph::{GraphError, JobGraph};
pub use job::{Job, Step};

pub const LOCK_SUFFIX: &str = ".lock.yml";

/// Output of one compilation
#[derive(Debug)]
pub struct CompiledWorkflow {
    pub model: WorkflowModel,
    pub graph: JobGraph,
    pub yaml: String,
}

pub struct Compiler<'a> {
    config: &'a CompilerConfig,
}

impl<'a> Compiler<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self { config }
    }

    /// Every job of the pipeline, in construction order
    pub fn jobs(&self, model: &WorkflowModel) -> Result<Vec<Job>> {
        let engine = engine_for(model.engine.id);
        let mut jobs = vec![
            activation::build(model, self.config),
            agent::build(model, self.config, engine.as_ref()),
        ];
        if let Some(outputs) = &model.safe_outputs {
            if let Some(detection) = &outputs.threat_detection {
                jobs.push(detection::build(model, detection, self.config, engine.as_ref()));
            }
            for declaration in &outputs.declarations {
                jobs.push(effects::build(model, outputs, declaration, self.config)?);
            }
        }
        Ok(jobs)
    }

    pub fn compile(&self, model: WorkflowModel) -> Result<CompiledWorkflow> {
        let graph = JobGraph::build(self.jobs(&model)?)?;
        debug!("job order: {}", graph.names().join(", "));
        let yaml = render::render(&model, &graph)?;
        Ok(CompiledWorkflow { model, graph, yaml })
    }

    /// Load, validate and compile a workflow file
    pub fn compile_file(
        &self,
        path: &Path,
        cache: &ImportCache,
        remote: &dyn RemoteSource,
    ) -> Result<CompiledWorkflow> {
        let document = DocumentLoader::new(cache, remote).load(path)?;
        let model = crate::model::build(&document, self.config)?;
        info!("compiling {} ({} imports)", path.display(), document.imports.len());
        self.compile(model)
    }
}

/// `<stem>.lock.yml` beside the source
pub fn lock_file_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string());
    source.with_file_name(format!("{stem}{LOCK_SUFFIX}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftStatus {
    UpToDate,
    Stale,
    Missing,
}

/// Compare rendered output with the checked-in lock file
pub fn check_drift(lock_file: &Path, rendered: &str) -> Result<DriftStatus> {
    match fs::read_to_string(lock_file) {
        Ok(existing) if existing == rendered => Ok(DriftStatus::UpToDate),
        Ok(_) => Ok(DriftStatus::Stale),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DriftStatus::Missing),
        Err(e) => Err(e.into()),
    }
}

/// Fail with [`ErrorCode::COMPILE_DRIFT`] unless the lock file is current
pub fn ensure_up_to_date(lock_file: &Path, rendered: &str) -> Result<()> {
    match check_drift(lock_file, rendered)? {
        DriftStatus::UpToDate => Ok(()),
        DriftStatus::Stale => Err(Error::compile(
            ErrorCode::COMPILE_DRIFT,
            format!("{} is out of date; run `aw compile`", lock_file.display()),
        )),
        DriftStatus::Missing => Err(Error::compile(
            ErrorCode::COMPILE_DRIFT,
            format!("{} does not exist; run `aw compile`", lock_file.display()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::source_document;
    use serde_yaml::Value;

    fn compile(raw: &str) -> CompiledWorkflow {
        let config = CompilerConfig::default();
        let model = crate::model::build(&source_document("triage.md", raw), &config).unwrap();
        Compiler::new(&config).compile(model).unwrap()
    }

    fn job<'a>(compiled: &'a CompiledWorkflow, name: &str) -> &'a Job {
        compiled.graph.get(name).unwrap()
    }

    #[test]
    fn test_minimal_workflow_has_two_jobs() {
        let compiled = compile("---\non: workflow_dispatch\n---\nSummarize open issues.\n");
        assert_eq!(compiled.graph.names(), vec!["activation", "agent"]);
        assert!(!job(&compiled, "agent").permissions.has_write());

        let doc: Value = serde_yaml::from_str(&compiled.yaml).unwrap();
        assert_eq!(doc["permissions"], Value::Mapping(Default::default()));
        assert!(doc["jobs"]["agent"]["steps"].as_sequence().unwrap().len() > 3);
    }

    #[test]
    fn test_gated_effect() {
        let compiled = compile("---\non: issues\nsafe-outputs:\n  create-issue:\n    max: 1\n---\nFile a follow-up.\n");
        assert_eq!(
            compiled.graph.names(),
            vec!["activation", "agent", "detection", "create_issue"]
        );
        let create_issue = job(&compiled, "create_issue");
        assert_eq!(create_issue.needs, vec!["agent", "detection"]);
        let guard = create_issue.condition.as_deref().unwrap();
        assert!(guard.contains("needs.detection.outputs.success == 'true'"));
        assert!(guard.contains("',create-issue,'"));
        assert_eq!(create_issue.env["AW_SAFE_OUTPUTS_STAGED"], "false");

        let agent = job(&compiled, "agent");
        assert!(!agent.permissions.has_write());
        assert!(agent.env.contains_key("AW_SAFE_OUTPUTS"));
        assert!(agent.scripts().any(|script| script.contains("safe-outputs collect")));

        let detection = job(&compiled, "detection");
        assert!(!detection.permissions.has_write());
        assert_eq!(detection.timeout_minutes, Some(10));
    }

    #[test]
    fn test_effect_job_permissions_are_scoped() {
        let compiled = compile(
            "---\non: issues\nsafe-outputs:\n  add-labels:\n    allowed: [bug]\n  add-comment:\n  create-issue:\nthreat-detection: false\n---\nTriage.\n",
        );
        let labels = job(&compiled, "add_labels");
        assert_eq!(labels.permissions, crate::model::EffectKind::AddLabels.permissions());
        assert!(compiled.graph.get("detection").is_none());

        let comment = job(&compiled, "add_comment");
        assert!(comment.needs.contains(&"create_issue".to_string()));
        assert!(comment.env["AW_CREATED_ISSUE_NUMBER"].contains("needs.create_issue.outputs.issue_number"));
    }

    #[test]
    fn test_staged_run() {
        let compiled = compile("---\non: push\nsafe-outputs:\n  staged: true\n  create-issue:\n---\nPreview.\n");
        let create_issue = job(&compiled, "create_issue");
        assert_eq!(create_issue.env["AW_SAFE_OUTPUTS_STAGED"], "true");
        assert!(create_issue.env["AW_EFFECT_CONFIG"].contains("\"staged\":true"));
    }

    #[test]
    fn test_pull_request_job_needs_activation_and_patch() {
        let compiled = compile("---\non: push\nsafe-outputs:\n  create-pull-request:\n---\nFix the typo.\n");
        let job = job(&compiled, "create_pull_request");
        assert!(job.needs.contains(&"activation".to_string()));
        assert_eq!(job.env["AW_PATCH_FILE"], paths::PATCH_FILE);
        assert!(compiled.yaml.contains("aw.patch"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let raw = "---\non: issues\nenv:\n  B: two\n  A: one\nsafe-outputs:\n  add-comment:\n  create-issue:\n---\nGo.\n";
        assert_eq!(compile(raw).yaml, compile(raw).yaml);
        let yaml = compile(raw).yaml;
        assert!(yaml.starts_with(render::GENERATED_NOTICE));
        assert!(yaml.find("A: one").unwrap() < yaml.find("B: two").unwrap());
    }

    #[test]
    fn test_lock_file_path() {
        assert_eq!(
            lock_file_path(Path::new(".github/workflows/triage.md")),
            PathBuf::from(".github/workflows/triage.lock.yml")
        );
    }

    #[test]
    fn test_drift_check() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = dir.path().join("triage.lock.yml");
        assert_eq!(check_drift(&lock, "a").unwrap(), DriftStatus::Missing);
        fs::write(&lock, "a").unwrap();
        assert_eq!(check_drift(&lock, "a").unwrap(), DriftStatus::UpToDate);
        let err = ensure_up_to_date(&lock, "b").unwrap_err();
        assert_eq!(err.code(), ErrorCode::COMPILE_DRIFT);
    }
}
