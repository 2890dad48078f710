//! Effect jobs, one per safe-output declaration

use super::activation;
use super::agent;
use super::detection;
use super::expressions::{all_of, job_output, step_output, wrap};
use super::job::Job;
use super::paths::*;
use super::steps;
use crate::config::CompilerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::model::{EffectKind, SafeOutputDeclaration, SafeOutputsConfig, WorkflowModel};
use serde_yaml::Value;

pub const TIMEOUT_MINUTES: u32 = 10;

/// Environment variable carrying the number of an entity created by `kind`
pub fn created_entity_env(kind: EffectKind) -> Option<&'static str> {
    match kind {
        EffectKind::CreateIssue => Some("AW_CREATED_ISSUE_NUMBER"),
        EffectKind::CreateDiscussion => Some("AW_CREATED_DISCUSSION_NUMBER"),
        EffectKind::CreatePullRequest => Some("AW_CREATED_PULL_REQUEST_NUMBER"),
        _ => None,
    }
}

/// Guard that runs the job only when the agent asked for `kind`
pub fn guard(kind: EffectKind, detection: bool) -> String {
    let mut conditions = vec![
        "always()".to_string(),
        format!("needs.{}.result != 'skipped'", agent::JOB_NAME),
        format!(
            "contains({}, ',{},')",
            job_output(agent::JOB_NAME, "output_types"),
            kind.key()
        ),
    ];
    if detection {
        conditions.push(format!("{} == 'true'", job_output(detection::JOB_NAME, "success")));
    }
    all_of(conditions)
}

pub fn build(
    model: &WorkflowModel,
    outputs: &SafeOutputsConfig,
    declaration: &SafeOutputDeclaration,
    config: &CompilerConfig,
) -> Result<Job> {
    let kind = declaration.kind;
    let runs_on = outputs
        .runs_on
        .clone()
        .map(Value::from)
        .unwrap_or_else(|| model.runs_on.clone());
    let detection = model.threat_detection().is_some();

    let mut job = Job::new(kind.job_name(), runs_on);
    job.needs(agent::JOB_NAME);
    if detection {
        job.needs(detection::JOB_NAME);
    }
    if kind == EffectKind::CreatePullRequest {
        job.needs(activation::JOB_NAME);
    }
    job.condition = Some(guard(kind, detection));
    job.permissions = kind.permissions();
    job.timeout_minutes = Some(TIMEOUT_MINUTES);

    let effective = outputs.runtime_declaration(declaration);
    job.env("AW_SAFE_OUTPUTS", AGENT_OUTPUT_FILE);
    let effect_config = serde_json::to_string(&effective).map_err(|e| {
        Error::compile(
            ErrorCode::COMPILE_SERIALIZATION,
            format!("failed to serialize the {} effect config: {e}", kind.key()),
        )
    })?;
    job.env("AW_EFFECT_CONFIG", effect_config);
    job.env("AW_SAFE_OUTPUTS_STAGED", effective.staged.to_string());
    if kind.is_targeted() {
        job.env("AW_EVENT_NAME", wrap("github.event_name"));
        job.env(
            "AW_EVENT_NUMBER",
            wrap("github.event.issue.number || github.event.pull_request.number || github.event.discussion.number"),
        );
    }
    if kind == EffectKind::AddComment {
        for parent in outputs.kinds().filter(EffectKind::creates_entity) {
            if let (Some(variable), Some(output)) = (created_entity_env(parent), parent.outputs().first()) {
                job.needs(parent.job_name());
                job.env(variable, wrap(&job_output(parent.job_name(), output)));
            }
        }
    }
    for (key, value) in &outputs.env {
        job.env(key.clone(), value.clone());
    }
    let token = outputs
        .token_for(declaration)
        .map(str::to_string)
        .unwrap_or_else(|| super::expressions::secret("GITHUB_TOKEN"));
    job.env("GITHUB_TOKEN", token);

    let output_dir = AGENT_OUTPUT_FILE.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(RUNTIME_DIR);
    job.step(steps::download_artifact(config, SAFE_OUTPUTS_ARTIFACT, output_dir));
    if kind == EffectKind::CreatePullRequest {
        job.step(
            steps::checkout(config)
                .input("fetch-depth", 0)
                .input("persist-credentials", true),
        );
        job.step(steps::download_artifact(config, PATCH_ARTIFACT, RUNTIME_DIR).allow_failure());
        job.env("AW_PATCH_FILE", PATCH_FILE);
    }
    job.step(steps::install_runtime(config));
    job.step(
        steps::runtime(
            config,
            &format!("Apply {}", kind.key()),
            &["safe-outputs", "apply", "--kind", kind.key()],
        )
        .with_id("apply"),
    );

    for output in kind.outputs() {
        job.output(*output, step_output("apply", output));
    }
    Ok(job)
}
