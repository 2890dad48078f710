//! Activation job
//!
//! Evaluates the filters the CI platform cannot express (label names,
//! slash commands, stop-after) and publishes `activated` for the agent job.

use super::expressions::{step_output, unwrap, wrap};
use super::job::{Job, Step};
use super::steps;
use crate::config::CompilerConfig;
use crate::model::WorkflowModel;

pub const JOB_NAME: &str = "activation";

pub fn build(model: &WorkflowModel, config: &CompilerConfig) -> Job {
    let mut job = Job::new(JOB_NAME, model.runs_on.clone());
    job.condition = model.condition.as_deref().map(|condition| unwrap(condition).to_string());
    job.timeout_minutes = Some(5);
    job.output("activated", step_output("check", "activated"));

    let triggers = &model.triggers;
    if !triggers.needs_activation_check() {
        job.step(Step::run("Activate", "echo \"activated=true\" >> \"$GITHUB_OUTPUT\"").with_id("check"));
        return job;
    }

    let mut check = steps::runtime(config, "Check activation filters", &["activation", "check"]).with_id("check");
    if let Some(filter) = &triggers.label_filter {
        check = check
            .env("AW_LABEL_NAMES", filter.names.join(","))
            .env("AW_EVENT_LABEL", wrap("github.event.label.name"));
    }
    if let Some(command) = &triggers.command {
        check = check.env("AW_COMMAND", format!("/{}", command.name)).env(
            "AW_EVENT_BODY",
            wrap("github.event.comment.body || github.event.issue.body || github.event.pull_request.body"),
        );
    }
    if let Some(deadline) = &triggers.stop_after {
        check = check.env("AW_STOP_AFTER", deadline.format("%Y-%m-%d %H:%M:%S").to_string());
    }

    job.step(steps::install_runtime(config));
    job.step(check);
    job
}
