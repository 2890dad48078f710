//! Integration tests for the safe-outputs channel
//!
//! Drives a request from the mediator in the agent job through collection
//! and into an effect job, the way the generated pipeline does.

use agentic_workflows::model::{EffectKind, SafeOutputDeclaration, Target};
use agentic_workflows::safe_outputs::{
    collect, load_declarations, ApplyReport, EventContext, McpServer, Operation, Processor, SafeOutputsLog,
    SafeOutputsWriter, SkipReason,
};
use agentic_workflows::testing::{RecordingBackend, TestContext};
use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;

struct Channel {
    ctx: TestContext,
    declarations: Vec<SafeOutputDeclaration>,
}

impl Channel {
    fn new(declarations: Vec<SafeOutputDeclaration>) -> Result<Self> {
        let ctx = TestContext::new()?;
        ctx.write("safeoutputs/config.json", &serde_json::to_string(&declarations)?)?;
        Ok(Self { ctx, declarations })
    }

    fn raw_log(&self) -> SafeOutputsLog {
        SafeOutputsLog::new(self.ctx.path().join("safeoutputs/outputs.jsonl"))
    }

    fn sanitized_path(&self) -> PathBuf {
        self.ctx.path().join("safeoutputs/agent_output.jsonl")
    }

    /// Agent side: tool calls through the mediator server
    fn agent_calls(&self, calls: &[(&str, Value)]) -> Result<Vec<Value>> {
        let declarations = load_declarations(&self.ctx.path().join("safeoutputs/config.json"))?;
        let server = McpServer::new(SafeOutputsWriter::new(self.raw_log(), declarations));
        let mut responses = Vec::new();
        for (index, (tool, arguments)) in calls.iter().enumerate() {
            let message = serde_json::json!({
                "jsonrpc": "2.0",
                "id": index + 1,
                "method": "tools/call",
                "params": { "name": tool, "arguments": arguments },
            });
            if let Some(response) = server.handle_line(&message.to_string()) {
                responses.push(response);
            }
        }
        Ok(responses)
    }

    fn collect(&self) -> Result<String> {
        let summary = collect(&self.raw_log(), &self.declarations, &self.sanitized_path(), None)?;
        Ok(summary.output_types())
    }

    /// Effect side: one job applying one kind
    fn apply(&self, kind: EffectKind, context: &EventContext, backend: &RecordingBackend) -> Result<ApplyReport> {
        let declaration = self
            .declarations
            .iter()
            .find(|d| d.kind == kind)
            .cloned()
            .expect("kind is declared");
        let contents = SafeOutputsLog::new(self.sanitized_path()).read()?;
        Ok(Processor::new(&declaration, context).run(&contents, backend))
    }
}

fn issue_declaration(max: u32) -> SafeOutputDeclaration {
    let mut declaration = SafeOutputDeclaration::new(EffectKind::CreateIssue);
    declaration.max = max;
    declaration
}

#[test]
fn test_quota_applies_first_requests_in_order() -> Result<()> {
    let channel = Channel::new(vec![issue_declaration(2)])?;
    let calls: Vec<(&str, Value)> = ["alpha", "beta", "gamma", "delta"]
        .iter()
        .map(|title| ("create_issue", serde_json::json!({ "title": title, "body": "details" })))
        .collect();
    channel.agent_calls(&calls)?;
    assert_eq!(channel.collect()?, ",create-issue,");

    let backend = RecordingBackend::new();
    let report = channel.apply(EffectKind::CreateIssue, &EventContext::default(), &backend)?;

    let titles: Vec<String> = backend
        .operations()
        .into_iter()
        .map(|operation| match operation {
            Operation::CreateIssue { title, .. } => title,
            other => panic!("unexpected operation {other:?}"),
        })
        .collect();
    assert_eq!(titles, vec!["alpha", "beta"]);
    let truncated: Vec<usize> = report
        .skipped
        .iter()
        .filter(|skipped| skipped.reason == SkipReason::Truncated)
        .map(|skipped| skipped.line)
        .collect();
    assert_eq!(truncated, vec![3, 4]);
    assert!(report.is_success());
    Ok(())
}

#[test]
fn test_applying_the_same_log_twice_creates_nothing_new() -> Result<()> {
    let mut labels = SafeOutputDeclaration::new(EffectKind::AddLabels);
    labels.allowed = vec!["bug".into()];
    let channel = Channel::new(vec![issue_declaration(1), labels])?;
    channel.agent_calls(&[
        ("create_issue", serde_json::json!({ "title": "Crash on start", "body": "trace" })),
        ("add_labels", serde_json::json!({ "labels": ["bug"] })),
    ])?;
    assert_eq!(channel.collect()?, ",create-issue,add-labels,");

    let context = EventContext {
        event_name: Some("issues".into()),
        event_number: Some(12),
        ..Default::default()
    };
    let backend = RecordingBackend::new();

    let first = channel.apply(EffectKind::CreateIssue, &context, &backend)?;
    assert_eq!(first.applied.len(), 1);
    let second = channel.apply(EffectKind::CreateIssue, &context, &backend)?;
    assert!(second.applied.is_empty());
    assert!(matches!(second.skipped[0].reason, SkipReason::AlreadyApplied { .. }));

    channel.apply(EffectKind::AddLabels, &context, &backend)?;
    channel.apply(EffectKind::AddLabels, &context, &backend)?;
    let operations = backend.operations();
    let issues = operations
        .iter()
        .filter(|operation| matches!(operation, Operation::CreateIssue { .. }))
        .count();
    assert_eq!(issues, 1);
    // Adding the same labels twice leaves the same label set.
    for operation in operations.iter().filter(|o| matches!(o, Operation::AddLabels { .. })) {
        assert_eq!(
            operation,
            &Operation::AddLabels {
                number: 12,
                labels: vec!["bug".into()]
            }
        );
    }
    Ok(())
}

#[test]
fn test_undeclared_and_malformed_requests_never_reach_effects() -> Result<()> {
    let channel = Channel::new(vec![issue_declaration(3)])?;
    let responses = channel.agent_calls(&[
        ("close_issue", serde_json::json!({ "body": "done" })),
        ("create_issue", serde_json::json!({ "title": "" , "body": "empty title" })),
        ("create_issue", serde_json::json!({ "title": "Ping @octocat", "body": "hi @team" })),
    ])?;
    assert_eq!(responses[0]["result"]["isError"], true);
    assert_eq!(responses[1]["result"]["isError"], true);

    // A hand-written line bypassing the mediator is dropped by collection.
    std::fs::OpenOptions::new()
        .append(true)
        .open(channel.raw_log().path())
        .and_then(|mut file| {
            use std::io::Write;
            writeln!(file, "{{\"type\":\"delete-repository\"}}")
        })?;

    assert_eq!(channel.collect()?, ",create-issue,");
    let backend = RecordingBackend::new();
    let report = channel.apply(EffectKind::CreateIssue, &EventContext::default(), &backend)?;
    assert_eq!(report.applied.len(), 1);
    match &backend.operations()[0] {
        Operation::CreateIssue { title, body, .. } => {
            assert_eq!(title, "Ping `@octocat`");
            assert!(body.starts_with("hi `@team`"));
        }
        other => panic!("unexpected operation {other:?}"),
    }
    Ok(())
}

#[test]
fn test_comment_follows_the_issue_created_upstream() -> Result<()> {
    let mut comment = SafeOutputDeclaration::new(EffectKind::AddComment);
    comment.target = Target::Triggering;
    let channel = Channel::new(vec![issue_declaration(1), comment])?;
    channel.agent_calls(&[("add_comment", serde_json::json!({ "body": "See the linked issue." }))])?;
    channel.collect()?;

    let mut context = EventContext {
        event_name: Some("issues".into()),
        event_number: Some(7),
        ..Default::default()
    };
    context.created.insert(EffectKind::CreateIssue, 301);
    let backend = RecordingBackend::new();
    let report = channel.apply(EffectKind::AddComment, &context, &backend)?;

    assert_eq!(report.applied.len(), 1);
    match &backend.operations()[0] {
        Operation::AddComment { number, body } => {
            assert_eq!(*number, 7);
            assert!(body.contains("#301"));
        }
        other => panic!("unexpected operation {other:?}"),
    }
    Ok(())
}
