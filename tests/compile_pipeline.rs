//! Integration tests for compiling workflow documents end to end
//!
//! Covers the documented scenarios plus the graph-wide properties every
//! compiled pipeline must hold.

use agentic_workflows::compiler::{lock_file_path, CompiledWorkflow, Compiler};
use agentic_workflows::config::CompilerConfig;
use agentic_workflows::error::{Error, ErrorCode};
use agentic_workflows::imports::{ImportCache, OfflineSource, RemoteSource};
use agentic_workflows::model::PermissionLevel;
use agentic_workflows::testing::{MemoryRemoteSource, TestContext};
use anyhow::Result;
use serde_yaml::Value;
use std::collections::HashSet;

const GATED: &str = "---
on:
  issues:
    types: [opened]
permissions:
  contents: read
safe-outputs:
  create-issue:
    max: 1
    title-prefix: \"[triage] \"
---
# Triage

Read the new issue and file a follow-up when something is missing.
";

fn compile_with(ctx: &TestContext, name: &str, raw: &str, remote: &dyn RemoteSource) -> Result<CompiledWorkflow, Error> {
    let path = ctx.write(name, raw).map_err(|e| Error::config(e.to_string()))?;
    let config = CompilerConfig::default();
    let cache = ImportCache::in_memory();
    Compiler::new(&config).compile_file(&path, &cache, remote)
}

fn compile(raw: &str) -> Result<CompiledWorkflow> {
    let ctx = TestContext::new()?;
    Ok(compile_with(&ctx, "workflow.md", raw, &OfflineSource)?)
}

fn assert_acyclic(compiled: &CompiledWorkflow) {
    for job in compiled.graph.jobs() {
        assert!(
            !compiled.graph.ancestors(&job.name).contains(&job.name),
            "{} depends on itself",
            job.name
        );
    }
    // Rendered order lists every dependency before its dependents.
    let mut seen = HashSet::new();
    for job in compiled.graph.jobs() {
        for need in &job.needs {
            assert!(seen.contains(need.as_str()), "{} rendered before {}", job.name, need);
        }
        seen.insert(job.name.as_str());
    }
}

#[test]
fn test_minimal_workflow_compiles_to_two_jobs() -> Result<()> {
    let compiled = compile("---\non: workflow_dispatch\n---\nSummarize this week's activity.\n")?;
    assert_eq!(compiled.graph.names(), vec!["activation", "agent"]);
    assert_acyclic(&compiled);

    let doc: Value = serde_yaml::from_str(&compiled.yaml)?;
    let jobs = doc["jobs"].as_mapping().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(doc["jobs"]["agent"]["needs"], Value::from("activation"));
    Ok(())
}

#[test]
fn test_gated_effect_waits_for_detection() -> Result<()> {
    let compiled = compile(GATED)?;
    assert_eq!(
        compiled.graph.names(),
        vec!["activation", "agent", "detection", "create_issue"]
    );
    assert_acyclic(&compiled);

    let doc: Value = serde_yaml::from_str(&compiled.yaml)?;
    let guard = doc["jobs"]["create_issue"]["if"].as_str().unwrap();
    assert!(guard.contains("needs.detection.outputs.success == 'true'"));
    assert!(guard.contains("needs.agent.outputs.output_types"));
    assert_eq!(
        doc["jobs"]["create_issue"]["permissions"]["issues"],
        Value::from("write")
    );
    assert_eq!(
        doc["jobs"]["detection"]["permissions"]["contents"],
        Value::from("read")
    );
    Ok(())
}

#[test]
fn test_staged_mode_changes_only_the_flag() -> Result<()> {
    let live = compile(GATED)?;
    let staged = compile(&GATED.replace("safe-outputs:\n", "safe-outputs:\n  staged: true\n"))?;

    assert_eq!(live.graph.names(), staged.graph.names());
    let live_job = live.graph.get("create_issue").unwrap();
    let staged_job = staged.graph.get("create_issue").unwrap();
    assert_eq!(live_job.env["AW_SAFE_OUTPUTS_STAGED"], "false");
    assert_eq!(staged_job.env["AW_SAFE_OUTPUTS_STAGED"], "true");
    assert_eq!(live_job.steps, staged_job.steps);
    assert_eq!(live_job.permissions, staged_job.permissions);
    Ok(())
}

#[test]
fn test_unknown_effect_kind_blocks_emission() -> Result<()> {
    let ctx = TestContext::new()?;
    let raw = "---\non: push\nsafe-outputs:\n  create-isue:\n  add-labels:\n    max: 0\n---\nGo.\n";
    let err = compile_with(&ctx, "typo.md", raw, &OfflineSource).unwrap_err();

    match err {
        Error::Validation(errors) => {
            assert_eq!(errors.len(), 2, "both problems are reported: {errors}");
            let unknown = errors
                .with_code(ErrorCode::VALIDATION_UNKNOWN_EFFECT_KIND)
                .next()
                .unwrap();
            assert_eq!(unknown.suggestion.as_deref(), Some("create-issue"));
        }
        other => panic!("expected validation errors, got {other}"),
    }
    assert!(!lock_file_path(&ctx.path().join("typo.md")).exists());
    Ok(())
}

#[test]
fn test_compiling_twice_is_byte_identical() -> Result<()> {
    let raw = "---
on:
  issues:
    types: [labeled]
    names: [needs-triage]
  stop-after: \"2030-01-01\"
env:
  ZED: last
  ALPHA: first
tools:
  github:
    toolsets: [issues]
  web-fetch:
network:
  allowed: [docs.rs, crates.io]
safe-outputs:
  add-labels:
    allowed: [bug, enhancement]
  add-comment:
    max: 2
  create-issue:
---
Label the issue and explain why.
";
    let first = compile(raw)?;
    let second = compile(raw)?;
    assert_eq!(first.yaml, second.yaml);
    assert_acyclic(&first);
    Ok(())
}

#[test]
fn test_agent_never_gets_writes_from_safe_outputs() -> Result<()> {
    let with_outputs = compile(
        "---\non: issues\nsafe-outputs:\n  create-issue:\n  add-comment:\n  create-pull-request:\n  update-issue:\n---\nDo everything.\n",
    )?;
    let agent = with_outputs.graph.get("agent").unwrap();
    assert!(!agent.permissions.has_write());
    for job in with_outputs.graph.jobs() {
        if job.name != "agent" && job.name != "activation" && job.name != "detection" {
            assert!(job.permissions.has_write(), "{} should hold its own write", job.name);
        }
    }

    let with_tool = compile(
        "---\non: issues\npermissions:\n  issues: write\ntools:\n  github:\n    toolsets: [issues]\n    read-only: false\n---\nManage issues directly.\n",
    )?;
    let agent = with_tool.graph.get("agent").unwrap();
    let writes: Vec<_> = agent.permissions.writes().collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        agent.permissions.level(writes[0]),
        PermissionLevel::Write
    );
    Ok(())
}

#[test]
fn test_remote_imports_share_one_cache_entry() -> Result<()> {
    let ctx = TestContext::new()?;
    let sha = "cccccccccccccccccccccccccccccccccccccccc";
    let remote = MemoryRemoteSource::new();
    remote.add_revision("acme/agents", "main", sha);
    remote.add_revision("acme/agents", "v1", sha);
    remote.add_file(
        "acme/agents",
        sha,
        "shared/tone.md",
        "---\ntools:\n  edit:\n---\nBe concise.\n",
    );
    let raw = "---
on: push
imports:
  - acme/agents/shared/tone.md@main
  - acme/agents/shared/tone.md@v1
---
Review the change.
";
    let path = ctx.write("review.md", raw)?;
    let config = CompilerConfig::default();
    let cache = ImportCache::in_memory();
    let compiled = Compiler::new(&config).compile_file(&path, &cache, &remote)?;

    assert_eq!(cache.len(), 1);
    assert_eq!(remote.fetch_count(), 1);
    assert!(compiled.yaml.contains(&sha[..12]));
    Ok(())
}

#[test]
fn test_import_cycle_fails_the_compile() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.write("shared/a.md", "---\nimports: [b.md]\n---\nA\n")?;
    ctx.write("shared/b.md", "---\nimports: [a.md]\n---\nB\n")?;
    let err = compile_with(
        &ctx,
        "main.md",
        "---\non: push\nimports: [shared/a.md]\n---\nMain\n",
        &OfflineSource,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IMPORT_CYCLE);
    Ok(())
}
