//! Integration tests for the `aw` binary
//!
//! Compile-time commands run against a temporary repository; runtime
//! commands run with the environment a generated job would provide.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const TRIAGE: &str = "---
on:
  issues:
    types: [opened]
safe-outputs:
  add-labels:
    allowed: [bug, question]
  add-comment:
---
# Issue triage

Label the new issue and leave a short comment explaining the label.
";

fn aw(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("aw").unwrap();
    cmd.env("AW_CACHE_DIR", root.join(".cache"))
        .env_remove("GITHUB_OUTPUT")
        .env_remove("GITHUB_STEP_SUMMARY")
        .arg("-C")
        .arg(root);
    cmd
}

fn repo_with(name: &str, content: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(".github/workflows");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
    temp
}

#[test]
fn test_cli_help_flag() {
    Command::cargo_bin("aw")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("safe-outputs"));
}

#[test]
fn test_invalid_command() {
    Command::cargo_bin("aw")
        .unwrap()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_compile_writes_lock_file_and_check_detects_drift() {
    let repo = repo_with("triage.md", TRIAGE);
    let source = repo.path().join(".github/workflows/triage.md");
    let lock = repo.path().join(".github/workflows/triage.lock.yml");

    aw(repo.path())
        .args(["compile", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("triage.lock.yml"));
    let rendered = fs::read_to_string(&lock).unwrap();
    assert!(rendered.starts_with("# This file was generated by aw"));
    assert!(rendered.contains("add_labels:"));

    aw(repo.path())
        .args(["compile", "--offline", "--check"])
        .assert()
        .success();

    fs::write(&source, TRIAGE.replace("short comment", "long comment")).unwrap();
    aw(repo.path())
        .args(["compile", "--offline", "--check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[E5006]"));
    assert_eq!(fs::read_to_string(&lock).unwrap(), rendered);
}

#[test]
fn test_validate_reports_every_error() {
    let repo = repo_with(
        "broken.md",
        "---\non: push\npermissions:\n  issues: write\nsafe-outputs:\n  create-isue:\n---\nGo.\n",
    );
    aw(repo.path())
        .args(["validate", "--offline"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[E4004]"))
        .stderr(predicate::str::contains("create-issue"))
        .stderr(predicate::str::contains("[E4005]"));
    assert!(!repo.path().join(".github/workflows/broken.lock.yml").exists());
}

#[test]
fn test_graph_prints_mermaid() {
    let repo = repo_with("triage.md", TRIAGE);
    aw(repo.path())
        .args(["graph", "--offline"])
        .arg(repo.path().join(".github/workflows/triage.md"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("graph LR"))
        .stdout(predicate::str::contains("agent --> detection"));
}

#[test]
fn test_emit_collect_and_staged_apply() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.json");
    let raw = temp.path().join("outputs.jsonl");
    let sanitized = temp.path().join("agent_output.jsonl");
    let outputs = temp.path().join("github_output");
    fs::write(&config, r#"[{"kind":"create-issue","max":1}]"#).unwrap();

    aw(temp.path())
        .args(["safe-outputs", "emit", r#"{"type":"create_issue","title":"Docs gap","body":"Explain @config"}"#])
        .env("AW_SAFE_OUTPUTS", &raw)
        .env("AW_SAFE_OUTPUTS_CONFIG", &config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Docs gap"));

    aw(temp.path())
        .args(["safe-outputs", "emit", r#"{"type":"close-issue"}"#])
        .env("AW_SAFE_OUTPUTS", &raw)
        .env("AW_SAFE_OUTPUTS_CONFIG", &config)
        .assert()
        .failure();

    aw(temp.path())
        .args(["safe-outputs", "collect", "--output"])
        .arg(&sanitized)
        .env("AW_SAFE_OUTPUTS", &raw)
        .env("AW_SAFE_OUTPUTS_CONFIG", &config)
        .env("GITHUB_OUTPUT", &outputs)
        .assert()
        .success();
    let written = fs::read_to_string(&outputs).unwrap();
    assert!(written.contains("output_types=,create-issue,"));
    assert!(written.contains("has_patch=false"));
    assert!(fs::read_to_string(&sanitized).unwrap().contains("`@config`"));

    aw(temp.path())
        .args(["safe-outputs", "apply", "--kind", "create-issue"])
        .env("AW_SAFE_OUTPUTS", &sanitized)
        .env("AW_EFFECT_CONFIG", r#"{"kind":"create-issue","max":1,"staged":true}"#)
        .env_remove("GITHUB_TOKEN")
        .env_remove("GITHUB_REPOSITORY")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"staged\": true"))
        .stdout(predicate::str::contains("Docs gap"));
}

#[test]
fn test_apply_rejects_mismatched_kind() {
    let temp = TempDir::new().unwrap();
    aw(temp.path())
        .args(["safe-outputs", "apply", "--kind", "add-labels"])
        .env("AW_SAFE_OUTPUTS", temp.path().join("missing.jsonl"))
        .env("AW_EFFECT_CONFIG", r#"{"kind":"create-issue","max":1}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("add-labels"));
}

#[test]
fn test_verdict_gates_on_threats() {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("detection.log");
    let outputs = temp.path().join("github_output");

    fs::write(
        &log,
        "thinking...\nTHREAT_DETECTION_RESULT:{\"prompt_injection\":false,\"secret_leak\":true,\"malicious_patch\":false,\"reasons\":[\"token in body\"]}\n",
    )
    .unwrap();
    aw(temp.path())
        .args(["safe-outputs", "verdict", "--log"])
        .arg(&log)
        .env("GITHUB_OUTPUT", &outputs)
        .assert()
        .failure()
        .stderr(predicate::str::contains("secret"));
    assert_eq!(fs::read_to_string(&outputs).unwrap(), "success=false\n");

    fs::remove_file(&outputs).unwrap();
    aw(temp.path())
        .args(["safe-outputs", "verdict", "--log"])
        .arg(temp.path().join("never-written.log"))
        .env("GITHUB_OUTPUT", &outputs)
        .assert()
        .failure();
    assert_eq!(fs::read_to_string(&outputs).unwrap(), "success=false\n");
}

#[test]
fn test_activation_check_writes_output() {
    let temp = TempDir::new().unwrap();
    let outputs = temp.path().join("github_output");

    aw(temp.path())
        .args(["activation", "check"])
        .env("AW_COMMAND", "/triage")
        .env("AW_EVENT_BODY", "/triage please")
        .env_remove("AW_LABEL_NAMES")
        .env_remove("AW_STOP_AFTER")
        .env("GITHUB_OUTPUT", &outputs)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&outputs).unwrap(), "activated=true\n");

    fs::remove_file(&outputs).unwrap();
    aw(temp.path())
        .args(["activation", "check"])
        .env("AW_STOP_AFTER", "2001-01-01 00:00:00")
        .env_remove("AW_COMMAND")
        .env("GITHUB_OUTPUT", &outputs)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&outputs).unwrap(), "activated=false\n");
}
