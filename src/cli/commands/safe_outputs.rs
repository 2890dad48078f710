//! Safe-outputs runtime commands
//!
//! `collect`, `emit` and `serve` run inside the agent job and never hold a
//! write credential. `apply` runs inside an effect job; `verdict` inside the
//! detection job.

use crate::model::EffectKind;
use crate::safe_outputs::report::write_outputs;
use crate::safe_outputs::{
    collect, load_declarations, parse_effect_config, EventContext, GitHubBackend, McpServer, Processor,
    SafeOutputsLog, SafeOutputsWriter, ThreatVerdict,
};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct ApplyParams {
    pub kind: String,
    pub log: PathBuf,
    pub config: String,
    pub patch: Option<PathBuf>,
    pub staged: bool,
}

fn github_output() -> Option<PathBuf> {
    std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from)
}

fn step_summary() -> Option<PathBuf> {
    std::env::var_os("GITHUB_STEP_SUMMARY").map(PathBuf::from)
}

fn publish_outputs(outputs: &BTreeMap<String, String>) -> Result<()> {
    if let Some(path) = github_output() {
        write_outputs(&path, outputs).with_context(|| format!("Failed to write outputs to {}", path.display()))?;
    }
    for (key, value) in outputs {
        println!("{key}={value}");
    }
    Ok(())
}

pub fn run_collect(log: &Path, config: &Path, output: &Path, patch: Option<&Path>) -> Result<()> {
    let declarations = load_declarations(config)?;
    let summary = collect(&SafeOutputsLog::new(log), &declarations, output, patch)
        .with_context(|| format!("Failed to collect {}", log.display()))?;
    for rejected in &summary.rejected {
        warn!("rejected {}", rejected);
    }
    publish_outputs(&summary.outputs())
}

pub fn run_emit(request: &str, log: &Path, config: &Path) -> Result<()> {
    let value: Value = serde_json::from_str(request).context("Request must be a JSON object")?;
    let writer = SafeOutputsWriter::new(SafeOutputsLog::new(log), load_declarations(config)?);
    let recorded = writer.emit(value)?;
    println!("Recorded {}", recorded.summary());
    Ok(())
}

pub fn run_serve(log: &Path, config: &Path) -> Result<()> {
    let declarations = load_declarations(config)?;
    info!("serving {} safe-output tool(s)", declarations.len());
    let server = McpServer::new(SafeOutputsWriter::new(SafeOutputsLog::new(log), declarations));
    let stdin = io::stdin();
    server
        .serve(stdin.lock(), io::stdout())
        .context("MCP transport failed")
}

pub fn run_apply(params: ApplyParams) -> Result<()> {
    let kind = EffectKind::from_key(&params.kind).ok_or_else(|| anyhow!("Unknown effect kind `{}`", params.kind))?;
    let mut declaration = parse_effect_config(&params.config)?;
    if declaration.kind != kind {
        bail!(
            "Effect config is for {} but this job applies {}",
            declaration.kind.key(),
            kind.key()
        );
    }
    declaration.staged |= params.staged;

    let contents = SafeOutputsLog::new(&params.log)
        .read()
        .with_context(|| format!("Failed to read {}", params.log.display()))?;
    let context = EventContext::from_env();
    let mut processor = Processor::new(&declaration, &context);
    if let Some(patch) = &params.patch {
        processor = processor.with_patch(patch);
    }

    let report = if declaration.staged {
        processor.preview(&contents)
    } else {
        let backend = GitHubBackend::from_env(crate::config::DEFAULT_GITHUB_API_URL)?;
        processor.run(&contents, &backend)
    };

    if let Some(path) = step_summary() {
        report
            .write_step_summary(&path)
            .with_context(|| format!("Failed to write step summary to {}", path.display()))?;
    }
    publish_outputs(&report.outputs())?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_success() {
        bail!("{} of the {} request(s) failed", report.failures.len(), kind.key());
    }
    Ok(())
}

pub fn run_verdict(log: &Path) -> Result<()> {
    let text = match fs::read_to_string(log) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", log.display())),
    };

    let verdict = ThreatVerdict::from_log(&text);
    let success = matches!(&verdict, Ok(v) if v.is_safe());
    let mut outputs = BTreeMap::new();
    outputs.insert("success".to_string(), success.to_string());
    publish_outputs(&outputs)?;

    match verdict {
        Ok(verdict) if verdict.is_safe() => {
            info!("no threats detected");
            Ok(())
        }
        Ok(verdict) => {
            for reason in &verdict.reasons {
                warn!("{}", reason);
            }
            bail!("Threats detected: {}", verdict.threats().join(", "))
        }
        Err(e) => Err(e).context("Detection produced no usable verdict"),
    }
}
