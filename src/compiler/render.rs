//! Deterministic pipeline rendering
//!
//! The same model always renders to the same bytes: maps are ordered,
//! jobs follow the graph order, and the header carries no timestamp.

use super::graph::JobGraph;
use super::expressions::wrap;
use crate::error::{Error, ErrorCode, Result};
use crate::model::WorkflowModel;
use serde_yaml::{Mapping, Value};

pub const GENERATED_NOTICE: &str =
    "# This file was generated by aw (agentic-workflows). Do not edit it by hand.";

pub fn header(model: &WorkflowModel) -> String {
    let mut header = String::new();
    header.push_str(GENERATED_NOTICE);
    header.push('\n');
    header.push_str(&format!("# Regenerate with: aw compile {}\n", model.source.file));
    header.push_str("#\n");
    header.push_str(&format!("# Source: {}\n", model.source.file));
    if !model.source.imports.is_empty() {
        header.push_str("# Imports:\n");
        for import in &model.source.imports {
            header.push_str(&format!("#   - {import}\n"));
        }
    }
    header.push('\n');
    header
}

fn default_concurrency() -> Value {
    let mut concurrency = Mapping::new();
    concurrency.insert(
        "group".into(),
        format!("aw-{}", wrap("github.workflow")).into(),
    );
    Value::Mapping(concurrency)
}

/// Top-level document with jobs in graph order
pub fn document(model: &WorkflowModel, graph: &JobGraph) -> Value {
    let mut root = Mapping::new();
    root.insert("name".into(), model.name.clone().into());
    root.insert("on".into(), model.triggers.to_yaml());
    root.insert("permissions".into(), Value::Mapping(Mapping::new()));
    root.insert(
        "concurrency".into(),
        model.concurrency.clone().unwrap_or_else(default_concurrency),
    );
    if !model.env.is_empty() {
        let env: Mapping = model
            .env
            .iter()
            .map(|(k, v)| (Value::from(k.clone()), Value::from(v.clone())))
            .collect();
        root.insert("env".into(), Value::Mapping(env));
    }
    let jobs: Mapping = graph
        .jobs()
        .map(|job| (Value::from(job.name.clone()), job.to_yaml()))
        .collect();
    root.insert("jobs".into(), Value::Mapping(jobs));
    Value::Mapping(root)
}

pub fn render(model: &WorkflowModel, graph: &JobGraph) -> Result<String> {
    let body = serde_yaml::to_string(&document(model, graph)).map_err(|e| {
        Error::compile(
            ErrorCode::COMPILE_SERIALIZATION,
            format!("failed to serialize pipeline: {e}"),
        )
    })?;
    Ok(format!("{}{}", header(model), body))
}
