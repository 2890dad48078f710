//! Activation check command

use crate::activation::check_from_env;
use crate::safe_outputs::report::write_outputs;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Decide whether the agent runs and publish `activated`
pub fn run_activation_check() -> Result<()> {
    let decision = check_from_env(Utc::now())?;
    let mut outputs = BTreeMap::new();
    outputs.insert("activated".to_string(), decision.activated.to_string());
    if let Some(path) = std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from) {
        write_outputs(&path, &outputs).with_context(|| format!("Failed to write outputs to {}", path.display()))?;
    }
    println!("activated={} ({})", decision.activated, decision.reason);
    Ok(())
}
