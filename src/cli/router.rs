//! Command routing and execution

use crate::cli::args::{ActivationCommands, Commands, SafeOutputsCommands};
use crate::cli::commands::*;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Execute a CLI command based on the parsed arguments
pub fn execute_command(command: Commands, root: Option<PathBuf>) -> Result<()> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    match command {
        Commands::Compile {
            paths,
            check,
            output,
            offline,
        } => run_compile(CompileParams {
            root,
            paths,
            check,
            output,
            offline,
        }),
        Commands::Validate { paths, offline } => run_validate(&root, paths, offline),
        Commands::Graph { workflow, offline } => run_graph(&root, &workflow, offline),
        Commands::SafeOutputs { command } => route_safe_outputs(command),
        Commands::Activation {
            command: ActivationCommands::Check,
        } => run_activation_check(),
    }
}

fn route_safe_outputs(command: SafeOutputsCommands) -> Result<()> {
    match command {
        SafeOutputsCommands::Collect {
            log,
            config,
            output,
            patch,
        } => run_collect(&log, &config, &output, patch.as_deref()),
        SafeOutputsCommands::Emit {
            request,
            log,
            config,
        } => run_emit(&request, &log, &config),
        SafeOutputsCommands::Serve { log, config } => run_serve(&log, &config),
        SafeOutputsCommands::Apply {
            kind,
            log,
            config,
            patch,
            staged,
        } => run_apply(ApplyParams {
            kind,
            log,
            config,
            patch,
            staged,
        }),
        SafeOutputsCommands::Verdict { log } => run_verdict(&log),
    }
}
