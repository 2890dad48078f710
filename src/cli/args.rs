//! CLI argument structures
//!
//! This module defines the command-line interface of `aw`: the compile-time
//! commands used by workflow authors and the runtime commands invoked from
//! generated jobs.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Compile agentic workflow documents into least-privilege CI pipelines
#[derive(Parser)]
#[command(name = "aw")]
#[command(about = "aw - Compile agentic workflows into least-privilege CI pipelines", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Repository root holding `.aw/config.toml` (defaults to current directory)
    #[arg(short = 'C', long = "root", global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile workflow documents into `.lock.yml` pipelines
    #[command(name = "compile")]
    Compile {
        /// Workflow files or directories to compile (defaults to `.github/workflows`)
        paths: Vec<PathBuf>,

        /// Fail if a lock file is missing or out of date instead of writing it
        #[arg(long)]
        check: bool,

        /// Write the pipeline here instead of beside the source (single file only)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Fail on remote imports instead of fetching them
        #[arg(long)]
        offline: bool,
    },

    /// Validate workflow documents without writing anything
    #[command(name = "validate")]
    Validate {
        /// Workflow files or directories to validate (defaults to `.github/workflows`)
        paths: Vec<PathBuf>,

        /// Fail on remote imports instead of fetching them
        #[arg(long)]
        offline: bool,
    },

    /// Print the job graph of a workflow as a mermaid diagram
    #[command(name = "graph")]
    Graph {
        /// Workflow file
        workflow: PathBuf,

        /// Fail on remote imports instead of fetching them
        #[arg(long)]
        offline: bool,
    },

    /// Runtime commands for the safe-outputs channel
    #[command(name = "safe-outputs")]
    SafeOutputs {
        #[command(subcommand)]
        command: SafeOutputsCommands,
    },

    /// Runtime commands for the activation job
    #[command(name = "activation")]
    Activation {
        #[command(subcommand)]
        command: ActivationCommands,
    },
}

#[derive(Subcommand)]
pub enum SafeOutputsCommands {
    /// Validate and sanitize the raw log at the end of the agent job
    Collect {
        /// Raw log written by the mediator
        #[arg(long, env = "AW_SAFE_OUTPUTS")]
        log: PathBuf,

        /// Declarations file
        #[arg(long, env = "AW_SAFE_OUTPUTS_CONFIG")]
        config: PathBuf,

        /// Where to write the sanitized log
        #[arg(long)]
        output: PathBuf,

        /// Patch produced for create-pull-request, if any
        #[arg(long)]
        patch: Option<PathBuf>,
    },

    /// Append one request to the log
    Emit {
        /// Request as a JSON object with a `type` field
        request: String,

        #[arg(long, env = "AW_SAFE_OUTPUTS")]
        log: PathBuf,

        #[arg(long, env = "AW_SAFE_OUTPUTS_CONFIG")]
        config: PathBuf,
    },

    /// Serve the declared effect kinds as MCP tools over stdio
    Serve {
        #[arg(long, env = "AW_SAFE_OUTPUTS")]
        log: PathBuf,

        #[arg(long, env = "AW_SAFE_OUTPUTS_CONFIG")]
        config: PathBuf,
    },

    /// Apply the requests of one effect kind
    Apply {
        /// Effect kind handled by this job (e.g. `create-issue`)
        #[arg(long)]
        kind: String,

        /// Sanitized log produced by `collect`
        #[arg(long, env = "AW_SAFE_OUTPUTS")]
        log: PathBuf,

        /// JSON of the declaration this job applies
        #[arg(long, env = "AW_EFFECT_CONFIG")]
        config: String,

        #[arg(long, env = "AW_PATCH_FILE")]
        patch: Option<PathBuf>,

        /// Preview instead of applying, whatever the declaration says
        #[arg(long, env = "AW_SAFE_OUTPUTS_STAGED")]
        staged: bool,
    },

    /// Turn the detection engine's log into a pass/fail verdict
    Verdict {
        #[arg(long)]
        log: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ActivationCommands {
    /// Evaluate label, command and stop-after filters for this event
    Check,
}
