//! CLI command handlers
//!
//! This module contains all CLI-related functionality including:
//! - Argument parsing structures
//! - Command implementations
//! - Help text generation

pub mod args;
pub mod commands;
pub mod help;
pub mod router;

pub use args::{Cli, Commands};
pub use help::{generate_command_help, generate_help, get_log_level};
pub use router::execute_command;
