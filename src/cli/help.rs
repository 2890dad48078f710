//! Help text generation and utilities

use crate::cli::args::Cli;
use clap::CommandFactory;

/// Generate comprehensive help text for the CLI
pub fn generate_help() -> String {
    Cli::command().render_help().to_string()
}

/// Generate usage information for a specific command
pub fn generate_command_help(command: &str) -> anyhow::Result<String> {
    let mut cmd = Cli::command();

    if let Some(subcommand) = cmd.find_subcommand_mut(command) {
        Ok(subcommand.render_help().to_string())
    } else {
        Err(anyhow::anyhow!("Command '{}' not found", command))
    }
}

/// Get the log filter for a verbosity level
pub fn get_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,reqwest=debug", // -vvv shows everything including dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert_eq!(get_log_level(0), "info");
        assert_eq!(get_log_level(1), "debug");
        assert_eq!(get_log_level(2), "trace");
        assert!(get_log_level(5).starts_with("trace"));
    }

    #[test]
    fn test_command_help() {
        assert!(generate_help().contains("compile"));
        assert!(generate_command_help("safe-outputs").unwrap().contains("apply"));
        assert!(generate_command_help("nope").is_err());
    }
}
