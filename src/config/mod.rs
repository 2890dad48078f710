//! Compiler settings
//!
//! Settings come from `.aw/config.toml` under the repository root and are
//! then overridden by `AW_*` environment variables. Everything has a
//! working default so a bare checkout compiles without any file present.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod loader;

pub use loader::ConfigLoader;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_RUNS_ON: &str = "ubuntu-latest";
pub const DEFAULT_RUNTIME_COMMAND: &str = "aw";
pub const DEFAULT_RUNTIME_INSTALL: &str = "cargo install agentic-workflows --locked";

/// Get the per-user cache directory used for remote imports
pub fn get_global_cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("dev", "agentic-workflows", "aw").map(|dirs| dirs.cache_dir().join("imports"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompilerConfig {
    /// Where remote imports are cached; falls back to the per-user cache dir
    pub cache_dir: Option<PathBuf>,
    pub github_api_url: String,
    /// Default runner label for generated jobs
    pub runs_on: String,
    /// Engine used when a workflow does not pick one
    pub default_engine: Option<String>,
    /// Shell command that installs the runtime binary inside generated jobs
    pub runtime_install: String,
    /// Name of the runtime binary invoked by generated steps
    pub runtime_command: String,
    pub strict: bool,
    pub actions: ActionPins,
}

/// Versions of the third-party actions referenced by generated steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ActionPins {
    pub checkout: String,
    pub upload_artifact: String,
    pub download_artifact: String,
    pub setup_node: String,
}

impl Default for ActionPins {
    fn default() -> Self {
        Self {
            checkout: "actions/checkout@v5".to_string(),
            upload_artifact: "actions/upload-artifact@v4".to_string(),
            download_artifact: "actions/download-artifact@v5".to_string(),
            setup_node: "actions/setup-node@v4".to_string(),
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            runs_on: DEFAULT_RUNS_ON.to_string(),
            default_engine: None,
            runtime_install: DEFAULT_RUNTIME_INSTALL.to_string(),
            runtime_command: DEFAULT_RUNTIME_COMMAND.to_string(),
            strict: false,
            actions: ActionPins::default(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_env_vars(&mut self) {
        if let Ok(dir) = std::env::var("AW_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }

        if let Ok(engine) = std::env::var("AW_DEFAULT_ENGINE") {
            self.default_engine = Some(engine);
        }

        if let Ok(runs_on) = std::env::var("AW_RUNS_ON") {
            self.runs_on = runs_on;
        }

        if let Ok(url) = std::env::var("AW_GITHUB_API_URL") {
            self.github_api_url = url;
        }

        if let Ok(install) = std::env::var("AW_RUNTIME_INSTALL") {
            self.runtime_install = install;
        }

        if let Ok(strict) = std::env::var("AW_STRICT") {
            if let Ok(value) = strict.parse::<bool>() {
                self.strict = value;
            }
        }
    }

    /// Cache directory for remote imports, if one can be determined
    pub fn get_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(get_global_cache_dir)
    }

    pub fn get_default_engine(&self) -> &str {
        self.default_engine.as_deref().unwrap_or("claude")
    }
}
