use super::CompilerConfig;
use crate::error::{Error, ErrorCode, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_DIR: &str = ".aw";
const CONFIG_FILE: &str = "config.toml";

/// Loads [`CompilerConfig`] for a repository
pub struct ConfigLoader {
    root: PathBuf,
}

impl ConfigLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the project configuration file
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load the project file (if any) and apply environment overrides
    pub fn load(&self) -> Result<CompilerConfig> {
        let mut config = match self.read_file(&self.config_path())? {
            Some(config) => config,
            None => CompilerConfig::default(),
        };
        config.merge_env_vars();
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> Result<Option<CompilerConfig>> {
        if !path.exists() {
            debug!("No config file at {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::config_at(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("failed to read {}", path.display()),
                path,
            )
            .with_source(e)
        })?;

        let config = toml::from_str::<CompilerConfig>(&content).map_err(|e| {
            Error::config_at(
                ErrorCode::CONFIG_PARSE_ERROR,
                format!("invalid TOML in {}", path.display()),
                path,
            )
            .with_source(e)
        })?;

        debug!("Loaded config from {}", path.display());
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigLoader::new(temp.path()).load().unwrap();
        assert_eq!(config.runtime_command, "aw");
    }

    #[test]
    fn test_loads_project_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".aw")).unwrap();
        fs::write(
            temp.path().join(".aw/config.toml"),
            "runtime-command = \"aw-dev\"\nstrict = true\n",
        )
        .unwrap();

        let config = ConfigLoader::new(temp.path()).load().unwrap();
        assert_eq!(config.runtime_command, "aw-dev");
        assert!(config.strict);
    }

    #[test]
    fn test_invalid_toml_is_reported_with_code() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".aw")).unwrap();
        fs::write(temp.path().join(".aw/config.toml"), "runs-on = [").unwrap();

        let err = ConfigLoader::new(temp.path()).load().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_PARSE_ERROR);
    }
}
