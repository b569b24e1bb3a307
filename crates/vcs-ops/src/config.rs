use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VcsError};

/// Output format of a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffFormat {
    #[default]
    Unified,
    Context,
    Standard,
}

/// Engine tunables, loadable from TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ask logical models to widen selections
    pub consult_models: bool,
    pub diff_format: DiffFormat,
    /// Maximum number of files per server diff invocation
    pub max_diff_arguments: usize,
    /// How often a blocked lock acquisition re-checks cancellation
    pub lock_poll_interval_ms: u64,
    /// Forward server output to the console listener
    pub output_to_console: bool,
    /// Remove folders left empty by replace operations
    pub prune_empty_directories: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consult_models: true,
            diff_format: DiffFormat::Unified,
            max_diff_arguments: 100,
            lock_poll_interval_ms: 50,
            output_to_console: true,
            prune_empty_directories: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| VcsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_diff_arguments == 0 {
            return Err(VcsError::Config("max_diff_arguments must be at least 1".into()));
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(VcsError::Config("lock_poll_interval_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn lock_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("diff_format = \"context\"\n").unwrap();
        assert_eq!(config.diff_format, DiffFormat::Context);
        assert_eq!(config.max_diff_arguments, 100);
        assert!(config.consult_models);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml_str("max_diff_arguments = 0").is_err());
        assert!(EngineConfig::from_toml_str("diff_format = \"fancy\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prune_empty_directories = false").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert!(!config.prune_empty_directories);
        assert!(EngineConfig::load(Path::new("/nonexistent/engine.toml")).is_err());
    }
}
