//! Locating and loading TOML configuration files

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use vcs_ops::EngineConfig;

use crate::UtilsError;

const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "vcs-ops", "vcs-ops")
}

/// Per-user configuration directory
pub fn config_dir() -> Result<PathBuf, UtilsError> {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(UtilsError::NoConfigDir)
}

/// Default location of the engine configuration file
pub fn config_file() -> Result<PathBuf, UtilsError> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Read `path` as TOML, or `T::default()` when the file does not exist
pub fn load_or_default<T>(path: &Path) -> Result<T, UtilsError>
where
    T: DeserializeOwned + Default,
{
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    toml::from_str(&text).map_err(|e| UtilsError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Engine configuration from `path`, or from the per-user file when `None`
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig, UtilsError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file()?,
    };
    let config: EngineConfig = load_or_default(&path)?;
    config.validate()?;
    tracing::info!("Loaded engine configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vcs_ops::DiffFormat;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config: EngineConfig = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "diff_format = \"context\"\nmax_diff_arguments = 7\n").unwrap();

        let config = load_engine_config(Some(&path)).unwrap();
        assert_eq!(config.diff_format, DiffFormat::Context);
        assert_eq!(config.max_diff_arguments, 7);
        assert!(config.prune_empty_directories);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "lock_poll_interval_ms = 0\n").unwrap();
        assert!(matches!(
            load_engine_config(Some(&path)),
            Err(UtilsError::Vcs(_))
        ));

        fs::write(&path, "diff_format = [").unwrap();
        assert!(matches!(
            load_engine_config(Some(&path)),
            Err(UtilsError::Parse { .. })
        ));
    }
}
