//! Process-level helpers shared by binaries and services: tracing setup and
//! configuration file discovery.

pub mod config;
pub mod logging;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UtilsError {
    #[error(transparent)]
    Vcs(#[from] vcs_ops::VcsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration in {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("Failed to set up logging: {0}")]
    Logging(String),
    #[error("Could not determine the user configuration directory")]
    NoConfigDir,
}
