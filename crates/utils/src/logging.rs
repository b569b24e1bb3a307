//! Tracing subscriber setup

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::UtilsError;

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn parse_filter(directives: &str) -> Result<EnvFilter, UtilsError> {
    EnvFilter::try_new(directives).map_err(|e| UtilsError::Logging(e.to_string()))
}

/// Filter from `RUST_LOG`, falling back to `default_filter`
fn env_filter(default_filter: &str) -> Result<EnvFilter, UtilsError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => parse_filter(default_filter),
    }
}

/// Install a compact stderr subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) -> Result<(), UtilsError> {
    init_tracing_with(LogFormat::Compact, default_filter)
}

pub fn init_tracing_with(format: LogFormat, default_filter: &str) -> Result<(), UtilsError> {
    let filter = env_filter(default_filter)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
    };
    installed.map_err(|e| UtilsError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert!(parse_filter("vcs_ops=debug,services=info").is_ok());
        assert!(matches!(
            parse_filter("vcs_ops=loudest"),
            Err(UtilsError::Logging(_))
        ));
    }

    #[test]
    fn test_second_init_fails_cleanly() {
        let _ = init_tracing("warn");
        assert!(init_tracing("warn").is_err());
    }
}
