//! Tracing setup for applications embedding the Parley sync layer.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to every
//! Parley crate and dependencies stay at `warn`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::ParleyError;

const PARLEY_TARGETS: &[&str] = &[
    "parley_core",
    "parley_presence",
    "parley_messaging",
    "parley_hub",
    "parley_client",
];

/// Build the filter directive string for a configured level.
pub fn default_directives(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        PARLEY_TARGETS
            .iter()
            .map(|target| format!("{target}={level}")),
    );
    directives.join(",")
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ParleyError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives(&config.level))
            .map_err(|e| ParleyError::Telemetry(e.to_string())),
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), ParleyError> {
    let filter = build_filter(config)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ParleyError::Telemetry(e.to_string()))?;

    tracing::debug!(level = %config.level, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_every_crate() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("warn,"));
        for target in PARLEY_TARGETS {
            assert!(directives.contains(&format!("{target}=debug")));
        }
    }

    #[test]
    fn default_directives_parse_as_filter() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }

    #[test]
    fn second_init_reports_error_instead_of_panicking() {
        let config = LoggingConfig::default();
        assert!(init(&config).is_ok());
        assert!(init(&config).is_err());
    }
}
