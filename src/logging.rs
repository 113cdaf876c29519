//! Environment-aware structured logging setup.
//!
//! Verbosity follows the engine environment (development/testing/production);
//! `ACTION_ENGINE_LOG` overrides the derived filter.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Environment;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize tracing for the given environment.
///
/// Safe to call more than once; if a global subscriber is already installed
/// (embedding applications, test harnesses) the existing one is kept.
pub fn init_logging(environment: Environment) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("ACTION_ENGINE_LOG")
            .unwrap_or_else(|_| default_log_level(environment).to_string());

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::new(filter.clone())),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            filter = %filter,
            "Structured logging initialized"
        );
    });
}

/// Diagnostic verbosity for an environment.
pub fn default_log_level(environment: Environment) -> &'static str {
    match environment {
        Environment::Development => "debug",
        Environment::Testing => "debug",
        Environment::Production => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(default_log_level(Environment::Development), "debug");
        assert_eq!(default_log_level(Environment::Testing), "debug");
        assert_eq!(default_log_level(Environment::Production), "info");
    }
}
