//! Engine configuration.
//!
//! Built programmatically with `with_*` setters or overlaid from the
//! process environment. Validation runs before the first store connection.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{ACTION_TTL_MS, EVENT_TTL_MS};
use crate::error::{EngineError, Result};

/// Deployment environment, used only for diagnostic verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Testing => write!(f, "testing"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "development" => Ok(Self::Development),
            "testing" => Ok(Self::Testing),
            "production" => Ok(Self::Production),
            _ => Err(format!("Invalid environment: {s}")),
        }
    }
}

/// Configuration for one engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store connection URL.
    pub store_url: String,

    /// Store database index; keyspace-notification channels embed it.
    pub database: i64,

    /// Human-readable engine name, recorded in action/event origin metadata.
    pub engine_name: String,

    /// Queue every stored action configuration is bound to by default.
    pub default_queue_name: String,

    /// Action hash TTL in milliseconds.
    pub action_ttl_ms: i64,

    /// Event hash / retention-index TTL in milliseconds.
    pub event_ttl_ms: i64,

    /// Deployment environment (diagnostic verbosity only).
    pub environment: Environment,

    /// Whether init installs the auto-retrieve loop on the default queue.
    pub subscribe_to_default_queue: bool,

    /// Optional secondary store for resource-relationship tracking,
    /// exposed to handlers through their context.
    pub resource_relationship_store_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_url: "redis://127.0.0.1:6379".to_string(),
            database: 0,
            engine_name: "ActionEngine".to_string(),
            default_queue_name: "EngineQueue".to_string(),
            action_ttl_ms: ACTION_TTL_MS,
            event_ttl_ms: EVENT_TTL_MS,
            environment: Environment::default(),
            subscribe_to_default_queue: true,
            resource_relationship_store_url: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay configuration from the process environment.
    ///
    /// Consults `ACTION_ENGINE_STORE_URL` (falling back to `REDIS_URL`),
    /// `ACTION_ENGINE_DATABASE`, `ACTION_ENGINE_NAME`,
    /// `ACTION_ENGINE_DEFAULT_QUEUE` and `ACTION_ENGINE_ENV`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(url) = std::env::var("ACTION_ENGINE_STORE_URL").or_else(|_| std::env::var("REDIS_URL"))
        {
            config.store_url = url;
        }
        if let Some(database) = std::env::var("ACTION_ENGINE_DATABASE")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            config.database = database;
        }
        if let Ok(name) = std::env::var("ACTION_ENGINE_NAME") {
            config.engine_name = name;
        }
        if let Ok(queue) = std::env::var("ACTION_ENGINE_DEFAULT_QUEUE") {
            config.default_queue_name = queue;
        }
        if let Some(environment) = std::env::var("ACTION_ENGINE_ENV")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            config.environment = environment;
        }
        config
    }

    pub fn with_store_url<S: Into<String>>(mut self, url: S) -> Self {
        self.store_url = url.into();
        self
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn with_engine_name<S: Into<String>>(mut self, name: S) -> Self {
        self.engine_name = name.into();
        self
    }

    pub fn with_default_queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.default_queue_name = queue.into();
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_default_queue_subscription(mut self, subscribe: bool) -> Self {
        self.subscribe_to_default_queue = subscribe;
        self
    }

    pub fn with_resource_relationship_store_url<S: Into<String>>(mut self, url: S) -> Self {
        self.resource_relationship_store_url = Some(url.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.store_url.is_empty() {
            return Err(EngineError::generic("store_url must not be empty"));
        }
        if self.engine_name.is_empty() {
            return Err(EngineError::generic("engine_name must not be empty"));
        }
        if self.default_queue_name.is_empty() {
            return Err(EngineError::generic("default_queue_name must not be empty"));
        }
        if !(0..=15).contains(&self.database) {
            return Err(EngineError::generic(format!(
                "database index {} out of range 0..=15",
                self.database
            )));
        }
        if self.action_ttl_ms <= 0 || self.event_ttl_ms <= 0 {
            return Err(EngineError::generic("TTLs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_queue_name, "EngineQueue");
        assert_eq!(config.action_ttl_ms, 3_600_000);
        assert_eq!(config.event_ttl_ms, 300_000);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_engine_name("Worker7")
            .with_default_queue("Reports")
            .with_database(3)
            .with_environment(Environment::Production);

        assert!(config.validate().is_ok());
        assert_eq!(config.engine_name, "Worker7");
        assert_eq!(config.default_queue_name, "Reports");
        assert_eq!(config.database, 3);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EngineConfig::new().with_store_url("").validate().is_err());
        assert!(EngineConfig::new().with_database(42).validate().is_err());
        assert!(EngineConfig::new()
            .with_default_queue("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Testing.to_string(), "testing");
    }
}
