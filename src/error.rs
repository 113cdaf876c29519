//! Error types for the action engine.
//!
//! Four surface kinds: type mismatches, missing values, missing
//! context (unknown action, unregistered queue, unsatisfied signature), and
//! generic faults wrapping a non-domain cause. Dispatcher failures are also
//! persisted into the action hash as a JSON payload so remote waiters
//! observe them through pub/sub instead of timing out.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Unexpected value type: {0}")]
    UnexpectedValueType(String),
    #[error("Undefined value: {0}")]
    UndefinedValue(String),
    #[error("Undefined context: {0}")]
    UndefinedContext(String),
    #[error("{message}")]
    Generic {
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl EngineError {
    /// Wrap a non-domain cause, keeping it attached as the error source.
    pub fn external<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::Generic {
            message: format!("External error: {error}"),
            source: Some(Arc::new(error)),
        }
    }

    /// Generic error from a bare message.
    pub fn generic(message: impl Into<String>) -> Self {
        EngineError::Generic {
            message: message.into(),
            source: None,
        }
    }

    /// Stable kind tag used in the persisted error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnexpectedValueType(_) => "unexpected_value_type",
            EngineError::UndefinedValue(_) => "undefined_value",
            EngineError::UndefinedContext(_) => "undefined_context",
            EngineError::Generic { .. } => "generic",
        }
    }

    /// Serializable form for the failed action's `final_message`.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(error: redis::RedisError) -> Self {
        EngineError::external(error)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::external(error)
    }
}

/// JSON shape stored under `final_message.error` for a failed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

impl ErrorPayload {
    /// Reconstruct the error on the waiting side of the pub/sub channel.
    pub fn into_error(self) -> EngineError {
        match self.kind.as_str() {
            "unexpected_value_type" => EngineError::UnexpectedValueType(self.message),
            "undefined_value" => EngineError::UndefinedValue(self.message),
            "undefined_context" => EngineError::UndefinedContext(self.message),
            _ => EngineError::generic(self.message),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
