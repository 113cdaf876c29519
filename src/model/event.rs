//! Free-form events published by handlers onto named channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::constants::EVENT_KEY_PREFIX;
use crate::error::{EngineError, Result};
use crate::model::action::OriginMeta;

/// Metadata stored alongside an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub created_at: DateTime<Utc>,
    pub origin_engine_id: Uuid,
    pub origin_engine_name: String,
    pub origin_process_id: u32,
}

/// A named event with a free-form message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    name: String,
    message: Value,
    meta: EventMeta,
}

impl Event {
    /// Create a fresh event with a time-ordered identifier.
    pub fn new(name: impl Into<String>, message: Value, origin: &OriginMeta) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            message,
            meta: EventMeta {
                created_at: Utc::now(),
                origin_engine_id: origin.engine_id,
                origin_engine_name: origin.engine_name.clone(),
                origin_process_id: origin.process_id,
            },
        }
    }

    /// Rehydrate an event from the flat hash read back from the store.
    pub fn from_hash(fields: &HashMap<String, String>) -> Result<Self> {
        let id = required(fields, "id")?
            .parse::<Uuid>()
            .map_err(|e| EngineError::UnexpectedValueType(format!("event id: {e}")))?;
        let name = required(fields, "name")?.to_string();
        let message: Value = serde_json::from_str(required(fields, "message")?)
            .map_err(|e| EngineError::UnexpectedValueType(format!("event message: {e}")))?;
        let meta: EventMeta = serde_json::from_str(required(fields, "meta")?)
            .map_err(|e| EngineError::UnexpectedValueType(format!("event meta: {e}")))?;

        Ok(Self {
            id,
            name,
            message,
            meta,
        })
    }

    /// Deterministic store key: `Event:<name>:<id>`.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", EVENT_KEY_PREFIX, self.name, self.id)
    }

    /// Stringified field pairs for hash storage.
    pub fn to_hash_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("id".to_string(), self.id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("message".to_string(), serde_json::to_string(&self.message)?),
            ("meta".to_string(), serde_json::to_string(&self.meta)?),
        ])
    }

    /// Wire form carried on the pub/sub channel.
    pub fn to_published_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the wire form received from a pub/sub channel.
    pub fn from_published_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| EngineError::UnexpectedValueType(format!("published event: {e}")))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &Value {
        &self.message
    }

    pub fn meta(&self) -> &EventMeta {
        &self.meta
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| EngineError::UndefinedValue(format!("event hash missing field {name}")))
}
