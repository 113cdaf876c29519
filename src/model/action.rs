//! The action value object: a named unit of work with a message payload
//! and a correlated response, stored as a flat hash in the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::constants::ACTION_KEY_PREFIX;
use crate::error::{EngineError, Result};
use crate::model::status::ActionStatus;

/// Identity of the engine process that created an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginMeta {
    pub engine_id: Uuid,
    pub engine_name: String,
    pub process_id: u32,
}

impl OriginMeta {
    pub fn new(engine_id: Uuid, engine_name: impl Into<String>) -> Self {
        Self {
            engine_id,
            engine_name: engine_name.into(),
            process_id: std::process::id(),
        }
    }
}

/// Metadata stored alongside an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub origin_engine_id: Uuid,
    pub origin_engine_name: String,
    pub origin_process_id: u32,
    pub origin_user_id: String,
}

/// A named unit of work flowing through the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    id: Uuid,
    name: String,
    original_message: Map<String, Value>,
    final_message: Map<String, Value>,
    status: ActionStatus,
    meta: ActionMeta,
}

impl Action {
    /// Create a fresh action with a time-ordered identifier.
    pub fn new(
        name: impl Into<String>,
        message: Map<String, Value>,
        origin: &OriginMeta,
        origin_user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            original_message: message,
            final_message: Map::new(),
            status: ActionStatus::Unpublished,
            meta: ActionMeta {
                created_at: now,
                updated_at: now,
                origin_engine_id: origin.engine_id,
                origin_engine_name: origin.engine_name.clone(),
                origin_process_id: origin.process_id,
                origin_user_id: origin_user_id.into(),
            },
        }
    }

    /// Rehydrate an action from the flat hash read back from the store.
    pub fn from_hash(fields: &HashMap<String, String>) -> Result<Self> {
        let id = required(fields, "id")?
            .parse::<Uuid>()
            .map_err(|e| EngineError::UnexpectedValueType(format!("action id: {e}")))?;
        let name = required(fields, "name")?.to_string();
        let status = required(fields, "status")?
            .parse::<ActionStatus>()
            .map_err(EngineError::UnexpectedValueType)?;
        let original_message = parse_message(required(fields, "original_message")?)?;
        let final_message = parse_message(required(fields, "final_message")?)?;
        let meta: ActionMeta = serde_json::from_str(required(fields, "meta")?)
            .map_err(|e| EngineError::UnexpectedValueType(format!("action meta: {e}")))?;

        Ok(Self {
            id,
            name,
            original_message,
            final_message,
            status,
            meta,
        })
    }

    /// Deterministic store key: `Action:<name>:<id>`.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", ACTION_KEY_PREFIX, self.name, self.id)
    }

    /// Stringified field pairs for hash storage.
    pub fn to_hash_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("id".to_string(), self.id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("status".to_string(), self.status.to_string()),
            (
                "original_message".to_string(),
                serde_json::to_string(&self.original_message)?,
            ),
            (
                "final_message".to_string(),
                serde_json::to_string(&self.final_message)?,
            ),
            (
                "origin_user_id".to_string(),
                self.meta.origin_user_id.clone(),
            ),
            ("meta".to_string(), serde_json::to_string(&self.meta)?),
        ])
    }

    /// Transition along the lifecycle graph, refreshing `updated_at`.
    ///
    /// Rejects back-edges and any write after a terminal status.
    pub fn update_status(&mut self, status: ActionStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(EngineError::generic(format!(
                "Illegal status transition for {}: {} -> {}",
                self.key(),
                self.status,
                status
            )));
        }
        self.status = status;
        self.meta.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the final message, refreshing `updated_at`.
    pub fn update_message(&mut self, message: Map<String, Value>) {
        self.final_message = message;
        self.meta.updated_at = Utc::now();
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn original_message(&self) -> &Map<String, Value> {
        &self.original_message
    }

    pub fn final_message(&self) -> &Map<String, Value> {
        &self.final_message
    }

    pub fn final_message_value(&self) -> Value {
        Value::Object(self.final_message.clone())
    }

    pub fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    pub fn origin_user_id(&self) -> &str {
        &self.meta.origin_user_id
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| EngineError::UndefinedValue(format!("action hash missing field {name}")))
}

fn parse_message(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)
        .map_err(|e| EngineError::UnexpectedValueType(format!("action message: {e}")))?
    {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::UnexpectedValueType(format!(
            "action message must be an object, got {other}"
        ))),
    }
}
