//! Request/response correlation over keyspace notifications.
//!
//! The publisher subscribes a waiter to the action key's keyspace channel
//! before enqueueing, so the terminal status write can never race past an
//! unattached subscriber. Each hash-write notification triggers one
//! atomic read of `status` and `final_message` from the action hash; the
//! first terminal status fulfills the waiter.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{EngineError, ErrorPayload, Result};
use crate::model::ActionStatus;
use crate::store::{NotificationHandler, StoreClient};

/// Waiter for one action's terminal status.
pub struct ResponseWaiter {
    store: StoreClient,
    action_key: String,
    sender: Mutex<Option<oneshot::Sender<Result<Value>>>>,
}

impl ResponseWaiter {
    /// Create a waiter and the receiver its resolution arrives on.
    pub fn channel(
        store: StoreClient,
        action_key: impl Into<String>,
    ) -> (Arc<Self>, oneshot::Receiver<Result<Value>>) {
        let (sender, receiver) = oneshot::channel();
        let waiter = Arc::new(Self {
            store,
            action_key: action_key.into(),
            sender: Mutex::new(Some(sender)),
        });
        (waiter, receiver)
    }

    /// Reject the waiter locally (enqueue never happened).
    pub fn reject(&self, error: EngineError) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(Err(error));
        }
    }

    fn fulfill(&self, outcome: Result<Value>) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(outcome);
        }
    }
}

#[async_trait]
impl NotificationHandler for ResponseWaiter {
    async fn handle_notification(&self, _channel: &str, command: &str) {
        // Only hash writes can carry a status transition.
        if command != "hset" && command != "hmset" {
            return;
        }

        let fields = match self
            .store
            .hash_get_fields(&self.action_key, &["status", "final_message"])
            .await
        {
            Ok(fields) => fields,
            Err(e) => {
                warn!(action = %self.action_key, error = %e, "Could not read action status");
                return;
            }
        };

        let Some(status_raw) = fields.first().and_then(|f| f.as_deref()) else {
            return;
        };
        let Ok(status) = status_raw.parse::<ActionStatus>() else {
            warn!(action = %self.action_key, status = status_raw, "Unparseable action status");
            return;
        };
        if !status.is_terminal() {
            return;
        }

        let final_message: Value = fields
            .get(1)
            .and_then(|f| f.as_deref())
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(Value::Null);

        debug!(action = %self.action_key, status = %status, "Terminal status observed");

        let outcome = match status {
            ActionStatus::Completed => Ok(final_message),
            _ => Err(failure_from_final_message(&final_message)),
        };
        self.fulfill(outcome);
    }
}

/// Rebuild the dispatcher-side error from the persisted `final_message`.
fn failure_from_final_message(final_message: &Value) -> EngineError {
    final_message
        .get("error")
        .and_then(|error| serde_json::from_value::<ErrorPayload>(error.clone()).ok())
        .map(ErrorPayload::into_error)
        .unwrap_or_else(|| EngineError::generic("action failed without a persisted error payload"))
}
