//! # Dispatcher
//!
//! The action state machine: enqueue onto a registered queue, claim
//! pending actions when the queue key is touched, execute the handler
//! with a resolved signature, persist every status transition, and
//! publish status events on the per-action channel.
//!
//! Terminal failures are persisted into the action hash before being
//! re-raised, so remote waiters observe them through the keyspace
//! notification of that write instead of timing out.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::constants::{queue_handler_role, ORIGIN_USER_ID_ARGUMENT};
use crate::error::{EngineError, Result};
use crate::model::{Action, ActionConfiguration, ActionStatus, Event, OriginMeta};
use crate::registry::{HandlerContext, HandlerRegistry, Registry};
use crate::signature;
use crate::store::{ConnectionPool, StoreClient};
use crate::template;

/// Signature candidates, schema, message and handler lookup order after
/// extendable resolution.
struct EffectiveConfiguration {
    candidates: Vec<Vec<String>>,
    schema: HashMap<String, String>,
    message: Map<String, Value>,
    handler_names: Vec<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: StoreClient,
    event_store: StoreClient,
    registry: Registry,
    handlers: Arc<HandlerRegistry>,
    pool: ConnectionPool,
    origin: OriginMeta,
    resource_relationship_store: Option<StoreClient>,
    action_ttl_ms: i64,
    event_ttl_ms: i64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreClient,
        event_store: StoreClient,
        registry: Registry,
        handlers: Arc<HandlerRegistry>,
        pool: ConnectionPool,
        origin: OriginMeta,
        resource_relationship_store: Option<StoreClient>,
        action_ttl_ms: i64,
        event_ttl_ms: i64,
    ) -> Self {
        Self {
            store,
            event_store,
            registry,
            handlers,
            pool,
            origin,
            resource_relationship_store,
            action_ttl_ms,
            event_ttl_ms,
        }
    }

    /// Enqueue an action onto a registered queue.
    ///
    /// Transitions the action to `Pending` and atomically writes its
    /// hash, pushes its key onto the queue list and arms the hash TTL.
    pub async fn publish(&self, queue_name: &str, action: &mut Action) -> Result<()> {
        if !self.registry.is_queue_registered(queue_name).await? {
            return Err(EngineError::UndefinedContext(format!(
                "queue {queue_name} is not a registered action queue"
            )));
        }

        action.update_status(ActionStatus::Pending)?;
        self.store
            .enqueue(
                queue_name,
                &action.key(),
                &action.to_hash_fields()?,
                self.action_ttl_ms,
            )
            .await?;

        debug!(queue = queue_name, action = %action.key(), "Published action");
        Ok(())
    }

    /// One-shot dequeue-and-execute for a queue.
    ///
    /// Claims the next action key with a blocking pop on the queue's
    /// dedicated handler connection, rehydrates the action and dispatches
    /// execution on its own task so the connection is free again
    /// immediately.
    pub async fn retrieve_pending_action(&self, queue_name: &str) -> Result<()> {
        let role = queue_handler_role(queue_name);
        let connection = self.pool.command_connection(&role).await?;

        // The role connection is held for the pop only; concurrent
        // retrievals on the same queue take turns on it.
        let popped = {
            let mut connection = connection.lock().await;
            StoreClient::blocking_pop(&mut connection, queue_name, 0.0).await?
        };
        let Some(action_key) = popped else {
            return Ok(());
        };

        let fields = self.store.hash_get_all(&action_key).await?;
        if fields.is_empty() {
            return Err(EngineError::UndefinedValue(format!(
                "dequeued key {action_key} has no hash (evicted?)"
            )));
        }
        let action = Action::from_hash(&fields)?;

        debug!(queue = queue_name, action = %action_key, "Claimed pending action");

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut action = action;
            if let Err(e) = dispatcher.execute(&mut action).await {
                error!(action = %action.key(), error = %e, "Action execution failed");
            }
        });

        Ok(())
    }

    /// Run the state machine on a rehydrated action.
    ///
    /// On success the final message is the handler's return value; on
    /// failure the error payload is persisted before the error is
    /// returned to the local caller.
    pub async fn execute(&self, action: &mut Action) -> Result<Value> {
        match self.run_handler(action).await {
            Ok(value) => {
                action.update_status(ActionStatus::Completed)?;
                action.update_message(into_message(value.clone()));
                self.persist(action).await?;
                self.publish_status_event(action).await?;
                info!(action = %action.key(), "Action completed");
                Ok(value)
            }
            Err(error) => {
                if !action.status().is_terminal() {
                    if let Err(transition_error) = action.update_status(ActionStatus::Failed) {
                        error!(
                            action = %action.key(),
                            error = %transition_error,
                            "Could not transition failed action"
                        );
                    } else {
                        let mut message = Map::new();
                        message.insert("error".to_string(), json!(error.to_payload()));
                        action.update_message(message);
                        if let Err(persist_error) = self.persist(action).await {
                            error!(
                                action = %action.key(),
                                error = %persist_error,
                                "Could not persist failed action"
                            );
                        }
                    }
                }
                error!(action = %action.key(), error = %error, "Action failed");
                Err(error)
            }
        }
    }

    async fn run_handler(&self, action: &mut Action) -> Result<Value> {
        let configuration = self
            .registry
            .action_configuration(action.name())
            .await?
            .ok_or_else(|| {
                EngineError::UndefinedContext(format!(
                    "no action configuration stored for {}",
                    action.name()
                ))
            })?;

        action.update_status(ActionStatus::Processing)?;
        self.persist(action).await?;

        let effective = self.resolve_effective(action, &configuration).await?;
        let selected =
            signature::resolve(&effective.candidates, &effective.message, &effective.schema)?;
        let arguments =
            signature::arguments(selected, &effective.message, action.origin_user_id());

        let handler = effective
            .handler_names
            .iter()
            .find_map(|name| self.handlers.get(name))
            .ok_or_else(|| {
                EngineError::UndefinedContext(format!(
                    "no handler registered for any of {:?}",
                    effective.handler_names
                ))
            })?;

        let context = HandlerContext {
            datastore: self.store.clone(),
            resource_relationship_datastore: self.resource_relationship_store.clone(),
            engine: self.origin.clone(),
            origin_user_id: action.origin_user_id().to_string(),
        };

        handler.call(context, arguments).await
    }

    /// Resolve candidates, schema and effective message, expanding an
    /// extendable parent when the configuration names one.
    async fn resolve_effective(
        &self,
        action: &Action,
        configuration: &ActionConfiguration,
    ) -> Result<EffectiveConfiguration> {
        let mut candidates = vec![configuration.action_signature.clone()];
        if let Some(alternative) = &configuration.action_alternative_signature {
            candidates.push(alternative.clone());
        }

        let Some(parent_name) = &configuration.action_name_to_extend else {
            return Ok(EffectiveConfiguration {
                candidates,
                schema: configuration.argument_configuration_by_argument_name.clone(),
                message: action.original_message().clone(),
                handler_names: vec![action.name().to_string()],
            });
        };

        let parent = self
            .registry
            .extendable_action_configuration(parent_name)
            .await?
            .ok_or_else(|| {
                EngineError::UndefinedContext(format!(
                    "no extendable action configuration stored for {parent_name}"
                ))
            })?;

        // Template context: the action message overlaid on the origin
        // user identity.
        let mut template_context = action.original_message().clone();
        template_context.insert(
            ORIGIN_USER_ID_ARGUMENT.to_string(),
            Value::String(action.origin_user_id().to_string()),
        );

        if let Some(templates) = &parent.extendable_alternative_action_signature {
            let mut evaluated = Vec::with_capacity(templates.len());
            for expression in templates {
                let value =
                    template::evaluate(expression, &template_context, Some(&self.registry)).await?;
                let argument_name = value.as_str().ok_or_else(|| {
                    EngineError::UnexpectedValueType(format!(
                        "alternative signature template {expression} did not produce a string"
                    ))
                })?;
                evaluated.push(argument_name.to_string());
            }
            candidates.push(evaluated);
        }

        let mut message = Map::new();
        message.insert(
            ORIGIN_USER_ID_ARGUMENT.to_string(),
            Value::String(action.origin_user_id().to_string()),
        );
        for (argument_name, expression) in &parent.extendable_action_argument_default {
            let value =
                template::evaluate(expression, &template_context, Some(&self.registry)).await?;
            message.insert(argument_name.clone(), value);
        }
        for (key, value) in action.original_message() {
            message.insert(key.clone(), value.clone());
        }

        // Child argument schema overrides the parent's
        let mut schema = parent.base.argument_configuration_by_argument_name.clone();
        for (argument_name, descriptor) in &configuration.argument_configuration_by_argument_name {
            schema.insert(argument_name.clone(), descriptor.clone());
        }

        let effective_name =
            template::evaluate(&parent.extendable_action_name, &template_context, Some(&self.registry))
                .await?;
        let mut handler_names = vec![action.name().to_string()];
        if let Some(name) = effective_name.as_str() {
            handler_names.push(name.to_string());
        }
        handler_names.push(parent.base.action_name.clone());

        Ok(EffectiveConfiguration {
            candidates,
            schema,
            message,
            handler_names,
        })
    }

    /// Write the action hash back and re-arm its TTL.
    pub async fn persist(&self, action: &Action) -> Result<()> {
        self.store
            .persist_with_ttl(&action.key(), &action.to_hash_fields()?, self.action_ttl_ms)
            .await
    }

    /// Publish an `ActionStatusUpdated` event on the per-action channel.
    async fn publish_status_event(&self, action: &Action) -> Result<()> {
        let event = Event::new(
            "ActionStatusUpdated",
            json!({
                "action_id": action.id(),
                "action_name": action.name(),
                "action_status": action.status(),
                "action_final_message": action.final_message_value(),
            }),
            &self.origin,
        );
        self.publish_event(&format!("Action:{}", action.id()), &event)
            .await
    }

    /// Publish an event: persist its hash with a TTL, index it in the
    /// channel's retention sorted set (score = expiry), trim expired
    /// entries, and publish on the channel.
    pub async fn publish_event(&self, channel: &str, event: &Event) -> Result<()> {
        self.event_store
            .persist_with_ttl(&event.key(), &event.to_hash_fields()?, self.event_ttl_ms)
            .await?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let expiry_ms = event.meta().created_at.timestamp_millis() + self.event_ttl_ms;
        self.event_store
            .sorted_set_add(channel, &event.key(), expiry_ms as f64)
            .await?;
        self.event_store
            .sorted_set_trim_by_score(channel, now_ms as f64)
            .await?;

        self.event_store
            .publish(channel, &event.to_published_payload()?)
            .await?;

        debug!(channel = channel, event = %event.key(), "Published event");
        Ok(())
    }
}

/// Handler return values become the final message; a non-object return is
/// wrapped under a single `value` key.
fn into_message(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
