//! # Registry
//!
//! Durable maps shared by every engine on the store: action
//! configurations, extendable configurations, action-to-queue bindings,
//! the registered queue set, and resource structures. Storing an action
//! configuration also binds the action name to this engine's default
//! queue so any engine can route a publish for it.

pub mod handlers;

use tracing::{debug, info};

use crate::constants::{
    ACTION_CONFIGURATION_TABLE, ACTION_QUEUE_NAME_SET, ACTION_QUEUE_NAME_TABLE,
    EXTENDABLE_ACTION_CONFIGURATION_TABLE, RESOURCE_STRUCTURE_TABLE,
};
use crate::error::{EngineError, Result};
use crate::model::{ActionConfiguration, ExtendableActionConfiguration, ResourceStructure};
use crate::store::StoreClient;

pub use handlers::{ActionHandler, HandlerContext, HandlerRegistry};

/// CRUD over the shared registry tables.
#[derive(Debug, Clone)]
pub struct Registry {
    store: StoreClient,
    default_queue_name: String,
}

impl Registry {
    pub fn new(store: StoreClient, default_queue_name: impl Into<String>) -> Self {
        Self {
            store,
            default_queue_name: default_queue_name.into(),
        }
    }

    pub fn default_queue_name(&self) -> &str {
        &self.default_queue_name
    }

    // Queues

    /// Add a queue to the registered set. Idempotent.
    pub async fn register_queue(&self, queue_name: &str) -> Result<()> {
        if self.store.set_add(ACTION_QUEUE_NAME_SET, queue_name).await? {
            info!(queue = queue_name, "Registered action queue");
        }
        Ok(())
    }

    pub async fn is_queue_registered(&self, queue_name: &str) -> Result<bool> {
        self.store
            .set_is_member(ACTION_QUEUE_NAME_SET, queue_name)
            .await
    }

    pub async fn registered_queues(&self) -> Result<Vec<String>> {
        self.store.set_members(ACTION_QUEUE_NAME_SET).await
    }

    /// Queue an action name is bound to, if any engine has stored it.
    pub async fn queue_name_for_action(&self, action_name: &str) -> Result<Option<String>> {
        self.store
            .hash_get_field(ACTION_QUEUE_NAME_TABLE, action_name)
            .await
    }

    // Action configurations

    /// Store one action configuration and bind its name to the default
    /// queue.
    pub async fn store_action_configuration(
        &self,
        configuration: &ActionConfiguration,
    ) -> Result<()> {
        let record = serde_json::to_string(configuration)?;
        self.store
            .hash_set_fields(
                ACTION_CONFIGURATION_TABLE,
                &[(configuration.action_name.clone(), record)],
            )
            .await?;
        self.store
            .hash_set_fields(
                ACTION_QUEUE_NAME_TABLE,
                &[(
                    configuration.action_name.clone(),
                    self.default_queue_name.clone(),
                )],
            )
            .await?;
        debug!(
            action = %configuration.action_name,
            queue = %self.default_queue_name,
            "Stored action configuration"
        );
        Ok(())
    }

    /// Bulk-store action configurations.
    pub async fn store_action_configurations(
        &self,
        configurations: &[ActionConfiguration],
    ) -> Result<()> {
        for configuration in configurations {
            self.store_action_configuration(configuration).await?;
        }
        Ok(())
    }

    pub async fn action_configuration(
        &self,
        action_name: &str,
    ) -> Result<Option<ActionConfiguration>> {
        self.read_record(ACTION_CONFIGURATION_TABLE, action_name)
            .await
    }

    // Extendable action configurations

    pub async fn store_extendable_action_configuration(
        &self,
        configuration: &ExtendableActionConfiguration,
    ) -> Result<()> {
        let record = serde_json::to_string(configuration)?;
        self.store
            .hash_set_fields(
                EXTENDABLE_ACTION_CONFIGURATION_TABLE,
                &[(configuration.base.action_name.clone(), record)],
            )
            .await?;
        debug!(
            action = %configuration.base.action_name,
            "Stored extendable action configuration"
        );
        Ok(())
    }

    pub async fn store_extendable_action_configurations(
        &self,
        configurations: &[ExtendableActionConfiguration],
    ) -> Result<()> {
        for configuration in configurations {
            self.store_extendable_action_configuration(configuration)
                .await?;
        }
        Ok(())
    }

    pub async fn extendable_action_configuration(
        &self,
        action_name: &str,
    ) -> Result<Option<ExtendableActionConfiguration>> {
        self.read_record(EXTENDABLE_ACTION_CONFIGURATION_TABLE, action_name)
            .await
    }

    // Resource structures

    pub async fn store_resource_structure(&self, structure: &ResourceStructure) -> Result<()> {
        let record = serde_json::to_string(structure)?;
        self.store
            .hash_set_fields(
                RESOURCE_STRUCTURE_TABLE,
                &[(structure.resource_type.clone(), record)],
            )
            .await?;
        debug!(resource_type = %structure.resource_type, "Stored resource structure");
        Ok(())
    }

    pub async fn store_resource_structures(&self, structures: &[ResourceStructure]) -> Result<()> {
        for structure in structures {
            self.store_resource_structure(structure).await?;
        }
        Ok(())
    }

    pub async fn resource_structure(
        &self,
        resource_type: &str,
    ) -> Result<Option<ResourceStructure>> {
        self.read_record(RESOURCE_STRUCTURE_TABLE, resource_type)
            .await
    }

    async fn read_record<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        field: &str,
    ) -> Result<Option<T>> {
        match self.store.hash_get_field(table, field).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| {
                    EngineError::UnexpectedValueType(format!(
                        "stored record {table}/{field} is malformed: {e}"
                    ))
                }),
        }
    }
}
