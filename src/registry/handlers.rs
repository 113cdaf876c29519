//! In-process handler registration.
//!
//! Handlers are values satisfying a uniform call capability, keyed by
//! action name. The metadata the doclet harvester produces still flows
//! through the durable registry for cross-engine discovery; invocation
//! itself is an in-memory lookup.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::error::Result;
use crate::model::OriginMeta;
use crate::store::StoreClient;

/// Execution context supplied to every handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// The engine's shared store.
    pub datastore: StoreClient,
    /// Secondary store for resource-relationship tracking, when configured.
    pub resource_relationship_datastore: Option<StoreClient>,
    /// Identity of the engine executing the handler.
    pub engine: OriginMeta,
    /// Origin user of the action being executed.
    pub origin_user_id: String,
}

/// A callable action handler.
///
/// Arguments arrive positionally in resolved-signature order; the return
/// value becomes the action's `final_message`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, context: HandlerContext, arguments: Vec<Value>) -> Result<Value>;
}

struct FnHandler<F> {
    function: F,
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(HandlerContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, context: HandlerContext, arguments: Vec<Value>) -> Result<Value> {
        (self.function)(context, arguments).await
    }
}

/// Thread-safe map from action name to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an action name, replacing any previous one.
    pub fn register(&self, action_name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        let action_name = action_name.into();
        let mut handlers = self.handlers.write().unwrap();
        if handlers.contains_key(&action_name) {
            warn!(action = %action_name, "Handler already registered, replacing");
        }
        handlers.insert(action_name.clone(), handler);
        info!(action = %action_name, "Registered action handler");
    }

    /// Register a plain async function or closure as a handler.
    pub fn register_fn<F, Fut>(&self, action_name: impl Into<String>, function: F)
    where
        F: Fn(HandlerContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(action_name, Arc::new(FnHandler { function }));
    }

    pub fn get(&self, action_name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().unwrap().get(action_name).cloned()
    }

    pub fn contains(&self, action_name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(action_name)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().unwrap().is_empty()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}
