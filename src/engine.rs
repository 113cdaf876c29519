//! # Engine Facade
//!
//! One process-instance of the runtime. Construction is immediate and
//! cheap; the first store-touching operation awaits the initialization
//! future, which opens the primary connections, verifies the store
//! configuration once per generation, registers the default queue and
//! optionally installs the pending-action loop on it. `await_ready`
//! exposes the same readiness explicitly.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::{
    queue_subscriber_role, ACTION_SUBSCRIBER_ROLE, EXIT_CODE_KEYSPACE_MISCONFIGURED,
    REQUIRED_KEYSPACE_EVENTS, VERIFICATION_SENTINEL_KEY, VERIFICATION_SENTINEL_TTL_MS,
};
use crate::dispatch::{Dispatcher, ResponseWaiter};
use crate::error::{EngineError, Result};
use crate::ingest::{HarvestedMetadata, MetadataIngestor};
use crate::logging::init_logging;
use crate::model::{
    Action, ActionConfiguration, Event, ExtendableActionConfiguration, OriginMeta,
    ResourceStructure,
};
use crate::registry::{ActionHandler, HandlerRegistry, Registry};
use crate::signature;
use crate::store::{ConnectionPool, NotificationHandler, PubSubListener, StoreClient};

/// An event received from a subscribed channel.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: Event,
}

/// The action engine. Cloning shares the instance.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    origin: OriginMeta,
    handlers: Arc<HandlerRegistry>,
    state: OnceCell<EngineState>,
    events_tx: broadcast::Sender<ChannelEvent>,
    destroyed: AtomicBool,
}

/// Initialized store-facing state; emptied by `destroy` so the primary
/// connections can be closed explicitly.
struct EngineState {
    runtime: Mutex<Option<EngineRuntime>>,
}

/// The live connection graph. Cloning shares every underlying handle.
#[derive(Clone)]
struct EngineRuntime {
    action_store: StoreClient,
    engine_store: StoreClient,
    event_store: StoreClient,
    event_subscriber: PubSubListener,
    pool: ConnectionPool,
    registry: Registry,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Create an engine handle. Public operations are available
    /// immediately; the first store-using call awaits initialization.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let origin = OriginMeta::new(Uuid::now_v7(), config.engine_name.clone());
        let (events_tx, _) = broadcast::channel(1024);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                origin,
                handlers: Arc::new(HandlerRegistry::new()),
                state: OnceCell::new(),
                events_tx,
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Identity recorded in everything this engine originates.
    pub fn origin(&self) -> &OriginMeta {
        &self.inner.origin
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a handler under an action name. Available before readiness.
    pub fn register_handler(
        &self,
        action_name: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        self.inner.handlers.register(action_name, handler);
    }

    /// Register an async function or closure as a handler.
    pub fn register_handler_fn<F, Fut>(&self, action_name: impl Into<String>, function: F)
    where
        F: Fn(crate::registry::HandlerContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.inner.handlers.register_fn(action_name, function);
    }

    /// Await engine initialization: primary connections, store
    /// verification and default-queue registration.
    pub async fn await_ready(&self) -> Result<()> {
        self.runtime().await.map(|_| ())
    }

    /// Publish an action onto a named queue.
    ///
    /// Fails `UnexpectedValueType` when the message violates the action's
    /// stored argument schema and `UndefinedContext` when the queue is
    /// not registered.
    pub async fn publish_action_to_queue_by_name(
        &self,
        queue_name: &str,
        mut action: Action,
    ) -> Result<(String, Action)> {
        let runtime = self.runtime().await?;

        if let Some(configuration) = runtime.registry.action_configuration(action.name()).await? {
            signature::type_check_message(
                action.original_message(),
                &configuration.argument_configuration_by_argument_name,
            )?;
        }

        runtime.dispatcher.publish(queue_name, &mut action).await?;
        Ok((queue_name.to_string(), action))
    }

    /// Publish an action and await its terminal status.
    ///
    /// Resolves with the handler's return value or fails with the
    /// persisted error. The per-action subscription is established before
    /// the enqueue so the terminal write cannot be missed; the wait is
    /// bounded by the action TTL.
    pub async fn publish_action_by_name_and_handle_response(
        &self,
        action_name: &str,
        message: Map<String, Value>,
        origin_user_id: &str,
    ) -> Result<Value> {
        let runtime = self.runtime().await?;

        let queue_name = runtime
            .registry
            .queue_name_for_action(action_name)
            .await?
            .ok_or_else(|| {
                EngineError::UndefinedContext(format!(
                    "no queue associated with action {action_name}"
                ))
            })?;

        let mut action = Action::new(action_name, message, &self.inner.origin, origin_user_id);
        let channel = runtime.action_store.keyspace_channel_for(&action.key());
        let (waiter, receiver) =
            ResponseWaiter::channel(runtime.action_store.clone(), action.key());

        let listener = runtime.pool.listener(ACTION_SUBSCRIBER_ROLE).await?;
        listener.subscribe(channel.clone(), waiter.clone()).await?;

        if let Err(error) = runtime.dispatcher.publish(&queue_name, &mut action).await {
            waiter.reject(error.clone());
            let _ = listener.unsubscribe(channel).await;
            return Err(error);
        }

        let wait = Duration::from_millis(self.inner.config.action_ttl_ms as u64);
        let outcome = match tokio::time::timeout(wait, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(EngineError::generic("response waiter was dropped")),
            Err(_) => Err(EngineError::generic(format!(
                "timed out awaiting action {}",
                action.key()
            ))),
        };

        let _ = listener.unsubscribe(channel).await;
        outcome
    }

    /// Publish an event onto a named channel.
    pub async fn publish_event_to_channel_by_name(
        &self,
        channel: &str,
        event: Event,
    ) -> Result<(String, Event)> {
        let runtime = self.runtime().await?;
        runtime.dispatcher.publish_event(channel, &event).await?;
        Ok((channel.to_string(), event))
    }

    /// Subscribe to a named event channel. Received events fan out to
    /// every receiver obtained from [`Engine::subscribe_events`].
    pub async fn subscribe_to_event_channel_by_name(&self, channel: &str) -> Result<()> {
        let runtime = self.runtime().await?;
        let handler = Arc::new(EventFanoutHandler {
            events_tx: self.inner.events_tx.clone(),
        });
        runtime.event_subscriber.subscribe(channel, handler).await
    }

    pub async fn unsubscribe_from_event_channel_by_name(&self, channel: &str) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime.event_subscriber.unsubscribe(channel).await
    }

    /// Receiver for events arriving on every subscribed channel.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Install the auto-retrieve loop for a queue: every keyspace
    /// notification for the queue key schedules a pending-action
    /// retrieval. Idempotent.
    pub async fn subscribe_to_action_queue_update(&self, queue_name: &str) -> Result<()> {
        let runtime = self.runtime().await?;
        Self::install_queue_subscription(&runtime, queue_name).await
    }

    async fn install_queue_subscription(runtime: &EngineRuntime, queue_name: &str) -> Result<()> {
        let role = queue_subscriber_role(queue_name);
        let listener = runtime.pool.listener(&role).await?;
        let channel = runtime.action_store.keyspace_channel_for(queue_name);
        let handler = Arc::new(QueueUpdateHandler {
            dispatcher: runtime.dispatcher.clone(),
            queue_name: queue_name.to_string(),
        });
        listener.subscribe(channel, handler).await?;
        info!(queue = queue_name, "Subscribed to action queue updates");
        Ok(())
    }

    /// One-shot dequeue-and-execute on a queue.
    pub async fn retrieve_pending_action(&self, queue_name: &str) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime.dispatcher.retrieve_pending_action(queue_name).await
    }

    /// Run the dispatcher state machine on a rehydrated action.
    pub async fn execute_action(&self, action: &mut Action) -> Result<Value> {
        let runtime = self.runtime().await?;
        runtime.dispatcher.execute(action).await
    }

    // Registry operations

    pub async fn store_action_configuration(
        &self,
        configuration: &ActionConfiguration,
    ) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime.registry.store_action_configuration(configuration).await
    }

    pub async fn store_action_configurations(
        &self,
        configurations: &[ActionConfiguration],
    ) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime
            .registry
            .store_action_configurations(configurations)
            .await
    }

    pub async fn store_extendable_action_configuration(
        &self,
        configuration: &ExtendableActionConfiguration,
    ) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime
            .registry
            .store_extendable_action_configuration(configuration)
            .await
    }

    pub async fn store_extendable_action_configurations(
        &self,
        configurations: &[ExtendableActionConfiguration],
    ) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime
            .registry
            .store_extendable_action_configurations(configurations)
            .await
    }

    pub async fn store_resource_structure(&self, structure: &ResourceStructure) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime.registry.store_resource_structure(structure).await
    }

    pub async fn store_resource_structures(
        &self,
        structures: &[ResourceStructure],
    ) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime.registry.store_resource_structures(structures).await
    }

    /// Run the external metadata ingestor over a directory and store
    /// everything it finds.
    pub async fn autodiscover(
        &self,
        directory: &Path,
        ingestor: &dyn MetadataIngestor,
    ) -> Result<HarvestedMetadata> {
        let runtime = self.runtime().await?;
        let harvested = ingestor.harvest(directory).await?;

        runtime
            .registry
            .store_action_configurations(&harvested.action_configurations)
            .await?;
        runtime
            .registry
            .store_extendable_action_configurations(&harvested.extendable_action_configurations)
            .await?;
        runtime
            .registry
            .store_resource_structures(&harvested.resource_structures)
            .await?;

        info!(
            directory = %directory.display(),
            actions = harvested.action_configurations.len(),
            extendables = harvested.extendable_action_configurations.len(),
            resources = harvested.resource_structures.len(),
            "Autodiscovery stored harvested metadata"
        );
        Ok(harvested)
    }

    /// Close every primary and derived connection and stop every
    /// listener task. The engine is unusable afterwards.
    pub async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        let Some(state) = self.inner.state.get() else {
            return;
        };
        let Some(runtime) = state.runtime.lock().unwrap().take() else {
            return;
        };

        runtime.event_subscriber.shutdown().await;
        runtime.pool.destroy().await;

        // Drop the component clones first, then close the canonical
        // primary handles.
        let EngineRuntime {
            action_store,
            engine_store,
            event_store,
            registry,
            dispatcher,
            ..
        } = runtime;
        drop(registry);
        drop(dispatcher);
        action_store.destroy();
        engine_store.destroy();
        event_store.destroy();

        debug!("Engine destroyed");
    }

    async fn runtime(&self) -> Result<EngineRuntime> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(EngineError::generic("engine has been destroyed"));
        }
        let state = self
            .inner
            .state
            .get_or_try_init(|| self.initialize())
            .await?;
        state
            .runtime
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::generic("engine has been destroyed"))
    }

    async fn initialize(&self) -> Result<EngineState> {
        let config = &self.inner.config;
        init_logging(config.environment);

        info!(
            engine = %config.engine_name,
            queue = %config.default_queue_name,
            "Initializing action engine"
        );

        let (action_store, engine_store, event_store) = tokio::try_join!(
            StoreClient::connect(&config.store_url, config.database),
            StoreClient::connect(&config.store_url, config.database),
            StoreClient::connect(&config.store_url, config.database),
        )?;
        let event_subscriber = PubSubListener::spawn(event_store.pubsub().await?);

        verify_store_configuration(&engine_store).await?;

        let registry = Registry::new(engine_store.clone(), config.default_queue_name.clone());
        registry.register_queue(&config.default_queue_name).await?;

        let resource_relationship_store = match &config.resource_relationship_store_url {
            Some(url) => Some(StoreClient::connect(url, config.database).await?),
            None => None,
        };

        let pool = ConnectionPool::new(action_store.clone());
        let dispatcher = Dispatcher::new(
            action_store.clone(),
            event_store.clone(),
            registry.clone(),
            Arc::clone(&self.inner.handlers),
            pool.clone(),
            self.inner.origin.clone(),
            resource_relationship_store,
            config.action_ttl_ms,
            config.event_ttl_ms,
        );

        let runtime = EngineRuntime {
            action_store,
            engine_store,
            event_store,
            event_subscriber,
            pool,
            registry,
            dispatcher,
        };

        if config.subscribe_to_default_queue {
            Self::install_queue_subscription(&runtime, &config.default_queue_name).await?;
        }

        info!(engine = %config.engine_name, "Action engine ready");
        Ok(EngineState {
            runtime: Mutex::new(Some(runtime)),
        })
    }
}

/// Schedules a pending-action retrieval whenever the queue key is pushed
/// to. Retrieval errors are logged and swallowed; the subscription
/// re-fires on the next enqueue.
struct QueueUpdateHandler {
    dispatcher: Dispatcher,
    queue_name: String,
}

#[async_trait]
impl NotificationHandler for QueueUpdateHandler {
    async fn handle_notification(&self, _channel: &str, command: &str) {
        // The enqueue protocol only ever pushes; consumption echoes
        // (rpop from our own blocking pops) must not schedule retrievals
        // or every processed action would leave one behind.
        if command != "lpush" && command != "rpush" {
            return;
        }
        let dispatcher = self.dispatcher.clone();
        let queue_name = self.queue_name.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.retrieve_pending_action(&queue_name).await {
                error!(queue = %queue_name, error = %e, "Pending-action retrieval failed");
            }
        });
    }
}

/// Parses published payloads back into events and fans them out to the
/// engine's broadcast receivers.
struct EventFanoutHandler {
    events_tx: broadcast::Sender<ChannelEvent>,
}

#[async_trait]
impl NotificationHandler for EventFanoutHandler {
    async fn handle_notification(&self, channel: &str, payload: &str) {
        match Event::from_published_payload(payload) {
            Ok(event) => {
                // No receivers is acceptable; events are fire-and-forget
                let _ = self.events_tx.send(ChannelEvent {
                    channel: channel.to_string(),
                    event,
                });
            }
            Err(e) => {
                warn!(channel = channel, error = %e, "Undecodable event payload");
            }
        }
    }
}

/// Once-per-generation store verification, guarded by a scripted
/// set-if-absent sentinel.
///
/// Keyspace notifications are the engine's wake-up mechanism; running
/// without them deadlocks every waiter, so a missing `AKE` configuration
/// terminates the process with the sentinel exit code. An empty `save`
/// policy only warns.
async fn verify_store_configuration(store: &StoreClient) -> Result<()> {
    let won = store
        .set_if_absent_with_ttl(
            VERIFICATION_SENTINEL_KEY,
            &chrono::Utc::now().to_rfc3339(),
            VERIFICATION_SENTINEL_TTL_MS,
        )
        .await?;
    if !won {
        debug!("Store configuration already verified this generation");
        return Ok(());
    }

    let configured = store
        .config_get("notify-keyspace-events")
        .await?
        .unwrap_or_default();
    if !keyspace_events_cover_required(&configured) {
        error!(
            configured = %configured,
            required = REQUIRED_KEYSPACE_EVENTS,
            "Store keyspace notifications are misconfigured; set notify-keyspace-events to {}",
            REQUIRED_KEYSPACE_EVENTS
        );
        std::process::exit(EXIT_CODE_KEYSPACE_MISCONFIGURED);
    }

    let save_policy = store.config_get("save").await?.unwrap_or_default();
    if save_policy.trim().is_empty() {
        warn!("Store has no save policy; queued actions will not survive a store restart");
    }

    info!("Store configuration verified");
    Ok(())
}

/// Whether a `notify-keyspace-events` value covers the required `AKE`
/// classes: keyspace channels, keyevent channels, and all command
/// classes.
pub(crate) fn keyspace_events_cover_required(configured: &str) -> bool {
    let has_all_classes =
        configured.contains('A') || "g$lshzxe".chars().all(|class| configured.contains(class));
    configured.contains('K') && configured.contains('E') && has_all_classes
}
