//! # Action Engine
//!
//! A process-resident runtime that accepts named actions, routes them to
//! registered handlers, executes them on a worker and delivers the result
//! back to the caller. Engines cooperate as a pool through a shared
//! keyspace-notifying key/value store: any engine may enqueue an action,
//! any engine subscribed to the target queue may claim and execute it,
//! and results travel back over per-action pub/sub channels.
//!
//! ## Usage
//!
//! ```no_run
//! use action_engine::{Engine, EngineConfig};
//! use serde_json::{json, Map};
//!
//! # async fn example() -> Result<(), action_engine::EngineError> {
//! let engine = Engine::new(EngineConfig::from_env())?;
//!
//! engine.register_handler_fn("ExecuteSimpleDummy", |_context, _arguments| async {
//!     Ok(json!({"AID": "x"}))
//! });
//!
//! engine.await_ready().await?;
//!
//! let final_message = engine
//!     .publish_action_by_name_and_handle_response("ExecuteSimpleDummy", Map::new(), "u1")
//!     .await?;
//! assert_eq!(final_message["AID"], "x");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod registry;
pub mod signature;
pub mod store;
pub mod template;

pub use config::{EngineConfig, Environment};
pub use engine::{ChannelEvent, Engine};
pub use error::{EngineError, ErrorPayload, Result};
pub use ingest::{HarvestedMetadata, MetadataIngestor};
pub use model::{
    Action, ActionConfiguration, ActionStatus, Event, ExtendableActionConfiguration, OriginMeta,
    ResourceStructure,
};
pub use registry::{ActionHandler, HandlerContext, HandlerRegistry, Registry};
pub use store::{StoreClient, ListenerStats};
