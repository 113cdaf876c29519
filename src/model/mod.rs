//! Value objects: actions, events, lifecycle status, and the configuration
//! records the registry stores.

pub mod action;
pub mod configuration;
pub mod event;
pub mod status;

pub use action::{Action, ActionMeta, OriginMeta};
pub use configuration::{ActionConfiguration, ExtendableActionConfiguration, ResourceStructure};
pub use event::{Event, EventMeta};
pub use status::ActionStatus;
