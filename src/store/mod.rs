//! Store adapter: the async client, the derived-connection pool, and the
//! pub/sub listener task.

pub mod client;
pub mod connections;
pub mod listener;

pub use client::StoreClient;
pub use connections::ConnectionPool;
pub use listener::{ListenerStats, NotificationHandler, PubSubListener};
