//! Derived-connection pool.
//!
//! A connection in a blocking pop or pub/sub state cannot service other
//! commands, so every such use runs on a connection derived from the
//! primary client. Derived connections are cached by role
//! (`ActionSubscriber`, `<queue>Handler`, `<queue>Subscriber`) and reused;
//! destroying the pool closes all of them.
//!
//! Blocking-pop roles hold a dedicated non-multiplexed connection behind
//! a mutex: a blocked pop owns its socket outright, and concurrent pops
//! on the same role wait their turn instead of stalling unrelated
//! commands.

use redis::aio::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::store::client::StoreClient;
use crate::store::listener::PubSubListener;

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    store: StoreClient,
    commands: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
    listeners: Mutex<HashMap<String, PubSubListener>>,
}

impl ConnectionPool {
    pub fn new(store: StoreClient) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store,
                commands: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Dedicated command connection for a role, able to hold blocking
    /// calls. Created on first acquisition, cached afterwards; callers
    /// lock it for the duration of the blocking call.
    pub async fn command_connection(&self, role: &str) -> Result<Arc<Mutex<Connection>>> {
        let mut commands = self.inner.commands.lock().await;
        if let Some(connection) = commands.get(role) {
            return Ok(Arc::clone(connection));
        }
        debug!(role = role, "Opening derived command connection");
        let connection = Arc::new(Mutex::new(self.inner.store.duplicate().await?));
        commands.insert(role.to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    /// Dedicated subscription listener for a role. Created on first
    /// acquisition, cached afterwards.
    pub async fn listener(&self, role: &str) -> Result<PubSubListener> {
        let mut listeners = self.inner.listeners.lock().await;
        if let Some(listener) = listeners.get(role) {
            return Ok(listener.clone());
        }
        debug!(role = role, "Opening derived subscriber connection");
        let listener = PubSubListener::spawn(self.inner.store.pubsub().await?);
        listeners.insert(role.to_string(), listener.clone());
        Ok(listener)
    }

    /// Roles currently holding a derived connection.
    pub async fn roles(&self) -> Vec<String> {
        let commands = self.inner.commands.lock().await;
        let listeners = self.inner.listeners.lock().await;
        let mut roles: Vec<String> = commands.keys().chain(listeners.keys()).cloned().collect();
        roles.sort();
        roles
    }

    /// Close every derived connection and stop every listener task.
    pub async fn destroy(&self) {
        let mut commands = self.inner.commands.lock().await;
        let dropped = commands.len();
        commands.clear();

        let mut listeners = self.inner.listeners.lock().await;
        for (role, listener) in listeners.drain() {
            debug!(role = %role, "Shutting down derived subscriber");
            listener.shutdown().await;
        }
        debug!(command_connections = dropped, "Connection pool destroyed");
    }
}
