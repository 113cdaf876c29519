//! Pub/sub listener task.
//!
//! One listener owns one connection in subscribe state and serves both
//! fabrics: keyspace-notification channels (payload is the mutating
//! command name) and event channels (payload is a serialized event).
//! Channel handlers are dispatched on their own tasks so a slow handler
//! never stalls the stream, and so handlers may send control commands
//! back to this listener without deadlocking.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{EngineError, Result};

/// Statistics about a listener connection.
#[derive(Debug, Clone, Default)]
pub struct ListenerStats {
    pub connected: bool,
    pub channels_subscribed: usize,
    pub messages_received: u64,
    pub dispatch_misses: u64,
    pub last_message_at: Option<SystemTime>,
}

/// Per-channel message handler.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle one message received on a subscribed channel.
    async fn handle_notification(&self, channel: &str, payload: &str);
}

enum ListenerCommand {
    Subscribe {
        channel: String,
        handler: Arc<dyn NotificationHandler>,
        ack: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        channel: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Handle to a spawned listener task. Cloning shares the task.
#[derive(Clone)]
pub struct PubSubListener {
    control: mpsc::Sender<ListenerCommand>,
    stats: Arc<RwLock<ListenerStats>>,
}

impl PubSubListener {
    /// Spawn the listener loop over a connection in pub/sub state.
    pub fn spawn(pubsub: redis::aio::PubSub) -> Self {
        let (control, control_rx) = mpsc::channel(64);
        let stats = Arc::new(RwLock::new(ListenerStats {
            connected: true,
            ..ListenerStats::default()
        }));

        tokio::spawn(run_listener(pubsub, control_rx, Arc::clone(&stats)));

        Self { control, stats }
    }

    /// Subscribe a handler to a channel.
    ///
    /// Returns only after the subscription is established on the store,
    /// so a caller may rely on notifications from that point on.
    /// Subscribing an already-subscribed channel is a no-op.
    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.control
            .send(ListenerCommand::Subscribe {
                channel: channel.into(),
                handler,
                ack,
            })
            .await
            .map_err(|_| EngineError::generic("listener task is gone"))?;
        done.await
            .map_err(|_| EngineError::generic("listener task dropped subscribe ack"))?
    }

    /// Remove a channel subscription and its handler.
    pub async fn unsubscribe(&self, channel: impl Into<String>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.control
            .send(ListenerCommand::Unsubscribe {
                channel: channel.into(),
                ack,
            })
            .await
            .map_err(|_| EngineError::generic("listener task is gone"))?;
        done.await
            .map_err(|_| EngineError::generic("listener task dropped unsubscribe ack"))?
    }

    /// Stop the listener loop and drop its connection.
    pub async fn shutdown(&self) {
        let _ = self.control.send(ListenerCommand::Shutdown).await;
    }

    pub fn stats(&self) -> ListenerStats {
        self.stats.read().unwrap().clone()
    }
}

async fn run_listener(
    pubsub: redis::aio::PubSub,
    mut control_rx: mpsc::Receiver<ListenerCommand>,
    stats: Arc<RwLock<ListenerStats>>,
) {
    let mut handlers: HashMap<String, Arc<dyn NotificationHandler>> = HashMap::new();
    let (mut sink, mut stream) = pubsub.split();

    loop {
        tokio::select! {
            command = control_rx.recv() => match command {
                None | Some(ListenerCommand::Shutdown) => break,
                Some(ListenerCommand::Subscribe { channel, handler, ack }) => {
                    if handlers.contains_key(&channel) {
                        debug!(channel = %channel, "Already subscribed, reusing subscription");
                        let _ = ack.send(Ok(()));
                        continue;
                    }
                    let outcome = sink
                        .subscribe(&channel)
                        .await
                        .map_err(EngineError::from);
                    if outcome.is_ok() {
                        handlers.insert(channel.clone(), handler);
                        let mut stats = stats.write().unwrap();
                        stats.channels_subscribed = handlers.len();
                        debug!(channel = %channel, "Subscribed");
                    }
                    let _ = ack.send(outcome);
                }
                Some(ListenerCommand::Unsubscribe { channel, ack }) => {
                    let outcome = if handlers.remove(&channel).is_some() {
                        sink.unsubscribe(&channel)
                            .await
                            .map_err(EngineError::from)
                    } else {
                        Ok(())
                    };
                    {
                        let mut stats = stats.write().unwrap();
                        stats.channels_subscribed = handlers.len();
                    }
                    debug!(channel = %channel, "Unsubscribed");
                    let _ = ack.send(outcome);
                }
            },
            message = stream.next() => match message {
                None => {
                    error!("Pub/sub connection closed, listener loop ending");
                    let mut stats = stats.write().unwrap();
                    stats.connected = false;
                    break;
                }
                Some(message) => {
                    let channel = message.get_channel_name().to_string();
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "Undecodable pub/sub payload");
                            continue;
                        }
                    };

                    {
                        let mut stats = stats.write().unwrap();
                        stats.messages_received += 1;
                        stats.last_message_at = Some(SystemTime::now());
                    }

                    match handlers.get(&channel) {
                        Some(handler) => {
                            let handler = Arc::clone(handler);
                            tokio::spawn(async move {
                                handler.handle_notification(&channel, &payload).await;
                            });
                        }
                        None => {
                            let mut stats = stats.write().unwrap();
                            stats.dispatch_misses += 1;
                        }
                    }
                }
            },
        }
    }

    debug!("Listener loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHandler {
        seen: Arc<RwLock<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl NotificationHandler for RecordingHandler {
        async fn handle_notification(&self, channel: &str, payload: &str) {
            self.seen
                .write()
                .unwrap()
                .push((channel.to_string(), payload.to_string()));
        }
    }

    #[test]
    fn test_default_stats() {
        let stats = ListenerStats::default();
        assert!(!stats.connected);
        assert_eq!(stats.channels_subscribed, 0);
        assert_eq!(stats.messages_received, 0);
    }

    #[tokio::test]
    async fn test_handler_records_messages() {
        let seen = Arc::new(RwLock::new(Vec::new()));
        let handler = RecordingHandler {
            seen: Arc::clone(&seen),
        };
        handler
            .handle_notification("__keyspace@0__:EngineQueue", "lpush")
            .await;
        assert_eq!(
            seen.read().unwrap().as_slice(),
            &[(
                "__keyspace@0__:EngineQueue".to_string(),
                "lpush".to_string()
            )]
        );
    }
}
