//! In-process pub/sub bus for single-host use and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::bus::{
    MessageKind, PubSub, PubSubError, PubSubMessage, SUBSCRIPTION_BUFFER, Subscription,
};

/// Pub/sub bus broadcasting payloads to every subscriber of a channel.
#[derive(Clone)]
pub struct MemoryBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// Create a new MemoryBus with a buffer of 100 messages per channel.
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(channel).map_or(0, |tx| tx.receiver_count())
    }
}

impl PubSub for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        // No subscribers is not an error
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        let mut source = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = channel.to_string();

        tokio::spawn(async move {
            let _ = tx
                .send(PubSubMessage::new(MessageKind::Subscribe, name.clone()))
                .await;
            loop {
                let payload = tokio::select! {
                    _ = token.cancelled() => break,
                    received = source.recv() => received,
                };
                match payload {
                    Ok(data) => {
                        if tx.send(PubSubMessage::message(data)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            drop(source);
            let _ = tx
                .send(PubSubMessage::new(MessageKind::Unsubscribe, name))
                .await;
        });

        Ok(Subscription::new(channel, rx, cancel))
    }
}
