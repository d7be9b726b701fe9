//! Redis pub/sub transport.
//!
//! Publishing uses a multiplexed connection per call; each subscription owns
//! a dedicated pub/sub connection driven by a forwarding task.

use futures_util::StreamExt;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::bus::{
    MessageKind, PubSub, PubSubError, PubSubMessage, SUBSCRIPTION_BUFFER, Subscription,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed pub/sub bus.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    url: String,
    connect_timeout: Duration,
}

impl RedisBus {
    /// Create a bus for a Redis connection URL (e.g. `redis://localhost:6379`).
    pub fn new(url: &str) -> Result<Self, PubSubError> {
        let client = Client::open(url).map_err(|source| PubSubError::Connection {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            client,
            url: url.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connection(&self) -> Result<MultiplexedConnection, PubSubError> {
        timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| self.timed_out())?
        .map_err(|source| self.connection_failed(source))
    }

    fn timed_out(&self) -> PubSubError {
        PubSubError::Timeout {
            url: self.url.clone(),
            after: self.connect_timeout,
        }
    }

    fn connection_failed(&self, source: redis::RedisError) -> PubSubError {
        PubSubError::Connection {
            url: self.url.clone(),
            source,
        }
    }
}

impl PubSub for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        let mut conn = self.connection().await?;
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!(channel, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        let mut pubsub = timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|source| self.connection_failed(source))?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = channel.to_string();

        tokio::spawn(async move {
            let _ = tx
                .send(PubSubMessage::new(MessageKind::Subscribe, name.clone()))
                .await;
            {
                let mut messages = pubsub.on_message();
                loop {
                    let next = tokio::select! {
                        _ = token.cancelled() => break,
                        next = messages.next() => next,
                    };
                    let Some(msg) = next else {
                        warn!(channel = %name, "redis subscription closed by server");
                        break;
                    };
                    let data = match msg.get_payload::<String>() {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(channel = %name, error = %e, "undecodable payload");
                            String::new()
                        }
                    };
                    if tx.send(PubSubMessage::message(data)).await.is_err() {
                        break;
                    }
                }
            }
            if let Err(e) = pubsub.unsubscribe(&name).await {
                debug!(channel = %name, error = %e, "unsubscribe failed");
            }
            let _ = tx
                .send(PubSubMessage::new(MessageKind::Unsubscribe, name))
                .await;
        });

        Ok(Subscription::new(channel, rx, cancel))
    }
}
