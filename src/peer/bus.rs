//! Publish/subscribe transport seam.

use miette::Diagnostic;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffer between a transport's forwarding task and its subscriber.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Error, Diagnostic, Debug)]
pub enum PubSubError {
    #[error("Failed to connect to {url}: {source}")]
    #[diagnostic(
        code(gitsync::peer::connection_failed),
        help("Is the Redis server running? Set GITSYNC_REDIS_URL to point to the correct server.")
    )]
    Connection {
        url: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("Connecting to {url} timed out after {after:?}")]
    #[diagnostic(code(gitsync::peer::timeout))]
    Timeout { url: String, after: Duration },

    #[error("Redis command failed: {0}")]
    #[diagnostic(code(gitsync::peer::command_failed))]
    Command(#[from] redis::RedisError),

    #[error("Invalid push notice: {0}")]
    #[diagnostic(code(gitsync::peer::invalid_notice))]
    Encode(#[from] serde_json::Error),
}

/// Kind of message delivered on a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Subscription confirmed; `data` is the channel name.
    Subscribe,
    /// A published payload.
    Message,
    /// Subscription ended; `data` is the channel name.
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub kind: MessageKind,
    pub data: String,
}

impl PubSubMessage {
    pub fn new(kind: MessageKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn message(data: impl Into<String>) -> Self {
        Self::new(MessageKind::Message, data)
    }
}

/// Receiving end of a channel subscription.
///
/// Dropping the subscription or calling [`Subscription::unsubscribe`] stops
/// the transport's forwarding task.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<PubSubMessage>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        rx: mpsc::Receiver<PubSubMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx,
            cancel,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the transport has shut down.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        self.rx.recv().await
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A publish/subscribe transport.
pub trait PubSub: Send + Sync + 'static {
    fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), PubSubError>> + Send;

    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Subscription, PubSubError>> + Send;
}
