//! Announces pushes to peers and pulls when a peer announces one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::bus::{MessageKind, PubSub, PubSubError, Subscription};
use crate::observer::Milestone;
use crate::sync::{GitOps, SyncEngine};

/// Payload published after a successful push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushNotice {
    /// Id of the publishing instance
    pub origin: String,
    pub branch: String,
    pub pushed_at: DateTime<Utc>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Bridges a pub/sub channel and a [`SyncEngine`].
pub struct NotificationBridge<P: PubSub, G: GitOps + Send + Sync + 'static> {
    bus: Arc<P>,
    engine: Arc<SyncEngine<G>>,
    channel: String,
    origin: String,
    running: Mutex<Option<Running>>,
}

impl<P: PubSub, G: GitOps + Send + Sync + 'static> NotificationBridge<P, G> {
    pub fn new(bus: Arc<P>, engine: Arc<SyncEngine<G>>, channel: impl Into<String>) -> Self {
        Self {
            bus,
            engine,
            channel: channel.into(),
            origin: Uuid::new_v4().to_string(),
            running: Mutex::new(None),
        }
    }

    /// Id attached to this instance's notices.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Tell peers that new commits were pushed.
    pub async fn publish(&self) -> Result<(), PubSubError> {
        let notice = PushNotice {
            origin: self.origin.clone(),
            branch: self.engine.settings().branch.clone(),
            pushed_at: Utc::now(),
        };
        let payload = serde_json::to_string(&notice)?;
        self.bus.publish(&self.channel, &payload).await?;
        debug!(channel = %self.channel, "push notice published");
        Ok(())
    }

    /// Subscribe and start pulling on peer notices.
    pub async fn start(&self) -> Result<(), PubSubError> {
        if self.is_running() {
            return Ok(());
        }
        let subscription = self.bus.subscribe(&self.channel).await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            subscription,
            self.engine.clone(),
            self.origin.clone(),
            cancel.clone(),
        ));
        info!(channel = %self.channel, "listening for peer pushes");

        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        *running = Some(Running { cancel, task });
        Ok(())
    }

    /// Unsubscribe and wait for the receive task to finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(Running { cancel, task }) = running else {
            return;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            error!(error = %e, "bridge receive task failed");
        }
        debug!(channel = %self.channel, "bridge stopped");
    }
}

async fn receive_loop<G: GitOps + Send + Sync + 'static>(
    mut subscription: Subscription,
    engine: Arc<SyncEngine<G>>,
    origin: String,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.recv() => next,
        };
        let Some(message) = next else {
            warn!(channel = subscription.channel(), "subscription closed");
            break;
        };
        if message.kind != MessageKind::Message {
            debug!(kind = ?message.kind, "control message");
            continue;
        }

        match serde_json::from_str::<PushNotice>(&message.data) {
            Ok(notice) if notice.origin == origin => {
                debug!("own push notice, skipping");
                continue;
            }
            Ok(notice) => info!(peer = %notice.origin, branch = %notice.branch, "peer pushed"),
            Err(_) => info!(payload = %message.data, "peer signal"),
        }

        let observer = engine.observer().clone();
        observer.milestone(Milestone::BeforePull);
        let pull_engine = engine.clone();
        match tokio::task::spawn_blocking(move || pull_engine.pull_only()).await {
            Ok(Ok(outcome)) => debug!(?outcome, "pull finished"),
            // Already reported to the observer by the engine
            Ok(Err(_)) => {}
            Err(e) => error!(error = %e, "pull task panicked"),
        }
        observer.milestone(Milestone::AfterPull);
    }
    subscription.unsubscribe();
}
