//! Wires watching, debouncing, syncing and peer notifications together.

use miette::Diagnostic;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::observer::SyncObserver;
use crate::peer::{NotificationBridge, PubSub, PubSubError};
use crate::sync::{FlushOutcome, GitOps, SyncEngine, SyncError, SyncSettings};
use crate::watch::{
    ChangeCoalescer, ChangeEvent, DebounceScheduler, EventCollector, FsWatcher, IgnoreSet,
    PendingChangeSet, PlaceholderChange, WatchError,
};

#[derive(Error, Diagnostic, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    PubSub(#[from] PubSubError),

    #[error("Failed to resolve {}: {source}", path.display())]
    #[diagnostic(code(gitsync::orchestrator::root))]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Record of one flush.
#[derive(Debug)]
pub struct SyncPass {
    pub changes: PendingChangeSet,
    pub placeholders: Vec<PlaceholderChange>,
    /// Coalesced event summary
    pub summary: String,
    pub outcome: Result<FlushOutcome, SyncError>,
}

impl SyncPass {
    /// Comment of the regular commit, if one was made.
    pub fn comment(&self) -> Option<&str> {
        match &self.outcome {
            Ok(FlushOutcome::Committed { comment }) | Ok(FlushOutcome::Pushed { comment, .. }) => {
                Some(comment.as_str())
            }
            _ => None,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    scheduler: JoinHandle<()>,
    watcher: FsWatcher,
}

/// Owns every component of a running synchronizer.
pub struct Orchestrator<P: PubSub, G: GitOps + Send + Sync + 'static> {
    config: Config,
    root: PathBuf,
    engine: Arc<SyncEngine<G>>,
    coalescer: Arc<ChangeCoalescer>,
    bridge: Arc<NotificationBridge<P, G>>,
    collector: Arc<EventCollector>,
    passes: broadcast::Sender<Arc<SyncPass>>,
    running: Option<Running>,
}

impl<P: PubSub, G: GitOps + Send + Sync + 'static> Orchestrator<P, G> {
    /// Validate the configuration and open the repository.
    pub fn new(
        config: Config,
        git: G,
        bus: P,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let engine = SyncEngine::new(git, &config.root, SyncSettings::from_config(&config))
            .with_observer(observer);
        engine.open()?;

        // Watch events carry absolute paths
        let root = config
            .root
            .canonicalize()
            .map_err(|source| OrchestratorError::Root {
                path: config.root.clone(),
                source,
            })?;

        let engine = Arc::new(engine);
        let bridge = Arc::new(NotificationBridge::new(
            Arc::new(bus),
            engine.clone(),
            config.channel.clone(),
        ));
        let coalescer = Arc::new(ChangeCoalescer::new(&root, config.priorities.clone()));
        let (passes, _) = broadcast::channel(16);

        Ok(Self {
            config,
            root,
            engine,
            coalescer,
            bridge,
            collector: Arc::new(EventCollector::new()),
            passes,
            running: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SyncEngine<G>> {
        &self.engine
    }

    pub fn bridge(&self) -> &Arc<NotificationBridge<P, G>> {
        &self.bridge
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Receive a record of every finished flush.
    pub fn passes(&self) -> broadcast::Receiver<Arc<SyncPass>> {
        self.passes.subscribe()
    }

    /// Start watching, the debounce loop and the peer bridge.
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        if self.running.is_some() {
            return Ok(());
        }

        let ignore = IgnoreSet::new(&self.config.ignore_patterns[..])?;
        self.bridge.start().await?;
        let watcher = match FsWatcher::start(&self.root, ignore, self.collector.clone()) {
            Ok(watcher) => watcher,
            Err(e) => {
                self.bridge.stop().await;
                return Err(e.into());
            }
        };

        let scheduler = DebounceScheduler::new(
            self.collector.clone(),
            self.config.tick,
            self.config.quiet_period,
        );
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let engine = self.engine.clone();
        let coalescer = self.coalescer.clone();
        let bridge = self.bridge.clone();
        let passes = self.passes.clone();

        let scheduler = tokio::spawn(async move {
            scheduler
                .run(token, move |events| {
                    let engine = engine.clone();
                    let coalescer = coalescer.clone();
                    let bridge = bridge.clone();
                    let passes = passes.clone();
                    async move {
                        let pass = run_pass(events, engine, coalescer, &bridge).await;
                        let _ = passes.send(Arc::new(pass));
                    }
                })
                .await;
        });

        info!(root = %self.root.display(), "synchronizer started");
        self.running = Some(Running {
            cancel,
            scheduler,
            watcher,
        });
        Ok(())
    }

    /// Stop after the current flush, then release the watch and subscription.
    pub async fn stop(&mut self) {
        let Some(Running {
            cancel,
            scheduler,
            watcher,
        }) = self.running.take()
        else {
            return;
        };

        cancel.cancel();
        if let Err(e) = scheduler.await {
            error!(error = %e, "debounce task failed");
        }
        watcher.close();
        self.bridge.stop().await;
        info!("synchronizer stopped");
    }
}

/// Coalesce a batch, flush it and announce a push.
pub(crate) async fn run_pass<P: PubSub, G: GitOps + Send + Sync + 'static>(
    events: Vec<ChangeEvent>,
    engine: Arc<SyncEngine<G>>,
    coalescer: Arc<ChangeCoalescer>,
    bridge: &NotificationBridge<P, G>,
) -> SyncPass {
    let received = events.len();
    let flush = tokio::task::spawn_blocking(move || {
        let changes = coalescer.coalesce(events);
        let placeholders = coalescer.maintain_placeholders(&changes);
        let summary = coalescer.summarize(&changes);
        debug!(received, paths = changes.len(), %summary, "batch coalesced");
        let outcome = engine.flush(&summary);
        SyncPass {
            changes,
            placeholders,
            summary,
            outcome,
        }
    })
    .await;

    let pass = match flush {
        Ok(pass) => pass,
        Err(e) => {
            error!(error = %e, "flush task panicked");
            return SyncPass {
                changes: PendingChangeSet::default(),
                placeholders: Vec::new(),
                summary: String::new(),
                outcome: Err(SyncError::Io(std::io::Error::other(e.to_string()))),
            };
        }
    };

    if let Ok(FlushOutcome::Pushed { .. }) = &pass.outcome
        && let Err(e) = bridge.publish().await
    {
        warn!(error = %e, "failed to notify peers");
    }
    pass
}
