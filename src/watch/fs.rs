//! Adapter from `notify` filesystem events to [`ChangeEvent`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::WatchError;
use super::collector::EventCollector;
use super::event::{ChangeEvent, ChangeKind};
use super::ignore::IgnoreSet;

/// Recursive watch subscription on the synchronized root.
///
/// Events pass through the ignore set and land in the collector; the
/// subscription ends when [`FsWatcher::close`] is called or the value dropped.
pub struct FsWatcher {
    root: PathBuf,
    watcher: RecommendedWatcher,
}

impl FsWatcher {
    pub fn start(
        root: &Path,
        ignore: IgnoreSet,
        collector: Arc<EventCollector>,
    ) -> Result<Self, WatchError> {
        let base = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in translate(&event) {
                        if let Some(change) = apply_ignore(change, &base, &ignore) {
                            collector.on_event(change);
                        }
                    }
                }
                Err(e) => warn!("Filesystem watch error: {}", e),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| WatchError::Watch {
            path: root.to_path_buf(),
            source: e,
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Watch {
                path: root.to_path_buf(),
                source: e,
            })?;

        info!("Watching {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Close the watch subscription.
    pub fn close(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            debug!("Unwatch of {} failed: {}", self.root.display(), e);
        }
        info!("Stopped watching {}", self.root.display());
    }
}

fn each(event: &Event, kind: ChangeKind, is_dir: impl Fn(&Path) -> bool) -> Vec<ChangeEvent> {
    event
        .paths
        .iter()
        .map(|p| ChangeEvent::new(p, kind.clone(), is_dir(p)))
        .collect()
}

/// Map one `notify` event to zero or more change events.
pub fn translate(event: &Event) -> Vec<ChangeEvent> {
    match &event.kind {
        EventKind::Create(kind) => {
            let folder = matches!(kind, CreateKind::Folder);
            each(event, ChangeKind::Created, |p: &Path| folder || p.is_dir())
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let (from, to) = (&event.paths[0], &event.paths[1]);
            vec![ChangeEvent::new(
                from,
                ChangeKind::Moved { to: to.clone() },
                to.is_dir(),
            )]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            each(event, ChangeKind::Deleted, |_: &Path| false)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            each(event, ChangeKind::Created, |p: &Path| p.is_dir())
        }
        // Backends that cannot pair rename halves report each side separately.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                ChangeEvent::new(p, kind, p.is_dir())
            })
            .collect(),
        EventKind::Modify(_) => each(event, ChangeKind::Modified, |p: &Path| p.is_dir()),
        EventKind::Remove(kind) => {
            let folder = matches!(kind, RemoveKind::Folder);
            each(event, ChangeKind::Deleted, |_: &Path| folder)
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Drop events ignored below `root`. A move with one ignored end degrades to
/// a plain create or delete of the other end, so atomic-save editors still
/// register.
pub fn apply_ignore(event: ChangeEvent, root: &Path, ignore: &IgnoreSet) -> Option<ChangeEvent> {
    let moved_to = match &event.kind {
        ChangeKind::Moved { to } => Some(to.clone()),
        _ => None,
    };
    let Some(to) = moved_to else {
        return (!ignore.is_ignored_in(root, &event.path)).then_some(event);
    };

    match (
        ignore.is_ignored_in(root, &event.path),
        ignore.is_ignored_in(root, &to),
    ) {
        (false, false) => Some(event),
        (true, true) => None,
        (true, false) => Some(ChangeEvent {
            path: to,
            kind: ChangeKind::Created,
            ..event
        }),
        (false, true) => Some(ChangeEvent {
            kind: ChangeKind::Deleted,
            ..event
        }),
    }
}
