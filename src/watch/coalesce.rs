//! Reduce a batch of raw events to one decision per path.
//!
//! Besides coalescing, this pass keeps `.empty` placeholders in directories
//! that would otherwise vanish from the git tree, and renders the batch as a
//! short human-readable summary.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::event::{ChangeEvent, ChangeKind, PriorityTable};

/// File name of the placeholder kept in otherwise-empty directories.
pub const EMPTY_MARKER: &str = ".empty";

/// One representative event per path, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct PendingChangeSet {
    order: Vec<PathBuf>,
    by_path: HashMap<PathBuf, ChangeEvent>,
}

impl PendingChangeSet {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&ChangeEvent> {
        self.by_path.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.order.iter().filter_map(|p| self.by_path.get(p))
    }

    /// Keep `event` if it outranks the current entry for its path.
    fn offer(&mut self, event: ChangeEvent, priorities: &PriorityTable) {
        match self.by_path.get(&event.path) {
            None => {
                self.order.push(event.path.clone());
                self.by_path.insert(event.path.clone(), event);
            }
            Some(current) => {
                let new_priority = priorities.priority(&event.kind);
                let current_priority = priorities.priority(&current.kind);
                let wins = new_priority > current_priority
                    || (new_priority == current_priority
                        && event.observed_at >= current.observed_at);
                if wins {
                    self.by_path.insert(event.path.clone(), event);
                }
            }
        }
    }
}

/// Placeholder created or removed while maintaining directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderChange {
    Created(PathBuf),
    Removed(PathBuf),
}

pub struct ChangeCoalescer {
    root: PathBuf,
    priorities: PriorityTable,
}

impl ChangeCoalescer {
    pub fn new(root: impl Into<PathBuf>, priorities: PriorityTable) -> Self {
        Self {
            root: root.into(),
            priorities,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn coalesce(&self, events: Vec<ChangeEvent>) -> PendingChangeSet {
        let mut changes = PendingChangeSet::default();
        for event in events {
            changes.offer(event, &self.priorities);
        }
        changes
    }

    /// Create or remove `.empty` markers in every directory the batch touched.
    ///
    /// Directories that disappeared or cannot be read are skipped with a
    /// warning; a later batch will see them again.
    pub fn maintain_placeholders(&self, changes: &PendingChangeSet) -> Vec<PlaceholderChange> {
        let mut applied = Vec::new();
        for dir in self.placeholder_candidates(changes) {
            if !dir.is_dir() {
                continue;
            }
            match maintain_placeholder(&dir) {
                Ok(Some(change)) => {
                    debug!("Placeholder update: {:?}", change);
                    applied.push(change);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to maintain placeholder in {}: {}", dir.display(), e),
            }
        }
        applied
    }

    fn placeholder_candidates(&self, changes: &PendingChangeSet) -> BTreeSet<PathBuf> {
        let mut dirs = BTreeSet::new();
        for event in changes.iter() {
            for path in event.paths() {
                if event.is_dir {
                    dirs.insert(path.to_path_buf());
                }
                if let Some(parent) = path.parent()
                    && parent != self.root
                    && parent.starts_with(&self.root)
                {
                    dirs.insert(parent.to_path_buf());
                }
            }
        }
        dirs
    }

    /// Render the batch as `[<abbrev> <relative path>]` tokens.
    ///
    /// Placeholder events and directory modifications (noise from child
    /// changes) are left out.
    pub fn summarize(&self, changes: &PendingChangeSet) -> String {
        changes
            .iter()
            .filter(|e| e.file_name() != Some(EMPTY_MARKER))
            .filter(|e| !(e.is_dir && e.kind == ChangeKind::Modified))
            .map(|e| format!("[{} {}]", e.kind.abbrev(), self.relative(&e.path).display()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

fn maintain_placeholder(dir: &Path) -> io::Result<Option<PlaceholderChange>> {
    let marker = dir.join(EMPTY_MARKER);
    let entries = fs::read_dir(dir)?.count();

    if entries == 0 {
        fs::File::create(&marker)?;
        return Ok(Some(PlaceholderChange::Created(marker)));
    }
    if entries > 1 && marker.is_file() {
        fs::remove_file(&marker)?;
        return Ok(Some(PlaceholderChange::Removed(marker)));
    }
    Ok(None)
}
