//! Change events delivered by the filesystem watcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::time::Instant;

/// Kind of change observed on a path.
///
/// `Moved` carries the destination; the event's own path is the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved { to: PathBuf },
}

/// Payload-free discriminant of [`ChangeKind`], used as a priority table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKindTag {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl ChangeKind {
    pub fn tag(&self) -> ChangeKindTag {
        match self {
            ChangeKind::Created => ChangeKindTag::Created,
            ChangeKind::Modified => ChangeKindTag::Modified,
            ChangeKind::Deleted => ChangeKindTag::Deleted,
            ChangeKind::Moved { .. } => ChangeKindTag::Moved,
        }
    }

    /// Abbreviation used in commit summaries.
    pub fn abbrev(&self) -> &'static str {
        match self {
            ChangeKind::Created => "+",
            ChangeKind::Modified => "M",
            ChangeKind::Deleted => "-",
            ChangeKind::Moved { .. } => "=>",
        }
    }
}

/// A single raw filesystem notification, stamped with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub is_dir: bool,
    pub observed_at: Instant,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir,
            observed_at: Instant::now(),
        }
    }

    /// Same event with an explicit arrival time.
    pub fn at(mut self, observed_at: Instant) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// Final path component, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Every path touched by this event (both ends of a move).
    pub fn paths(&self) -> Vec<&Path> {
        match &self.kind {
            ChangeKind::Moved { to } => vec![self.path.as_path(), to.as_path()],
            _ => vec![self.path.as_path()],
        }
    }
}

/// Priority of each change kind when several events hit the same path.
///
/// Kinds missing from the table fall back to `default`. With the stock table
/// this places `Deleted` and `Moved` level with `Created`, above `Modified`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    entries: HashMap<ChangeKindTag, u32>,
    default: u32,
}

impl PriorityTable {
    pub fn new(default: u32) -> Self {
        Self {
            entries: HashMap::new(),
            default,
        }
    }

    pub fn with(mut self, tag: ChangeKindTag, priority: u32) -> Self {
        self.entries.insert(tag, priority);
        self
    }

    pub fn priority(&self, kind: &ChangeKind) -> u32 {
        self.entries
            .get(&kind.tag())
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::new(100)
            .with(ChangeKindTag::Created, 100)
            .with(ChangeKindTag::Modified, 90)
    }
}
