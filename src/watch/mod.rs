//! Watch module - filesystem events, debouncing and coalescing.
//!
//! Raw notifications flow from [`FsWatcher`] into the [`EventCollector`]; the
//! [`DebounceScheduler`] hands each settled batch to a flush callback, which
//! reduces it with the [`ChangeCoalescer`].

mod coalesce;
mod collector;
mod event;
mod fs;
mod ignore;
mod scheduler;

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub use coalesce::{ChangeCoalescer, EMPTY_MARKER, PendingChangeSet, PlaceholderChange};
pub use collector::EventCollector;
pub use event::{ChangeEvent, ChangeKind, ChangeKindTag, PriorityTable};
pub use fs::{FsWatcher, apply_ignore, translate};
pub use ignore::{DEFAULT_IGNORE_PATTERNS, IgnoreSet};
pub use scheduler::{DebounceScheduler, FlightGuard};

/// Errors raised while setting up filesystem watching.
#[derive(Error, Diagnostic, Debug)]
pub enum WatchError {
    #[error("Invalid ignore pattern '{pattern}': {message}")]
    #[diagnostic(code(gitsync::watch::invalid_pattern))]
    InvalidPattern { pattern: String, message: String },

    #[error("Failed to watch {}: {source}", path.display())]
    #[diagnostic(
        code(gitsync::watch::subscribe_failed),
        help("Check that the directory exists and the inotify watch limit is not exhausted.")
    )]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
