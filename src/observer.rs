//! Presentation hooks for sync progress.

use std::fmt;
use tracing::{error, info, warn};

use crate::sync::SyncError;

/// Points in a sync pass a front end may want to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    /// A peer announced a push; pulling its changes.
    BeforePull,
    /// The pull triggered by a peer finished.
    AfterPull,
    /// Local commits are about to be pushed.
    BeforePush,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Milestone::BeforePull => "before pull",
            Milestone::AfterPull => "after pull",
            Milestone::BeforePush => "on push",
        };
        f.write_str(text)
    }
}

/// Which entry point a failure surfaced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Flush,
    PullOnly,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Flush => f.write_str("flush"),
            Stage::PullOnly => f.write_str("pull-only"),
        }
    }
}

/// Receives milestones and recoverable failures.
///
/// Called from blocking sync threads, so implementations must not block for
/// long.
pub trait SyncObserver: Send + Sync {
    fn milestone(&self, milestone: Milestone);

    fn failure(&self, stage: Stage, error: &SyncError);
}

/// Observer that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SyncObserver for LoggingObserver {
    fn milestone(&self, milestone: Milestone) {
        info!(%milestone, "sync milestone");
    }

    fn failure(&self, stage: Stage, error: &SyncError) {
        if error.is_recoverable() {
            warn!(%stage, error = %error, "sync pass failed, will retry on next change");
        } else {
            error!(%stage, error = %error, "sync pass failed");
        }
    }
}
