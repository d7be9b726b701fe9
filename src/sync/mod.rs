//! Sync module - Git-based synchronization of a watched directory.
//!
//! This module commits local changes, merges the remote branch, resolves
//! conflicts without losing either side's edits and pushes the result.

mod conflict;
mod engine;
#[cfg(test)]
mod engine_test;
mod git;
mod status;

pub use conflict::{
    ConflictRecord, ConflictResolver, LOCAL_REF, PRE_MERGE_REF, REMOTE_REF, RESOLUTION_MESSAGE,
    ResolutionAction, ResolveError, conflict_copy_name,
};
pub use engine::{FlushOutcome, MergeOutcome, SyncEngine, SyncError, SyncSettings};
#[cfg(test)]
pub use git::MockGitOps;
pub use git::{GitError, GitOps, RealGit, Side};
pub use status::{
    CommitSignature, StatusCode, StatusEntry, Unmerged, parse_porcelain, parse_signature,
    parse_stages, status_comment,
};
