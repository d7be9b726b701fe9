//! Loss-free resolution of merge conflicts.
//!
//! When both sides touched a file, each side's version is kept under a name
//! carrying its author and commit date and the original path is restored from
//! the pre-merge commit. Delete/modify conflicts keep the modified side.

use miette::Diagnostic;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::engine::SyncError;
use super::git::{GitError, GitOps, Side};
use super::status::{
    CommitSignature, StatusCode, StatusEntry, Unmerged, parse_signature, parse_stages,
};
use crate::config::Identity;

/// Message of the commit that records a resolution pass.
pub const RESOLUTION_MESSAGE: &str = "fix conflicts (automatic resolution)";

/// Reference of the merged-in remote commit.
pub const REMOTE_REF: &str = "FETCH_HEAD";
/// Reference of the local commit being merged into.
pub const LOCAL_REF: &str = "HEAD";
/// Local commit as it was before the merge started.
pub const PRE_MERGE_REF: &str = "ORIG_HEAD";

const STAGE_OURS: u8 = 2;
const STAGE_THEIRS: u8 = 3;

#[derive(Error, Diagnostic, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Git(#[from] GitError),

    #[error("filesystem operation failed: {0}")]
    #[diagnostic(code(gitsync::sync::conflict::io))]
    Io(#[from] std::io::Error),

    #[error("could not read author and date of {reference}")]
    #[diagnostic(code(gitsync::sync::conflict::signature))]
    Signature { reference: &'static str },
}

/// What was done with one conflicted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
    /// Both versions kept as side copies; `None` for a side that had no version.
    KeptBoth {
        theirs: Option<PathBuf>,
        ours: Option<PathBuf>,
    },
    /// Remote modification wins over a local deletion.
    KeptRemote,
    /// Local modification wins over a remote deletion.
    KeptLocal,
    /// Deleted on both sides.
    AcceptedDeletion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub path: String,
    pub code: StatusCode,
    pub action: ResolutionAction,
}

/// Name of the side copy for `file_name` written by `signature`'s author.
pub fn conflict_copy_name(file_name: &Path, signature: &CommitSignature) -> String {
    numbered_copy_name(file_name, signature, 1)
}

/// Like [`conflict_copy_name`], with ` (n)` appended to the bracket for `n > 1`.
fn numbered_copy_name(file_name: &Path, signature: &CommitSignature, n: usize) -> String {
    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file_name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let counter = if n > 1 { format!(" ({})", n) } else { String::new() };
    let name = format!(
        "{} [{}, {}]{}{}",
        stem,
        signature.author,
        signature.stamp(),
        counter,
        ext
    );
    sanitize_filename::sanitize(name)
}

/// Resolves every unmerged path of an in-progress merge and commits the result.
pub struct ConflictResolver<'a, G: GitOps> {
    git: &'a G,
    root: &'a Path,
    remote_signature: Option<CommitSignature>,
    local_signature: Option<CommitSignature>,
    /// Side copies written by this pass, relative to `root`.
    copies: Vec<PathBuf>,
}

impl<'a, G: GitOps> ConflictResolver<'a, G> {
    pub fn new(git: &'a G, root: &'a Path) -> Self {
        Self {
            git,
            root,
            remote_signature: None,
            local_signature: None,
            copies: Vec::new(),
        }
    }

    /// Resolve the unmerged entries among `entries`, then stage everything and
    /// commit as `identity`.
    ///
    /// The first failure aborts the pass. Side copies written so far are
    /// removed again and the merge stays in progress for the caller to abort.
    pub fn resolve(
        mut self,
        entries: &[StatusEntry],
        identity: &Identity,
    ) -> Result<Vec<ConflictRecord>, SyncError> {
        let result = self.resolve_all(entries, identity);
        if result.is_err() {
            self.discard_copies();
        }
        result
    }

    fn resolve_all(
        &mut self,
        entries: &[StatusEntry],
        identity: &Identity,
    ) -> Result<Vec<ConflictRecord>, SyncError> {
        let mut records = Vec::new();
        for entry in entries {
            let Some(kind) = entry.code.unmerged() else {
                continue;
            };
            let action = self
                .resolve_path(&entry.path, kind)
                .map_err(|source| SyncError::Resolution {
                    path: entry.path.clone(),
                    source,
                })?;
            info!(path = %entry.path, code = %entry.code, ?action, "conflict resolved");
            records.push(ConflictRecord {
                path: entry.path.clone(),
                code: entry.code,
                action,
            });
        }

        self.git.add_all(self.root)?;
        self.git.commit(self.root, RESOLUTION_MESSAGE, identity)?;
        Ok(records)
    }

    fn resolve_path(
        &mut self,
        path: &str,
        kind: Unmerged,
    ) -> Result<ResolutionAction, ResolveError> {
        match kind {
            Unmerged::BothSides => self.keep_both(path),
            Unmerged::DeletedByUs => Ok(ResolutionAction::KeptRemote),
            Unmerged::DeletedByThem => {
                self.git.checkout_side(self.root, Side::Ours, path)?;
                Ok(ResolutionAction::KeptLocal)
            }
            Unmerged::BothDeleted => Ok(ResolutionAction::AcceptedDeletion),
        }
    }

    fn keep_both(&mut self, path: &str) -> Result<ResolutionAction, ResolveError> {
        let stages = parse_stages(&self.git.unmerged_stages(self.root, path)?.stdout);
        debug!(path, ?stages, "unmerged stages");

        let theirs = if stages.contains(&STAGE_THEIRS) {
            self.git.checkout_side(self.root, Side::Theirs, path)?;
            let signature = self.signature(REMOTE_REF)?;
            Some(self.move_aside(path, &signature)?)
        } else {
            warn!(path, "no remote version to keep");
            None
        };

        let ours = if stages.contains(&STAGE_OURS) {
            self.git.checkout_side(self.root, Side::Ours, path)?;
            let signature = self.signature(LOCAL_REF)?;
            let copy = self.move_aside(path, &signature)?;
            self.git.checkout_ref(self.root, PRE_MERGE_REF, path)?;
            Some(copy)
        } else {
            None
        };

        Ok(ResolutionAction::KeptBoth { theirs, ours })
    }

    /// Rename the working copy of `path` next to itself under its side name.
    ///
    /// An existing entry under that name is never replaced; the next free
    /// numbered name is used instead.
    fn move_aside(
        &mut self,
        path: &str,
        signature: &CommitSignature,
    ) -> Result<PathBuf, ResolveError> {
        let relative = Path::new(path);
        let file_name = relative.file_name().map(Path::new).unwrap_or(relative);

        let mut n = 1;
        let copy = loop {
            let candidate =
                relative.with_file_name(numbered_copy_name(file_name, signature, n));
            match fs::symlink_metadata(self.root.join(&candidate)) {
                Err(e) if e.kind() == ErrorKind::NotFound => break candidate,
                Err(e) => return Err(e.into()),
                Ok(_) => {
                    debug!(copy = %candidate.display(), "side copy name taken");
                    n += 1;
                }
            }
        };
        fs::rename(self.root.join(relative), self.root.join(&copy))?;
        self.copies.push(copy.clone());
        Ok(copy)
    }

    fn discard_copies(&mut self) {
        for copy in self.copies.drain(..) {
            if let Err(e) = fs::remove_file(self.root.join(&copy)) {
                warn!(copy = %copy.display(), error = %e, "could not remove side copy");
            }
        }
    }

    fn signature(&mut self, reference: &'static str) -> Result<CommitSignature, ResolveError> {
        let cached = match reference {
            REMOTE_REF => &self.remote_signature,
            _ => &self.local_signature,
        };
        if let Some(signature) = cached {
            return Ok(signature.clone());
        }

        let output = self.git.commit_signature(self.root, reference)?;
        let signature =
            parse_signature(&output.stdout).ok_or(ResolveError::Signature { reference })?;
        match reference {
            REMOTE_REF => self.remote_signature = Some(signature.clone()),
            _ => self.local_signature = Some(signature.clone()),
        }
        Ok(signature)
    }
}
