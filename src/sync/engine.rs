//! Sync engine - commit, merge and push a watched working tree.
//!
//! Each flush walks `dirty check → commit → fetch → merge (→ resolve) → push`.
//! Flushes and peer-triggered pulls share one lock, so at most one of them
//! touches the repository at a time.

use miette::Diagnostic;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::conflict::{ConflictRecord, ConflictResolver, REMOTE_REF, ResolveError};
use super::git::{GitError, GitOps};
use super::status::{StatusEntry, parse_porcelain, status_comment};
use crate::config::{CommentSource, Config, Identities};
use crate::observer::{LoggingObserver, Milestone, Stage, SyncObserver};

/// Errors that can occur during sync operations.
#[derive(Error, Diagnostic, Debug)]
pub enum SyncError {
    #[error("Git error: {0}")]
    #[diagnostic(code(gitsync::sync::git))]
    Git(#[from] GitError),

    #[error("Could not merge {remote}/{branch}: {source}")]
    #[diagnostic(
        code(gitsync::sync::merge_failed),
        help("The merge did not stop on conflicts; check the remote and the working tree.")
    )]
    NonConflictMergeFailure {
        remote: String,
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Failed to resolve conflict on {path}: {source}")]
    #[diagnostic(code(gitsync::sync::resolution))]
    Resolution {
        path: String,
        #[source]
        source: ResolveError,
    },

    #[error("Could not open repository at {}: {source}", path.display())]
    #[diagnostic(code(gitsync::sync::repository_init))]
    RepositoryInit {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {0}")]
    #[diagnostic(code(gitsync::sync::io))]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the next flush may succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SyncError::RepositoryInit { .. })
    }
}

/// Result of merging the remote branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No remote is configured.
    NoRemote,
    /// The remote exists but has no such branch yet.
    NoRemoteBranch,
    /// Fast-forward, already up to date, or a clean merge.
    Merged,
    /// Conflicts were resolved and recorded in a fix-up commit.
    Resolved(Vec<ConflictRecord>),
}

/// Result of one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to commit.
    Clean,
    /// Committed locally; no remote to push to.
    Committed { comment: String },
    /// Committed, merged with the remote and pushed.
    Pushed { comment: String, merge: MergeOutcome },
}

/// Engine settings taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub remote: String,
    pub branch: String,
    pub identities: Identities,
    pub comment_source: CommentSource,
    /// Written to `.git/info/exclude` when the repository is opened.
    pub exclude_patterns: Vec<String>,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            identities: config.identities.clone(),
            comment_source: config.comment_source,
            exclude_patterns: config.ignore_patterns.clone(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Sync engine for one working tree.
pub struct SyncEngine<G: GitOps> {
    git: G,
    root: PathBuf,
    settings: SyncSettings,
    observer: Arc<dyn SyncObserver>,
    lock: Mutex<()>,
}

impl<G: GitOps> SyncEngine<G> {
    pub fn new(git: G, root: impl Into<PathBuf>, settings: SyncSettings) -> Self {
        Self {
            git,
            root: root.into(),
            settings,
            observer: Arc::new(LoggingObserver),
            lock: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn observer(&self) -> &Arc<dyn SyncObserver> {
        &self.observer
    }

    /// Check if the root is a git working tree.
    pub fn is_initialized(&self) -> bool {
        self.root.join(".git").exists()
    }

    /// Create the root and repository if needed and register ignore patterns.
    pub fn open(&self) -> Result<(), SyncError> {
        let init_error = |source: Box<dyn std::error::Error + Send + Sync>| {
            SyncError::RepositoryInit {
                path: self.root.clone(),
                source,
            }
        };

        fs::create_dir_all(&self.root).map_err(|e| init_error(e.into()))?;
        if !self.is_initialized() {
            info!(root = %self.root.display(), "initializing repository");
            self.git.init(&self.root).map_err(|e| init_error(e.into()))?;
        }
        self.write_excludes().map_err(|e| init_error(e.into()))?;
        Ok(())
    }

    /// Append patterns missing from `.git/info/exclude`.
    fn write_excludes(&self) -> std::io::Result<()> {
        let info_dir = self.root.join(".git").join("info");
        fs::create_dir_all(&info_dir)?;
        let exclude = info_dir.join("exclude");
        let existing = fs::read_to_string(&exclude).unwrap_or_default();
        let present: Vec<&str> = existing.lines().map(str::trim).collect();

        let missing: Vec<&String> = self
            .settings
            .exclude_patterns
            .iter()
            .filter(|p| !present.contains(&p.trim()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&exclude)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        for pattern in &missing {
            writeln!(file, "{}", pattern)?;
        }
        debug!(count = missing.len(), "added exclude patterns");
        Ok(())
    }

    /// Current porcelain status.
    pub fn status(&self) -> Result<Vec<StatusEntry>, SyncError> {
        let output = self.git.status_porcelain(&self.root)?;
        Ok(parse_porcelain(&output.stdout))
    }

    pub fn is_dirty(&self) -> Result<bool, SyncError> {
        Ok(!self.status()?.is_empty())
    }

    /// Stage and commit everything as the regular identity.
    ///
    /// Returns the commit comment, or `None` when there was nothing to commit.
    pub fn commit(&self, summary: &str) -> Result<Option<String>, SyncError> {
        let entries = self.status()?;
        if entries.is_empty() {
            debug!("working tree clean, nothing to commit");
            return Ok(None);
        }

        let comment = match self.settings.comment_source {
            CommentSource::Events if !summary.trim().is_empty() => summary.to_string(),
            _ => status_comment(&entries),
        };
        self.git.add_all(&self.root)?;
        self.git
            .commit(&self.root, &comment, &self.settings.identities.regular)?;
        info!(%comment, "committed local changes");
        Ok(Some(comment))
    }

    /// Check if the configured remote exists.
    pub fn has_remote(&self) -> Result<bool, SyncError> {
        let output = self.git.remotes(&self.root)?;
        let remotes = String::from_utf8_lossy(&output.stdout);
        Ok(remotes.lines().any(|r| r.trim() == self.settings.remote))
    }

    /// Fetch and merge the remote branch, resolving conflicts if any.
    pub fn sync_with_remote(&self) -> Result<MergeOutcome, SyncError> {
        let SyncSettings { remote, branch, .. } = &self.settings;
        let merge_failure = |source: GitError| SyncError::NonConflictMergeFailure {
            remote: remote.clone(),
            branch: branch.clone(),
            source,
        };

        let heads = self
            .git
            .ls_remote_branch(&self.root, remote, branch)
            .map_err(merge_failure)?;
        if heads.stdout.iter().all(u8::is_ascii_whitespace) {
            info!(%remote, %branch, "remote branch does not exist yet, nothing to merge");
            return Ok(MergeOutcome::NoRemoteBranch);
        }

        self.git
            .fetch(&self.root, remote, branch)
            .map_err(merge_failure)?;

        match self
            .git
            .merge(&self.root, REMOTE_REF, &self.settings.identities.regular)
        {
            Ok(_) => {
                debug!(%remote, %branch, "merged");
                Ok(MergeOutcome::Merged)
            }
            Err(e) => {
                let entries = self.status()?;
                let conflicts = entries
                    .iter()
                    .filter(|entry| entry.code.unmerged().is_some())
                    .count();
                if conflicts == 0 {
                    return Err(merge_failure(e));
                }
                warn!(conflicts, "merge stopped on conflicts, resolving");
                match ConflictResolver::new(&self.git, &self.root)
                    .resolve(&entries, &self.settings.identities.conflict)
                {
                    Ok(records) => Ok(MergeOutcome::Resolved(records)),
                    Err(e) => {
                        // A half-resolved merge must never reach the regular commit
                        self.abort_merge();
                        Err(e)
                    }
                }
            }
        }
    }

    /// Whether a merge is in progress in the working tree.
    pub fn is_merging(&self) -> bool {
        self.root.join(".git").join("MERGE_HEAD").exists()
    }

    fn abort_merge(&self) {
        match self.git.merge_abort(&self.root) {
            Ok(_) => info!("merge aborted, the next flush merges again"),
            Err(e) => warn!(error = %e, "could not abort merge"),
        }
    }

    /// Abort a merge left behind by an earlier, interrupted pass.
    fn recover_interrupted_merge(&self) -> Result<(), SyncError> {
        if self.is_merging() {
            warn!("found an unfinished merge, aborting it");
            self.git.merge_abort(&self.root)?;
        }
        Ok(())
    }

    /// Push `HEAD` to the configured branch.
    pub fn push(&self) -> Result<(), SyncError> {
        self.observer.milestone(Milestone::BeforePush);
        self.git
            .push(&self.root, &self.settings.remote, &self.settings.branch)?;
        info!(remote = %self.settings.remote, branch = %self.settings.branch, "pushed");
        Ok(())
    }

    /// Commit local changes, merge the remote and push.
    #[instrument(skip(self, summary), fields(root = %self.root.display()))]
    pub fn flush(&self, summary: &str) -> Result<FlushOutcome, SyncError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = self.flush_locked(summary);
        self.report(Stage::Flush, result)
    }

    fn flush_locked(&self, summary: &str) -> Result<FlushOutcome, SyncError> {
        self.recover_interrupted_merge()?;
        let Some(comment) = self.commit(summary)? else {
            return Ok(FlushOutcome::Clean);
        };
        if !self.has_remote()? {
            debug!("no remote configured, keeping commit local");
            return Ok(FlushOutcome::Committed { comment });
        }
        let merge = self.sync_with_remote()?;
        self.push()?;
        Ok(FlushOutcome::Pushed { comment, merge })
    }

    /// Merge the remote without committing local changes first or pushing.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn pull_only(&self) -> Result<MergeOutcome, SyncError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = self
            .recover_interrupted_merge()
            .and_then(|()| self.has_remote())
            .and_then(|has| {
                if has {
                    self.sync_with_remote()
                } else {
                    debug!("no remote configured, nothing to pull");
                    Ok(MergeOutcome::NoRemote)
                }
            });
        self.report(Stage::PullOnly, result)
    }

    fn report<T>(&self, stage: Stage, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(e) = &result {
            self.observer.failure(stage, e);
        }
        result
    }
}
