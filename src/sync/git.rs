//! Git operations for sync functionality.
//!
//! This module provides a trait-based abstraction over the git commands the
//! sync engine needs, so the engine can be driven by mocks in tests.

use miette::Diagnostic;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tokio::task;
use tokio::time::timeout;

use crate::config::Identity;

#[cfg(test)]
use mockall::automock;

/// Errors that can occur during git operations.
#[derive(Error, Diagnostic, Debug)]
pub enum GitError {
    #[error("Git command failed: {0}")]
    #[diagnostic(code(gitsync::sync::git::command_failed))]
    CommandFailed(String),

    #[error("`git {command}` returned non-zero exit code {code}: {output}")]
    #[diagnostic(code(gitsync::sync::git::non_zero_exit))]
    NonZeroExit {
        command: String,
        code: i32,
        output: String,
    },

    #[error("`git {command}` did not finish within {after:?}")]
    #[diagnostic(
        code(gitsync::sync::git::timeout),
        help("The remote may be unreachable. The next flush will retry.")
    )]
    Timeout { command: String, after: Duration },

    #[error("Git not installed or not in PATH")]
    #[diagnostic(code(gitsync::sync::git::not_found))]
    GitNotFound,
}

/// Side of an unresolved merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local branch (`--ours`).
    Ours,
    /// The merged-in remote commit (`--theirs`).
    Theirs,
}

impl Side {
    fn flag(self) -> &'static str {
        match self {
            Side::Ours => "--ours",
            Side::Theirs => "--theirs",
        }
    }
}

/// Trait for git operations. Can be mocked in tests.
#[cfg_attr(test, automock)]
pub trait GitOps {
    /// Initialize a git repository at the given path.
    fn init(&self, path: &Path) -> Result<Output, GitError>;

    /// Repository status in NUL-delimited porcelain format.
    fn status_porcelain(&self, path: &Path) -> Result<Output, GitError>;

    /// Stage every change, including deletions and untracked files.
    fn add_all(&self, path: &Path) -> Result<Output, GitError>;

    /// Commit the index with `identity` as both author and committer.
    fn commit(&self, path: &Path, message: &str, identity: &Identity) -> Result<Output, GitError>;

    /// List configured remote names, one per line.
    fn remotes(&self, path: &Path) -> Result<Output, GitError>;

    /// Look up a branch head on a remote. Empty stdout means it does not exist.
    fn ls_remote_branch(&self, path: &Path, remote: &str, branch: &str)
    -> Result<Output, GitError>;

    /// Fetch a single branch from a remote into `FETCH_HEAD`.
    fn fetch(&self, path: &Path, remote: &str, branch: &str) -> Result<Output, GitError>;

    /// Merge `reference` into the current branch without opening an editor.
    fn merge(&self, path: &Path, reference: &str, identity: &Identity)
    -> Result<Output, GitError>;

    /// Abandon an in-progress merge and restore the pre-merge state.
    fn merge_abort(&self, path: &Path) -> Result<Output, GitError>;

    /// Check out one side of an unresolved merge for a path.
    fn checkout_side(&self, path: &Path, side: Side, file: &str) -> Result<Output, GitError>;

    /// Check out a path as it was at `reference`.
    fn checkout_ref(&self, path: &Path, reference: &str, file: &str)
    -> Result<Output, GitError>;

    /// Index stages present for an unmerged path (`ls-files -u -z`).
    fn unmerged_stages(&self, path: &Path, file: &str) -> Result<Output, GitError>;

    /// Author name and commit time of `reference`, NUL-separated.
    fn commit_signature(&self, path: &Path, reference: &str) -> Result<Output, GitError>;

    /// Push the current HEAD to a remote branch.
    fn push(&self, path: &Path, remote: &str, branch: &str) -> Result<Output, GitError>;
}

/// Real implementation of GitOps running the git binary through tokio.
#[derive(Clone, Copy, Default)]
pub struct RealGit {
    timeout: Option<Duration>,
}

impl RealGit {
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Kill any git command that runs longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Helper to run a git command and return the output.
    fn run_git(&self, path: &Path, args: &[&str]) -> Result<Output, GitError> {
        self.run_git_as(path, args, None)
    }

    /// Run a git command, optionally pinning author and committer.
    fn run_git_as(
        &self,
        path: &Path,
        args: &[&str],
        identity: Option<&Identity>,
    ) -> Result<Output, GitError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(identity) = identity {
            command
                .env("GIT_AUTHOR_NAME", &identity.name)
                .env("GIT_AUTHOR_EMAIL", &identity.email)
                .env("GIT_COMMITTER_NAME", &identity.name)
                .env("GIT_COMMITTER_EMAIL", &identity.email);
        }

        let output = block_on(output_within(command, self.timeout, args))??;
        self.check_output(args, output)
    }

    /// Check if the output indicates success, otherwise return an error.
    fn check_output(&self, args: &[&str], output: Output) -> Result<Output, GitError> {
        if output.status.success() {
            Ok(output)
        } else {
            let code = output.status.code().unwrap_or(-1);
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            // Combine stdout and stderr for error message
            let combined = if !stdout.is_empty() && !stderr.is_empty() {
                format!("{}\n{}", stdout, stderr)
            } else if !stdout.is_empty() {
                stdout
            } else {
                stderr
            };
            Err(GitError::NonZeroExit {
                command: args.join(" "),
                code,
                output: combined,
            })
        }
    }
}

/// Collect the output of `command`, giving up after `limit`.
///
/// The child is killed when the output future is dropped on expiry.
async fn output_within(
    mut command: Command,
    limit: Option<Duration>,
    args: &[&str],
) -> Result<Output, GitError> {
    let output = command.output();
    let result = match limit {
        Some(limit) => timeout(limit, output)
            .await
            .map_err(|_| GitError::Timeout {
                command: args.join(" "),
                after: limit,
            })?,
        None => output.await,
    };
    result.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            GitError::GitNotFound
        } else {
            GitError::CommandFailed(e.to_string())
        }
    })
}

/// Drive `future` to completion from synchronous code.
///
/// Inside a runtime (typically a `spawn_blocking` thread) the runtime's own
/// process and timer drivers are used; outside one a throwaway current-thread
/// runtime is built.
fn block_on<F: Future>(future: F) -> Result<F::Output, GitError> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(task::block_in_place(|| handle.block_on(future)))
        }
        Ok(handle) => Ok(handle.block_on(future)),
        Err(_) => {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| GitError::CommandFailed(e.to_string()))?;
            Ok(runtime.block_on(future))
        }
    }
}

impl GitOps for RealGit {
    fn init(&self, path: &Path) -> Result<Output, GitError> {
        self.run_git(path, &["init"])
    }

    fn status_porcelain(&self, path: &Path) -> Result<Output, GitError> {
        self.run_git(path, &["status", "--porcelain", "-z"])
    }

    fn add_all(&self, path: &Path) -> Result<Output, GitError> {
        self.run_git(path, &["add", "-A"])
    }

    fn commit(&self, path: &Path, message: &str, identity: &Identity) -> Result<Output, GitError> {
        self.run_git_as(path, &["commit", "-m", message], Some(identity))
    }

    fn remotes(&self, path: &Path) -> Result<Output, GitError> {
        self.run_git(path, &["remote"])
    }

    fn ls_remote_branch(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<Output, GitError> {
        self.run_git(path, &["ls-remote", "--heads", remote, branch])
    }

    fn fetch(&self, path: &Path, remote: &str, branch: &str) -> Result<Output, GitError> {
        self.run_git(path, &["fetch", remote, branch])
    }

    fn merge(
        &self,
        path: &Path,
        reference: &str,
        identity: &Identity,
    ) -> Result<Output, GitError> {
        self.run_git_as(path, &["merge", "--no-edit", reference], Some(identity))
    }

    fn merge_abort(&self, path: &Path) -> Result<Output, GitError> {
        self.run_git(path, &["merge", "--abort"])
    }

    fn checkout_side(&self, path: &Path, side: Side, file: &str) -> Result<Output, GitError> {
        self.run_git(path, &["checkout", side.flag(), "--", file])
    }

    fn checkout_ref(
        &self,
        path: &Path,
        reference: &str,
        file: &str,
    ) -> Result<Output, GitError> {
        self.run_git(path, &["checkout", reference, "--", file])
    }

    fn unmerged_stages(&self, path: &Path, file: &str) -> Result<Output, GitError> {
        self.run_git(path, &["ls-files", "-u", "-z", "--", file])
    }

    fn commit_signature(&self, path: &Path, reference: &str) -> Result<Output, GitError> {
        self.run_git(path, &["log", "-1", "--format=%an%x00%ct", reference])
    }

    fn push(&self, path: &Path, remote: &str, branch: &str) -> Result<Output, GitError> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.run_git(path, &["push", remote, &refspec])
    }
}
