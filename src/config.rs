//! Runtime configuration for a synchronizer instance.

use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::watch::{DEFAULT_IGNORE_PATTERNS, PriorityTable};

#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    #[diagnostic(code(gitsync::config::zero_duration))]
    ZeroDuration { field: &'static str },

    #[error("quiet period ({quiet:?}) is shorter than the tick interval ({tick:?})")]
    #[diagnostic(
        code(gitsync::config::quiet_shorter_than_tick),
        help("Quiescence is only checked once per tick; use a quiet period of at least one tick.")
    )]
    QuietShorterThanTick { quiet: Duration, tick: Duration },

    #[error("{field} must not be empty")]
    #[diagnostic(code(gitsync::config::empty_field))]
    EmptyField { field: &'static str },

    #[error("invalid email address for {field}: {email}")]
    #[diagnostic(code(gitsync::config::invalid_email))]
    InvalidEmail { field: &'static str, email: String },
}

/// Name and email recorded as author and committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Identities used for regular commits and for conflict-fix commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identities {
    pub regular: Identity,
    pub conflict: Identity,
}

impl Default for Identities {
    fn default() -> Self {
        Self {
            regular: Identity::new("gitsync", "gitsync@localhost"),
            conflict: Identity::new("git-synchronizer", "synchronizer@test.com"),
        }
    }
}

/// Where the regular commit message comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CommentSource {
    /// `[ XY path ]` tokens from `git status`.
    #[default]
    Status,
    /// The coalesced event summary.
    Events,
}

/// Synchronizer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory to watch and synchronize
    pub root: PathBuf,
    /// Inactivity required before a flush
    pub quiet_period: Duration,
    /// Interval between quiescence checks
    pub tick: Duration,
    pub remote: String,
    pub branch: String,
    /// Upper bound on any single git command
    pub git_timeout: Duration,
    /// Pub/sub channel used for push notices
    pub channel: String,
    /// Redis connection URL; in-process bus when absent
    pub redis_url: Option<String>,
    pub identities: Identities,
    pub ignore_patterns: Vec<String>,
    pub priorities: PriorityTable,
    pub comment_source: CommentSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            quiet_period: Duration::from_secs(1),
            tick: Duration::from_millis(100),
            remote: "origin".to_string(),
            branch: "master".to_string(),
            git_timeout: Duration::from_secs(120),
            channel: "git_sync".to_string(),
            redis_url: None,
            identities: Identities::default(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            priorities: PriorityTable::default(),
            comment_source: CommentSource::default(),
        }
    }
}

impl Config {
    /// Default configuration for the given root.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "tick" });
        }
        if self.quiet_period.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "quiet period",
            });
        }
        if self.git_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "git timeout",
            });
        }
        if self.quiet_period < self.tick {
            return Err(ConfigError::QuietShorterThanTick {
                quiet: self.quiet_period,
                tick: self.tick,
            });
        }

        let required = [
            ("root", self.root.as_os_str().is_empty()),
            ("remote", self.remote.trim().is_empty()),
            ("branch", self.branch.trim().is_empty()),
            ("channel", self.channel.trim().is_empty()),
            ("regular identity name", self.identities.regular.name.trim().is_empty()),
            ("conflict identity name", self.identities.conflict.name.trim().is_empty()),
        ];
        if let Some((field, _)) = required.into_iter().find(|(_, empty)| *empty) {
            return Err(ConfigError::EmptyField { field });
        }

        for (field, identity) in [
            ("regular identity", &self.identities.regular),
            ("conflict identity", &self.identities.conflict),
        ] {
            if !identity.email.contains('@') {
                return Err(ConfigError::InvalidEmail {
                    field,
                    email: identity.email.clone(),
                });
            }
        }
        Ok(())
    }
}
