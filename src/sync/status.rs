//! Parsers for the machine-readable output of the git commands the engine runs.

use chrono::{DateTime, Local};
use std::fmt;

/// Format used for commit dates embedded in conflict copy names.
pub const STAMP_FORMAT: &str = "%d-%m-%Y %H-%M-%S";

/// Two-letter porcelain status code (`XY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode {
    pub index: char,
    pub worktree: char,
}

/// Kind of unmerged path left behind by a failed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmerged {
    /// `UU`, `AA`, `AU`, `UA`: both sides touched the content.
    BothSides,
    /// `DU`: deleted locally, modified remotely.
    DeletedByUs,
    /// `UD`: deleted remotely, modified locally.
    DeletedByThem,
    /// `DD`: deleted on both sides.
    BothDeleted,
}

impl StatusCode {
    pub fn new(index: char, worktree: char) -> Self {
        Self { index, worktree }
    }

    pub fn unmerged(&self) -> Option<Unmerged> {
        match (self.index, self.worktree) {
            ('U', 'U') | ('A', 'A') | ('A', 'U') | ('U', 'A') => Some(Unmerged::BothSides),
            ('D', 'U') => Some(Unmerged::DeletedByUs),
            ('U', 'D') => Some(Unmerged::DeletedByThem),
            ('D', 'D') => Some(Unmerged::BothDeleted),
            _ => None,
        }
    }

    fn is_rename_or_copy(&self) -> bool {
        matches!(self.index, 'R' | 'C')
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.index, self.worktree)
    }
}

/// One entry of `git status --porcelain -z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub code: StatusCode,
    pub path: String,
    /// Source path of a rename or copy.
    pub orig_path: Option<String>,
}

impl StatusEntry {
    /// Commit comment token, e.g. `[ M  notes.txt ]`.
    pub fn token(&self) -> String {
        match &self.orig_path {
            Some(orig) => format!("[ {} {} -> {} ]", self.code, orig, self.path),
            None => format!("[ {} {} ]", self.code, self.path),
        }
    }
}

/// Parse NUL-delimited porcelain v1 output.
///
/// Renames and copies carry their source path in the following field.
pub fn parse_porcelain(raw: &[u8]) -> Vec<StatusEntry> {
    let text = String::from_utf8_lossy(raw);
    let mut fields = text.split('\0').filter(|f| !f.is_empty());
    let mut entries = Vec::new();

    while let Some(field) = fields.next() {
        let mut chars = field.chars();
        let (Some(index), Some(worktree), Some(' ')) = (chars.next(), chars.next(), chars.next())
        else {
            continue;
        };
        let code = StatusCode::new(index, worktree);
        let path = chars.as_str().to_string();
        let orig_path = if code.is_rename_or_copy() {
            fields.next().map(str::to_string)
        } else {
            None
        };
        entries.push(StatusEntry {
            code,
            path,
            orig_path,
        });
    }
    entries
}

/// Commit comment built from status entries.
pub fn status_comment(entries: &[StatusEntry]) -> String {
    entries
        .iter()
        .map(StatusEntry::token)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index stages present in `git ls-files -u -z` output.
///
/// Stage 1 is the common ancestor, 2 is ours and 3 is theirs.
pub fn parse_stages(raw: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw);
    let mut stages: Vec<u8> = text
        .split('\0')
        .filter_map(|record| {
            let (meta, _path) = record.split_once('\t')?;
            meta.split_whitespace().nth(2)?.parse().ok()
        })
        .collect();
    stages.sort_unstable();
    stages.dedup();
    stages
}

/// Author and date of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSignature {
    pub author: String,
    pub date: DateTime<Local>,
}

impl CommitSignature {
    /// Date rendered for use in a file name.
    pub fn stamp(&self) -> String {
        self.date.format(STAMP_FORMAT).to_string()
    }
}

/// Parse `git log -1 --format=%an%x00%ct` output.
pub fn parse_signature(raw: &[u8]) -> Option<CommitSignature> {
    let text = String::from_utf8_lossy(raw);
    let (author, seconds) = text.trim_end().split_once('\0')?;
    let seconds: i64 = seconds.trim().parse().ok()?;
    let date = DateTime::from_timestamp(seconds, 0)?.with_timezone(&Local);
    Some(CommitSignature {
        author: author.to_string(),
        date,
    })
}
