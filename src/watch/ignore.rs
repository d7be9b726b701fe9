//! Ignore globs for version-control metadata and editor/OS temporary files.
//!
//! Patterns are matched against the path relative to the synchronized root,
//! anchored at `/`, with `*` allowed to cross directory separators, so `*.git*`
//! also hides everything below `.git/`. Directories above the root never match.

use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use super::WatchError;

/// Default ignore globs. Also appended to the repository's local exclude list.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "*.git*",
    "*.autosave",
    // gedit and emacs
    "*~",
    // LibreOffice
    ".~lock.*",
    // Firefox and Chromium partial downloads
    "*.part",
    "*.crdownload",
    // vi(m)
    ".*.sw[a-z]",
    "*.un~",
    "*.swp",
    "*.swo",
    // KDE
    ".directory",
    // Kate
    "*.kate-swp",
    // macOS
    ".DS_Store",
    "Icon\r",
    "._*",
    ".Spotlight-V100",
    ".Trashes",
    // OmniGraffle
    "*(Autosaved).graffle",
    // Windows
    "Thumbs.db",
    "Desktop.ini",
    // MS Office
    "~*.tmp",
    "~*.TMP",
    "*~*.tmp",
    "*~*.TMP",
    "~*.ppt",
    "~*.PPT",
    "~*.pptx",
    "~*.PPTX",
    "~*.xls",
    "~*.XLS",
    "~*.xlsx",
    "~*.XLSX",
    "~*.doc",
    "~*.DOC",
    "~*.docx",
    "~*.DOCX",
    "~$*",
    // QuarkXPress
    "*.a$v",
    // CVS
    "*/CVS/*",
    ".cvsignore",
    "*/.cvsignore",
    // Subversion
    "/.svn/*",
    "*/.svn/*",
    // Mercurial
    "/.hg/*",
    "*/.hg/*",
    "*/.hgignore",
    // Bazaar
    "/.bzr/*",
    "*/.bzr/*",
    "*/.bzrignore",
];

/// Compiled set of ignore globs.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    set: GlobSet,
}

impl IgnoreSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, WatchError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .backslash_escape(false)
                .build()
                .map_err(|e| WatchError::InvalidPattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| WatchError::InvalidPattern {
            pattern: "<set>".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { set })
    }

    /// Check a root-relative path against the set, both as a whole and by
    /// file name.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        if self.set.is_match(Path::new("/").join(relative)) {
            return true;
        }
        self.name_is_ignored(relative)
    }

    /// Check an event path below `root`.
    pub fn is_ignored_in(&self, root: &Path, path: &Path) -> bool {
        match path.strip_prefix(root) {
            Ok(relative) => self.is_ignored(relative),
            Err(_) => self.name_is_ignored(path),
        }
    }

    fn name_is_ignored(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.set.is_match(Path::new(name)))
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        // The stock list is static and known to compile.
        Self::new(DEFAULT_IGNORE_PATTERNS).unwrap_or_else(|_| Self {
            set: GlobSet::empty(),
        })
    }
}
