use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::errors::{SearchError, SearchResult};

/// Window size for chunked scanning, in bytes. Buffers larger than this are
/// searched in windows so cancellation is observed at block boundaries.
pub const SEARCH_BLOCK: usize = 1 << 26; // 64 MiB

/// Lines at or above this many code units are reported without their text.
pub const LONG_LINE_LIMIT: usize = 4096;

/// Flat null-byte budget used by the binary classifier when no per-MiB
/// budget is configured on the request.
pub const NULL_BYTE_LIMIT: u32 = 2;

/// Size predicate applied to candidate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeFilter {
    All,
    LessThan(u64),
    Equal(u64),
    GreaterThan(u64),
}

/// Modification-date predicate applied to candidate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFilter {
    All,
    NewerThan(SystemTime),
    OlderThan(SystemTime),
    Between(SystemTime, SystemTime),
}

/// File-name selection: a wildcard list or a single regex.
///
/// Glob items starting with `-` are exclusions; matching is case-insensitive
/// over the basename. The regex form is tried against the basename first and
/// retried against the full path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameFilter {
    Globs(Vec<String>),
    Regex(String),
}

impl Default for NameFilter {
    fn default() -> Self {
        NameFilter::Globs(Vec::new())
    }
}

/// The immutable request record a host hands to the engine.
///
/// Hosts build one of these, start a run, and consume the event stream; the
/// engine never reads configuration from anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Filesystem roots; each may be a file or a directory.
    pub roots: Vec<PathBuf>,

    /// Search expression. Empty means inventory mode: files and folders that
    /// pass the filters are reported without being opened.
    pub pattern: String,

    /// When present the engine is in replace mode (unless `capture_search`).
    pub replacement: Option<String>,

    /// Interpret `pattern` as a regular expression instead of literal text.
    pub use_regex: bool,

    pub case_sensitive: bool,
    pub dot_matches_newline: bool,

    /// Literal mode only: wrap the pattern in word boundaries.
    pub whole_words: bool,

    pub include_hidden: bool,
    pub include_system: bool,
    pub include_subfolders: bool,
    pub include_symlinks: bool,
    pub include_binary: bool,

    /// Skip detection and scan every file as raw bytes.
    pub force_binary: bool,

    /// Skip the UTF-8/ANSI heuristic and decode as UTF-8.
    pub force_utf8: bool,

    pub create_backup: bool,
    pub backup_in_subfolder: bool,
    pub keep_file_date: bool,

    /// Report files that do *not* match.
    pub not_search: bool,

    /// Record the rendered replacement per hit without touching the file.
    pub capture_search: bool,

    pub size: SizeFilter,
    pub date: DateFilter,
    pub names: NameFilter,

    /// Regex matched against a directory's basename, full path and
    /// root-relative path; a match prunes the subtree. Empty disables it.
    pub exclude_dirs: String,

    /// Per-MiB null-byte budget for the binary classifier; the effective
    /// threshold is `budget * (size_mib + 1)`. `None` uses the flat
    /// [`NULL_BYTE_LIMIT`].
    pub null_bytes_per_mib: Option<u32>,

    /// Worker thread count; defaults to `max(1, cores - 2)`.
    pub thread_count: Option<NonZeroUsize>,
}

impl SearchRequest {
    pub fn new(roots: Vec<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            roots,
            pattern: pattern.into(),
            replacement: None,
            use_regex: false,
            case_sensitive: false,
            dot_matches_newline: false,
            whole_words: false,
            include_hidden: false,
            include_system: false,
            include_subfolders: true,
            include_symlinks: false,
            include_binary: false,
            force_binary: false,
            force_utf8: false,
            create_backup: false,
            backup_in_subfolder: false,
            keep_file_date: false,
            not_search: false,
            capture_search: false,
            size: SizeFilter::All,
            date: DateFilter::All,
            names: NameFilter::default(),
            exclude_dirs: String::new(),
            null_bytes_per_mib: None,
            thread_count: None,
        }
    }

    /// Inventory mode: an empty pattern reports filtered entries unopened.
    pub fn counting_only(&self) -> bool {
        self.pattern.is_empty()
    }

    /// True when a run will rewrite files.
    pub fn replacing(&self) -> bool {
        self.replacement.is_some() && !self.capture_search && !self.counting_only()
    }

    /// Number of worker threads for this request.
    pub fn effective_threads(&self) -> usize {
        match self.thread_count {
            Some(n) => n.get(),
            None => num_cpus::get().saturating_sub(2).max(1),
        }
    }

    /// Class-1 validation: fails the run before any traversal starts.
    pub fn validate(&self) -> SearchResult<()> {
        if self.roots.is_empty() {
            return Err(SearchError::config("no search paths given"));
        }
        for root in &self.roots {
            if root.is_relative() {
                return Err(SearchError::config(format!(
                    "search path '{}' is not absolute",
                    root.display()
                )));
            }
            if !root.exists() {
                return Err(SearchError::config(format!(
                    "search path '{}' does not exist",
                    root.display()
                )));
            }
        }
        if self.capture_search && self.replacement.is_none() {
            return Err(SearchError::config(
                "capture search requires a replacement expression",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_relative_root() {
        let request = SearchRequest::new(vec![PathBuf::from("src")], "x");
        assert!(matches!(
            request.validate(),
            Err(SearchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_missing_root() {
        let request = SearchRequest::new(
            vec![PathBuf::from("/nonexistent/greplace/test/root")],
            "x",
        );
        assert!(request.validate().is_err());
    }

    #[test]
    fn counting_only_tracks_empty_pattern() {
        let mut request = SearchRequest::new(vec![], "");
        assert!(request.counting_only());
        request.pattern = "x".into();
        assert!(!request.counting_only());
    }

    #[test]
    fn capture_search_never_replaces() {
        let mut request = SearchRequest::new(vec![], "x");
        request.replacement = Some("y".into());
        assert!(request.replacing());
        request.capture_search = true;
        assert!(!request.replacing());
    }
}
