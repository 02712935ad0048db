use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid search pattern: {0}")]
    InvalidPattern(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoding error in '{path}': {reason}")]
    Encoding { path: PathBuf, reason: String },

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("failed to rewrite '{path}': {reason}")]
    ReplaceFailed { path: PathBuf, reason: String },

    #[error("cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn config(msg: impl Into<String>) -> Self {
        SearchError::InvalidConfig(msg.into())
    }

    pub fn pattern(msg: impl Into<String>) -> Self {
        SearchError::InvalidPattern(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SearchError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn encoding(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SearchError::Encoding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn replace_failed(path: &Path, reason: impl Into<String>) -> Self {
        SearchError::ReplaceFailed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// True for the two error kinds that abort a run before it starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SearchError::InvalidConfig(_) | SearchError::InvalidPattern(_)
        )
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;
