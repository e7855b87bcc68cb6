//! Error types for data extraction.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for extraction operations.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// An I/O error occurred while copying entry content.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The container structure is invalid (bad signature, truncated header).
    #[error("Corrupted archive: {0}")]
    Corrupted(String),

    /// The entry uses a feature this reader does not handle.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The destination file for an entry could not be created.
    #[error("Cannot create {}: {source}", path.display())]
    CreateFile {
        /// Destination path
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred while extracting a specific entry.
    #[error("{entry}: {source}")]
    Entry {
        /// Name of the entry being extracted
        entry: String,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// The extraction was cancelled by the user.
    #[error("Extraction cancelled by user")]
    Cancelled,

    /// The task has already been started once.
    #[error("Extraction task already started")]
    AlreadyStarted,

    /// `start` was called outside of a tokio runtime.
    #[error("No async runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl ExtractError {
    /// Attach the entry name to a bare I/O error; other variants pass through.
    pub(crate) fn for_entry(self, entry: &str) -> Self {
        match self {
            ExtractError::Io(source) => ExtractError::Entry {
                entry: entry.to_string(),
                source,
            },
            other => other,
        }
    }
}
