//! Type definitions for data extraction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of the buffer used to copy entry content (256 KiB).
pub const CHUNK_SIZE: usize = 256 << 10;

/// Minimum number of bytes between two progress reports for one entry.
pub const REPORT_THRESHOLD: u64 = 256 * 1000;

/// Files the downstream consumer needs in the data directory.
pub const REQUIRED_FILES: &[&str] = &["book.bin", "fv.bin", "hash.bin"];

/// Tuning knobs for an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractConfig {
    /// Bytes read from an entry per copy step
    pub chunk_size: usize,

    /// Bytes that must be copied since the last report before reporting again
    pub report_threshold: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            report_threshold: REPORT_THRESHOLD,
        }
    }
}

/// Statistics about a completed extraction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Number of files written
    pub files_extracted: u64,

    /// Total bytes written to disk
    pub bytes_written: u64,

    /// Duration of the run (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl Default for ExtractStats {
    fn default() -> Self {
        Self {
            files_extracted: 0,
            bytes_written: 0,
            duration: Duration::from_secs(0),
        }
    }
}

/// Terminal result of one extraction run. Exactly one is delivered per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExtractionOutcome {
    /// Every entry was written.
    Success { stats: ExtractStats },

    /// The run stopped on an error; `message` is suitable for display.
    Failure { message: String },

    /// The run was stopped by a cancellation request.
    Cancelled,
}

impl ExtractionOutcome {
    /// Error text for listeners that only care about "did it fail".
    ///
    /// `None` for success and cancellation.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExtractionOutcome::Failure { message } => Some(message),
            _ => None,
        }
    }

    /// Whether the run completed and every entry was written.
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success { .. })
    }
}

/// Lifecycle of an [`ExtractionTask`](crate::ExtractionTask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Whether the task has finished and will not change state again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl From<&ExtractionOutcome> for TaskState {
    fn from(outcome: &ExtractionOutcome) -> Self {
        match outcome {
            ExtractionOutcome::Success { .. } => TaskState::Succeeded,
            ExtractionOutcome::Failure { .. } => TaskState::Failed,
            ExtractionOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_json_shape() {
        let failed = ExtractionOutcome::Failure {
            message: "disk full".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["message"], "disk full");

        let cancelled = serde_json::to_value(ExtractionOutcome::Cancelled).unwrap();
        assert_eq!(cancelled["status"], "cancelled");
    }

    #[test]
    fn test_error_message_only_for_failure() {
        let ok = ExtractionOutcome::Success {
            stats: ExtractStats::default(),
        };
        assert_eq!(ok.error_message(), None);
        assert_eq!(ExtractionOutcome::Cancelled.error_message(), None);

        let failed = ExtractionOutcome::Failure {
            message: String::new(),
        };
        assert_eq!(failed.error_message(), Some(""));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Idle.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }
}
