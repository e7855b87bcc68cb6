//! # Data Extractor
//!
//! Cancellable, progress-reporting extraction of a bundled ZIP archive of
//! data files into a local directory.
//!
//! An [`ExtractionTask`] reads the archive as a stream, clears stale files
//! from the target directory, then writes the entries one after the other on
//! tokio's blocking pool. Progress lines and the single terminal
//! [`ExtractionOutcome`] are handed to an [`ExtractionListener`] on the
//! caller's runtime.
//!
//! ## Example
//!
//! ```rust,no_run
//! use data_extractor::{ExtractionListener, ExtractionOutcome, ExtractionTask};
//! use std::fs::File;
//!
//! struct Printer;
//!
//! impl ExtractionListener for Printer {
//!     fn on_progress(&mut self, status: &str) {
//!         println!("{}", status);
//!     }
//!
//!     fn on_finish(&mut self, outcome: ExtractionOutcome) {
//!         println!("Done: {:?}", outcome);
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let task = ExtractionTask::new("data", Printer);
//! let completion = task.start(File::open("data.zip")?)?;
//!
//! // task.cancel() may be called at any time from here on
//! completion.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod copy;
pub mod error;
pub mod extract;
pub mod required;
pub mod stream;
pub mod task;
pub mod types;

// Re-export main types
pub use copy::StreamCopier;
pub use error::ExtractError;
pub use required::{has_required_files, missing_required_files};
pub use stream::{ZipStreamEntry, ZipStreamReader};
pub use task::{Completion, ExtractionListener, ExtractionTask};
pub use types::{
    ExtractConfig, ExtractStats, ExtractionOutcome, TaskState, CHUNK_SIZE, REPORT_THRESHOLD,
    REQUIRED_FILES,
};
