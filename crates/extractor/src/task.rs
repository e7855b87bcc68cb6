//! Background extraction task with listener callbacks and cancellation.
//!
//! The archive walk runs on tokio's blocking pool. Notifications travel over
//! an unbounded channel to a dispatcher task spawned on the caller's runtime,
//! which owns the listener and invokes it one event at a time.

use crate::error::ExtractError;
use crate::extract::extract_stream;
use crate::types::{ExtractConfig, ExtractionOutcome, TaskState};
use parking_lot::Mutex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Receives the notifications of one extraction run.
///
/// Calls arrive on the runtime that called [`ExtractionTask::start`], never
/// concurrently: zero or more `on_progress`, then exactly one `on_finish`.
pub trait ExtractionListener: Send + 'static {
    fn on_progress(&mut self, status: &str);

    fn on_finish(&mut self, outcome: ExtractionOutcome);
}

/// Message sent from the worker to the dispatcher.
#[derive(Debug)]
enum TaskEvent {
    Progress(String),
    Finished(ExtractionOutcome),
}

/// A single-use extraction of a ZIP stream into a directory.
pub struct ExtractionTask {
    output_dir: PathBuf,
    config: ExtractConfig,
    cancel_flag: Arc<AtomicBool>,
    state: Arc<Mutex<TaskState>>,
    listener: Mutex<Option<Box<dyn ExtractionListener>>>,
}

impl ExtractionTask {
    pub fn new(output_dir: impl Into<PathBuf>, listener: impl ExtractionListener) -> Self {
        Self::with_config(output_dir, ExtractConfig::default(), listener)
    }

    pub fn with_config(
        output_dir: impl Into<PathBuf>,
        config: ExtractConfig,
        listener: impl ExtractionListener,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            config,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(TaskState::Idle)),
            listener: Mutex::new(Some(Box::new(listener))),
        }
    }

    /// Start extracting `input` in the background.
    ///
    /// Must be called from within a tokio runtime; listener callbacks are
    /// dispatched on that runtime. The task is `Running` when this returns.
    /// The outcome is only ever reported through the listener; the returned
    /// [`Completion`] resolves once `on_finish` has been delivered.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::AlreadyStarted`] if the task left `Idle` before
    /// - [`ExtractError::NoRuntime`] outside of a tokio runtime
    pub fn start<R>(&self, input: R) -> Result<Completion, ExtractError>
    where
        R: Read + Send + 'static,
    {
        let runtime = Handle::try_current()?;

        let listener = {
            let mut state = self.state.lock();
            if *state != TaskState::Idle {
                return Err(ExtractError::AlreadyStarted);
            }
            let listener = self
                .listener
                .lock()
                .take()
                .ok_or(ExtractError::AlreadyStarted)?;
            *state = TaskState::Running;
            listener
        };

        info!("Starting extraction into {}", self.output_dir.display());

        let (tx, rx) = mpsc::unbounded_channel();

        let output_dir = self.output_dir.clone();
        let config = self.config;
        let cancel_flag = self.cancel_flag.clone();
        runtime.spawn_blocking(move || run_worker(input, output_dir, config, cancel_flag, tx));

        let dispatcher = runtime.spawn(dispatch(rx, listener, self.state.clone()));

        Ok(Completion { dispatcher })
    }

    /// Ask the running extraction to stop.
    ///
    /// Returns immediately; the run ends with [`ExtractionOutcome::Cancelled`]
    /// once the worker reaches its next check point. No-op after the task
    /// reached a terminal state.
    pub fn cancel(&self) {
        let state = self.state.lock();
        if state.is_terminal() {
            warn!("Cancel requested after extraction finished ({:?})", *state);
            return;
        }
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Whether `cancel` took effect before the task finished.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Directory the archive is extracted into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Resolves when the listener has received its terminal notification.
#[derive(Debug)]
pub struct Completion {
    dispatcher: JoinHandle<()>,
}

impl Completion {
    /// Wait for `on_finish` to return.
    ///
    /// Fails only if the dispatcher itself panicked (i.e. inside the listener).
    pub async fn wait(self) -> Result<(), tokio::task::JoinError> {
        self.dispatcher.await
    }
}

fn run_worker<R: Read>(
    input: R,
    output_dir: PathBuf,
    config: ExtractConfig,
    cancel_flag: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<TaskEvent>,
) {
    // Send errors mean the dispatcher is gone; the run continues to its end.
    let mut progress = |status: String| {
        let _ = tx.send(TaskEvent::Progress(status));
    };

    let result = extract_stream(input, &output_dir, &config, &mut progress, &cancel_flag);

    let outcome = match result {
        Ok(stats) => {
            info!(
                "Extracted {} files ({} bytes) in {:?}",
                stats.files_extracted, stats.bytes_written, stats.duration
            );
            ExtractionOutcome::Success { stats }
        }
        Err(ExtractError::Cancelled) => {
            info!("Extraction cancelled");
            ExtractionOutcome::Cancelled
        }
        Err(e) => {
            error!("Extraction failed: {}", e);
            ExtractionOutcome::Failure {
                message: format!("Failed to extract file: {}", e),
            }
        }
    };

    let _ = tx.send(TaskEvent::Finished(outcome));
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<TaskEvent>,
    mut listener: Box<dyn ExtractionListener>,
    state: Arc<Mutex<TaskState>>,
) {
    let outcome = loop {
        match rx.recv().await {
            Some(TaskEvent::Progress(status)) => listener.on_progress(&status),
            Some(TaskEvent::Finished(outcome)) => break outcome,
            None => {
                // Worker dropped its sender without a result: it panicked.
                warn!("Extraction worker terminated without reporting an outcome");
                break ExtractionOutcome::Failure {
                    message: "Failed to extract file: extraction worker terminated unexpectedly"
                        .to_string(),
                };
            }
        }
    };

    *state.lock() = TaskState::from(&outcome);
    listener.on_finish(outcome);
}
