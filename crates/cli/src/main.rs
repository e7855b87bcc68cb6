//! Command-line front end for bundled data extraction.
//!
//! Unpacks the data archive into a directory, showing progress and mapping
//! Ctrl-C to cancellation, and checks whether the data files are in place.

use clap::{Parser, Subcommand};
use data_extractor::{
    missing_required_files, ExtractConfig, ExtractionListener, ExtractionOutcome, ExtractionTask,
    CHUNK_SIZE, REPORT_THRESHOLD, REQUIRED_FILES,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "extract-data")]
#[command(version, about = "Install bundled data files from an archive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the data archive into a directory
    Extract {
        /// Archive file to extract
        archive: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Extract even if the required files are already present
        #[arg(short, long)]
        force: bool,

        /// Copy buffer size in bytes
        #[arg(long, default_value_t = CHUNK_SIZE)]
        chunk_size: usize,

        /// Bytes between two progress updates of one file
        #[arg(long, default_value_t = REPORT_THRESHOLD)]
        report_threshold: u64,

        /// Required file name (repeatable, defaults to the bundled data set)
        #[arg(long = "require")]
        required: Vec<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report which required data files are missing
    Check {
        /// Data directory
        #[arg(short, long)]
        out: PathBuf,

        /// Required file name (repeatable, defaults to the bundled data set)
        #[arg(long = "require")]
        required: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct CheckReport<'a> {
    directory: &'a Path,
    complete: bool,
    missing: Vec<String>,
}

/// Shows progress on a spinner and hands the outcome back to `main`.
struct SpinnerListener {
    spinner: ProgressBar,
    done: Option<oneshot::Sender<ExtractionOutcome>>,
}

impl ExtractionListener for SpinnerListener {
    fn on_progress(&mut self, status: &str) {
        self.spinner.set_message(status.to_string());
    }

    fn on_finish(&mut self, outcome: ExtractionOutcome) {
        self.spinner.finish_and_clear();
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract {
            archive,
            out,
            force,
            chunk_size,
            report_threshold,
            required,
            json,
        } => {
            let config = ExtractConfig {
                chunk_size,
                report_threshold,
            };
            handle_extract(archive, out, force, config, required, json).await
        }
        Commands::Check { out, required, json } => handle_check(out, required, json),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_FAILURE);
        }
    }
}

fn required_names(required: &[String]) -> Vec<&str> {
    if required.is_empty() {
        REQUIRED_FILES.to_vec()
    } else {
        required.iter().map(String::as_str).collect()
    }
}

async fn handle_extract(
    archive: PathBuf,
    out: PathBuf,
    force: bool,
    config: ExtractConfig,
    required: Vec<String>,
    json: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let required = required_names(&required);

    fs::create_dir_all(&out)
        .map_err(|e| format!("Cannot create data directory {}: {}", out.display(), e))?;

    if !force && missing_required_files(&out, &required).is_empty() {
        println!(
            "Data files already present in {}; pass --force to overwrite them",
            out.display()
        );
        return Ok(0);
    }

    let input = File::open(&archive)
        .map_err(|e| format!("Failed to read {}: {}", archive.display(), e))?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Extracting {}", archive.display()));

    let (done_tx, done_rx) = oneshot::channel();
    let listener = SpinnerListener {
        spinner,
        done: Some(done_tx),
    };

    let task = Arc::new(ExtractionTask::with_config(&out, config, listener));

    let cancel_handle = task.clone();
    ctrlc::set_handler(move || cancel_handle.cancel())?;

    let completion = task.start(input)?;
    completion.wait().await?;
    let outcome = done_rx.await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match (&outcome, summary_line(&outcome, &out, json)) {
        (ExtractionOutcome::Failure { .. }, Some(line)) => eprintln!("{}", line),
        (_, Some(line)) => println!("{}", line),
        (_, None) => {}
    }

    if outcome.is_success() {
        let missing = missing_required_files(&out, &required);
        if !missing.is_empty() {
            tracing::warn!("Archive did not provide: {}", missing.join(", "));
        }
    }

    Ok(exit_code(&outcome))
}

/// Human-readable result line; `None` under `--json`, where the JSON document
/// is the only output.
fn summary_line(outcome: &ExtractionOutcome, out: &Path, json: bool) -> Option<String> {
    if json {
        return None;
    }

    Some(match outcome {
        ExtractionOutcome::Success { stats } => format!(
            "Extracted {} files ({} bytes) into {}",
            stats.files_extracted,
            stats.bytes_written,
            out.display()
        ),
        ExtractionOutcome::Failure { message } => format!("Error: {}", message),
        ExtractionOutcome::Cancelled => "Extraction cancelled".to_string(),
    })
}

fn exit_code(outcome: &ExtractionOutcome) -> i32 {
    match outcome {
        ExtractionOutcome::Success { .. } => 0,
        ExtractionOutcome::Failure { .. } => EXIT_FAILURE,
        ExtractionOutcome::Cancelled => EXIT_CANCELLED,
    }
}

fn handle_check(
    out: PathBuf,
    required: Vec<String>,
    json: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let missing = missing_required_files(&out, &required_names(&required));
    let report = CheckReport {
        directory: &out,
        complete: missing.is_empty(),
        missing,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.complete {
        println!("All data files present in {}", out.display());
    } else {
        println!("Missing in {}:", out.display());
        for name in &report.missing {
            println!("  {}", name);
        }
    }

    Ok(if report.complete { 0 } else { EXIT_FAILURE })
}
