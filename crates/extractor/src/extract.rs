//! Single-pass streaming extraction of a ZIP container.

use crate::copy::StreamCopier;
use crate::error::ExtractError;
use crate::stream::ZipStreamReader;
use crate::types::{ExtractConfig, ExtractStats};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Extract every entry of the ZIP stream `input` into `output_dir`.
///
/// The directory is cleared of regular files first. Entries are read in
/// storage order and each one is fully written before the next header is
/// read. `progress` receives human-readable status lines; `cancel_flag` is
/// checked before each entry and after each copied chunk.
///
/// The input stream and any open output file are dropped on every return
/// path. An entry abandoned on cancellation or error is not read any
/// further.
pub fn extract_stream<R: Read>(
    input: R,
    output_dir: &Path,
    config: &ExtractConfig,
    progress: &mut dyn FnMut(String),
    cancel_flag: &AtomicBool,
) -> Result<ExtractStats, ExtractError> {
    let start_time = Instant::now();
    let mut stats = ExtractStats::default();

    clear_output_dir(output_dir);

    let mut archive = ZipStreamReader::new(BufReader::new(input));
    let mut copier = StreamCopier::from_config(config);

    loop {
        if cancel_flag.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }

        let mut entry = match archive.next_entry()? {
            Some(entry) => entry,
            None => break,
        };

        let name = entry.name().to_string();
        match entry.size() {
            Some(size) => debug!("Found zip entry: {} ({} bytes)", name, size),
            None => debug!("Found zip entry: {} (size in data descriptor)", name),
        }
        progress(format!("Extracting {}", name));

        let output_path = output_dir.join(&name);

        if entry.is_dir() {
            fs::create_dir_all(&output_path).map_err(|source| ExtractError::CreateFile {
                path: output_path.clone(),
                source,
            })?;
            entry
                .skip()
                .map_err(|e| ExtractError::from(e).for_entry(&name))?;
            continue;
        }

        // Create parent directories
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|source| ExtractError::CreateFile {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut out = File::create(&output_path).map_err(|source| ExtractError::CreateFile {
            path: output_path.clone(),
            source,
        })?;

        let copied = copier
            .copy(
                &mut entry,
                &mut out,
                |n| progress(format!("{}: {} bytes extracted", name, n)),
                || cancel_flag.load(Ordering::Relaxed),
            )
            .map_err(|e| e.for_entry(&name))?;

        stats.files_extracted += 1;
        stats.bytes_written += copied;
    }

    stats.duration = start_time.elapsed();
    Ok(stats)
}

/// Delete every regular file directly inside `dir`.
///
/// Subdirectories are left alone. Failures are logged and skipped.
pub fn clear_output_dir(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }

        debug!("Deleting {}", path.display());
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to delete {}: {}", path.display(), e);
        }
    }
}
