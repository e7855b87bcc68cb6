//! Presence check for the data files the consumer application needs.

use std::path::Path;
use tracing::debug;

/// Names from `required` that do not exist in `dir`, in the given order.
pub fn missing_required_files(dir: &Path, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| {
            let path = dir.join(name);
            let present = path.exists();
            if !present {
                debug!("{} not found", path.display());
            }
            !present
        })
        .map(|name| name.to_string())
        .collect()
}

/// Whether every file in `required` exists in `dir`.
pub fn has_required_files(dir: &Path, required: &[&str]) -> bool {
    missing_required_files(dir, required).is_empty()
}
