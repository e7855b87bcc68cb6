//! Integration tests for the required-files check.

use data_extractor::{has_required_files, missing_required_files, REQUIRED_FILES};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_all_missing_in_empty_dir() {
    let temp_dir = TempDir::new().unwrap();

    let missing = missing_required_files(temp_dir.path(), REQUIRED_FILES);

    assert_eq!(missing, vec!["book.bin", "fv.bin", "hash.bin"]);
    assert!(!has_required_files(temp_dir.path(), REQUIRED_FILES));
}

#[test]
fn test_partial_set_reports_only_missing() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("book.bin"), b"book").unwrap();
    fs::write(temp_dir.path().join("hash.bin"), b"hash").unwrap();

    let missing = missing_required_files(temp_dir.path(), REQUIRED_FILES);

    assert_eq!(missing, vec!["fv.bin"]);
}

#[test]
fn test_complete_set() {
    let temp_dir = TempDir::new().unwrap();
    for name in REQUIRED_FILES {
        fs::write(temp_dir.path().join(name), b"data").unwrap();
    }

    assert!(has_required_files(temp_dir.path(), REQUIRED_FILES));
}

#[test]
fn test_custom_list() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("weights.bin"), b"w").unwrap();

    assert!(has_required_files(temp_dir.path(), &["weights.bin"]));
    assert!(has_required_files(temp_dir.path(), &[]));
    assert_eq!(
        missing_required_files(temp_dir.path(), &["weights.bin", "extra.bin"]),
        vec!["extra.bin"]
    );
}

#[test]
fn test_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("not-created");

    assert_eq!(missing_required_files(&dir, REQUIRED_FILES).len(), 3);
}
