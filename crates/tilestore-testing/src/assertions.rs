//! Common assertions for tilestore testing

use anyhow::Result;
use std::fmt::Debug;
use std::path::Path;
use tilestore_core::{Error, Storage};
use walkdir::WalkDir;

/// Asserts that `result` failed because the target does not exist
pub fn assert_not_found<T: Debug>(result: tilestore_core::Result<T>) {
    match result {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other),
    }
}

/// Asserts that `result` failed as an unsupported operation
pub fn assert_unsupported<T: Debug>(result: tilestore_core::Result<T>) {
    match result {
        Err(Error::UnsupportedOperation(_)) => {}
        other => panic!("expected UnsupportedOperation, got {:?}", other),
    }
}

/// Asserts that two addresses hold the same bytes
pub fn assert_same_content(storage: &Storage, left: &str, right: &str) -> Result<()> {
    let left_data = storage.get_binary(left, None)?;
    let right_data = storage.get_binary(right, None)?;
    assert_eq!(
        left_data.len(),
        right_data.len(),
        "Size mismatch between {} and {}",
        left,
        right
    );
    assert!(
        left_data == right_data,
        "Content mismatch between {} and {}",
        left,
        right
    );
    Ok(())
}

/// Asserts that a directory contains exactly the given relative file paths
pub fn assert_dir_files(dir: &Path, expected: &[&str]) -> Result<()> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(dir)?;
            found.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    found.sort();

    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(found, expected, "Unexpected files below {}", dir.display());
    Ok(())
}
