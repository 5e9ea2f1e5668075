//! Test discovery: every `*.java` file directly inside the test directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// File names of the Java tests in `dir`, sorted.
pub fn discover_tests(dir: &Path) -> Result<Vec<String>> {
    let mut tests = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read test dir {}", dir.display()))? {
        let entry = entry.context("read test entry")?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("java") {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            tests.push(name.to_string());
        }
    }
    tests.sort();
    Ok(tests)
}
