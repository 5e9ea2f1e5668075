//! Structured result persistence.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::suite::SuiteResult;

/// Write the full suite result as pretty JSON with a trailing newline.
pub fn write_results_json(path: &Path, result: &SuiteResult) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(result).context("serialize results")?;
    payload.push('\n');
    super::write_atomic(path, &payload)
}

pub fn load_results_json(path: &Path) -> Result<SuiteResult> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
