//! Failure log and expected-failures file.
//!
//! Format: one `<test-id>: <summary>` line per failing test, sorted by id.
//! Blank lines and `#` comments are ignored when reading.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::suite::SuiteResult;

/// Parse an expectations file body into `test id -> failure summary`.
pub fn parse_expectations(contents: &str) -> Result<BTreeMap<String, String>> {
    let mut expectations = BTreeMap::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((id, summary)) = line.split_once(": ") else {
            bail!("line {}: expected `<test>: <summary>`", index + 1);
        };
        let id = id.trim();
        if id.is_empty() {
            bail!("line {}: test id must be non-empty", index + 1);
        }
        if expectations
            .insert(id.to_string(), summary.trim().to_string())
            .is_some()
        {
            bail!("line {}: duplicate test {}", index + 1, id);
        }
    }
    Ok(expectations)
}

/// Load expectations. A missing file means no test is expected to fail.
pub fn load_expectations(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        debug!(path = %path.display(), "no expectations file");
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_expectations(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Render the failure log for `result`.
pub fn render_failure_log(result: &SuiteResult) -> String {
    let mut buf = String::new();
    for (id, summary) in result.failures() {
        buf.push_str(&format!("{id}: {summary}\n"));
    }
    buf
}

/// Atomically write the failure log.
pub fn write_failure_log(path: &Path, result: &SuiteResult) -> Result<()> {
    super::write_atomic(path, &render_failure_log(result))
}

/// Fold `result` into `expectations`. Tests that ran take their new failure
/// summary, or lose their entry if they passed. Entries for tests that did not
/// run are kept.
pub fn merge_expectations(
    mut expectations: BTreeMap<String, String>,
    result: &SuiteResult,
) -> BTreeMap<String, String> {
    for (id, failure) in result.verdicts() {
        match failure {
            Some(summary) => {
                expectations.insert(id.to_string(), summary);
            }
            None => {
                expectations.remove(id);
            }
        }
    }
    expectations
}

/// Merge `result` into the expectations file at `path` and rewrite it
/// atomically. Comments in the old file are not kept.
pub fn update_expectations(path: &Path, result: &SuiteResult) -> Result<()> {
    let merged = merge_expectations(load_expectations(path)?, result);
    let mut buf = String::new();
    for (id, summary) in &merged {
        buf.push_str(&format!("{id}: {summary}\n"));
    }
    super::write_atomic(path, &buf)?;
    debug!(path = %path.display(), entries = merged.len(), "expectations updated");
    Ok(())
}
