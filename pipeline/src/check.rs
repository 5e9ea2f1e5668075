//! Checks: predicates evaluated against a completed step action.
//!
//! Every check in a step is evaluated, even after one fails, so a report shows
//! every violated expectation at once.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::env::Environment;
use crate::core::types::{FailureKind, ProcessStatus};
use crate::step::ActionOutcome;

/// Longest excerpt of a differing line quoted in a mismatch message.
const EXCERPT_CHARS: usize = 120;

/// How captured stdout is compared with a reference file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitespacePolicy {
    /// Byte-for-byte.
    Exact,
    /// Line by line, ignoring trailing whitespace on each line and trailing
    /// blank lines.
    #[default]
    TrimTrailing,
}

/// A check attached to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The process exited with status 0.
    RetcodeZero,
    /// Captured stdout equals the reference file, read at evaluation time.
    /// Relative paths resolve against the environment's `workdir`.
    ReferenceOutput {
        path: PathBuf,
        #[serde(default)]
        policy: WhitespacePolicy,
    },
    /// Captured stdout contains `needle`.
    StdoutContains { needle: String },
}

/// Result of a single check. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl CheckResult {
    pub fn pass(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            passed: true,
            message: message.into(),
            kind: None,
        }
    }

    pub fn fail(check: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            passed: false,
            message: message.into(),
            kind: Some(kind),
        }
    }
}

/// Check that the step's process exited with status 0.
pub fn check_retcode_zero() -> Check {
    Check::RetcodeZero
}

/// Check factory comparing stdout against the reference at `path`.
///
/// The file is not touched until the check is evaluated, so it may be
/// produced by an earlier step.
pub fn create_check_reference_output(path: impl Into<PathBuf>) -> Check {
    Check::ReferenceOutput {
        path: path.into(),
        policy: WhitespacePolicy::default(),
    }
}

impl Check {
    /// Replace the comparison policy of a reference check. Other checks are
    /// returned unchanged.
    pub fn with_policy(self, policy: WhitespacePolicy) -> Self {
        match self {
            Check::ReferenceOutput { path, .. } => Check::ReferenceOutput { path, policy },
            other => other,
        }
    }

    /// Stable label used in reports.
    pub fn label(&self) -> String {
        match self {
            Check::RetcodeZero => "retcode_zero".to_string(),
            Check::ReferenceOutput { path, .. } => format!("reference_output({})", path.display()),
            Check::StdoutContains { needle } => format!("stdout_contains({needle:?})"),
        }
    }

    pub fn evaluate(&self, outcome: &ActionOutcome, env: &Environment) -> CheckResult {
        let label = self.label();
        let result = match self {
            Check::RetcodeZero => evaluate_retcode(&label, outcome.status.as_ref()),
            Check::ReferenceOutput { path, policy } => {
                evaluate_reference(&label, &env.in_workdir(path), &outcome.stdout, *policy)
            }
            Check::StdoutContains { needle } => {
                let stdout = String::from_utf8_lossy(&outcome.stdout);
                if stdout.contains(needle.as_str()) {
                    CheckResult::pass(label, "stdout contains expected text")
                } else {
                    CheckResult::fail(
                        label,
                        FailureKind::ReferenceMismatch,
                        format!("stdout does not contain {needle:?}"),
                    )
                }
            }
        };
        debug!(check = %result.check, passed = result.passed, "check result");
        result
    }
}

fn evaluate_retcode(label: &str, status: Option<&ProcessStatus>) -> CheckResult {
    let Some(status) = status else {
        return CheckResult::pass(label, "no process to check");
    };
    match status {
        ProcessStatus::Exited { code: 0 } => CheckResult::pass(label, "exit status 0"),
        ProcessStatus::Exited { code } => CheckResult::fail(
            label,
            FailureKind::NonZeroExit,
            format!("expected exit status 0, got {code}"),
        ),
        ProcessStatus::Signaled { .. } => CheckResult::fail(
            label,
            FailureKind::NonZeroExit,
            format!("expected exit status 0, process was {status}"),
        ),
        ProcessStatus::TimedOut => CheckResult::fail(
            label,
            FailureKind::ProcessTimeout,
            "process timed out and was killed",
        ),
        ProcessStatus::SpawnFailed { message } => CheckResult::fail(
            label,
            FailureKind::SpawnFailed,
            format!("process could not be started: {message}"),
        ),
        ProcessStatus::Cancelled => CheckResult::fail(
            label,
            FailureKind::Cancelled,
            "process was killed because the suite was cancelled",
        ),
    }
}

fn evaluate_reference(
    label: &str,
    path: &Path,
    actual: &[u8],
    policy: WhitespacePolicy,
) -> CheckResult {
    let expected = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return CheckResult::fail(
                label,
                FailureKind::ReferenceMissing,
                format!("reference file {} does not exist", path.display()),
            );
        }
        Err(err) => {
            return CheckResult::fail(
                label,
                FailureKind::ReferenceMissing,
                format!("reference file {} is unreadable: {err}", path.display()),
            );
        }
    };
    match compare_output(&expected, actual, policy) {
        None => CheckResult::pass(label, "output matches reference"),
        Some(diff) => CheckResult::fail(label, FailureKind::ReferenceMismatch, diff),
    }
}

/// Compare `actual` with `expected`, returning a diff summary on mismatch.
pub fn compare_output(expected: &[u8], actual: &[u8], policy: WhitespacePolicy) -> Option<String> {
    match policy {
        WhitespacePolicy::Exact => compare_exact(expected, actual),
        WhitespacePolicy::TrimTrailing => compare_trimmed(expected, actual),
    }
}

fn compare_exact(expected: &[u8], actual: &[u8]) -> Option<String> {
    if expected == actual {
        return None;
    }
    let offset = expected
        .iter()
        .zip(actual)
        .position(|(left, right)| left != right)
        .unwrap_or_else(|| expected.len().min(actual.len()));
    let line = expected[..offset].iter().filter(|&&b| b == b'\n').count() + 1;
    Some(format!(
        "output differs from reference at byte {offset} (line {line}): expected {}, got {} \
         ({} expected bytes, {} actual)",
        excerpt(line_at(expected, line)),
        excerpt(line_at(actual, line)),
        expected.len(),
        actual.len()
    ))
}

fn compare_trimmed(expected: &[u8], actual: &[u8]) -> Option<String> {
    let expected = normalized_lines(expected);
    let actual = normalized_lines(actual);
    if expected == actual {
        return None;
    }
    let index = expected
        .iter()
        .zip(&actual)
        .position(|(left, right)| left != right)
        .unwrap_or_else(|| expected.len().min(actual.len()));
    Some(format!(
        "output differs from reference at line {}: expected {}, got {} \
         ({} expected lines, {} actual)",
        index + 1,
        excerpt(expected.get(index).copied()),
        excerpt(actual.get(index).copied()),
        expected.len(),
        actual.len()
    ))
}

fn normalized_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = bytes
        .split(|&b| b == b'\n')
        .map(<[u8]>::trim_ascii_end)
        .collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// 1-based line `line` of `bytes`, if present.
fn line_at(bytes: &[u8], line: usize) -> Option<&[u8]> {
    if bytes.is_empty() {
        return None;
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    body.split(|&b| b == b'\n').nth(line - 1)
}

fn excerpt(line: Option<&[u8]>) -> String {
    match line {
        None => "<end of output>".to_string(),
        Some(line) => {
            let text = String::from_utf8_lossy(line);
            if text.chars().count() > EXCERPT_CHARS {
                let cut: String = text.chars().take(EXCERPT_CHARS).collect();
                format!("{cut:?}...")
            } else {
                format!("{text:?}")
            }
        }
    }
}
