//! Shared deterministic types for the pipeline engine.
//!
//! Everything that can go wrong while executing a test is represented here as
//! data. Only [`ConfigError`] is raised as an error value, and even that is
//! captured into the step result before it reaches the suite.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a failed check or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A template key was missing or a transform rejected the environment.
    /// No process was started.
    ConfigurationError,
    /// The process exceeded its timeout and was killed.
    ProcessTimeout,
    /// The process ran to completion with a failing status (or died by signal).
    NonZeroExit,
    /// Captured stdout differs from the recorded reference.
    ReferenceMismatch,
    /// The reference file does not exist.
    ReferenceMissing,
    /// The process could not be started at all.
    SpawnFailed,
    /// The suite was asked to stop while this step was in flight.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::ConfigurationError => "configuration_error",
            FailureKind::ProcessTimeout => "process_timeout",
            FailureKind::NonZeroExit => "non_zero_exit",
            FailureKind::ReferenceMismatch => "reference_mismatch",
            FailureKind::ReferenceMissing => "reference_missing",
            FailureKind::SpawnFailed => "spawn_failed",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// How a step's process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessStatus {
    Exited { code: i32 },
    /// Terminated by a signal without an exit code.
    Signaled { signal: Option<i32> },
    TimedOut,
    SpawnFailed { message: String },
    Cancelled,
}

impl ProcessStatus {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Exited { code } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Exited { code } => write!(f, "exit status {code}"),
            ProcessStatus::Signaled { signal: Some(signal) } => {
                write!(f, "terminated by signal {signal}")
            }
            ProcessStatus::Signaled { signal: None } => f.write_str("terminated by signal"),
            ProcessStatus::TimedOut => f.write_str("timed out"),
            ProcessStatus::SpawnFailed { message } => write!(f, "failed to start: {message}"),
            ProcessStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Configuration and template resolution errors.
///
/// These abort the step before any process is spawned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration key `{key}`")]
    MissingConfiguration { key: String },
    #[error("invalid template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },
    #[error("{0}")]
    Invalid(String),
}
