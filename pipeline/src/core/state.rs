//! Per-test state machine and verdict classification.
//!
//! The machine is strictly linear: no retries, no backward transitions. Once a
//! terminal state is reached, further events are ignored.

use serde::{Deserialize, Serialize};

use crate::core::types::FailureKind;

/// What happened when a single step was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Every check passed.
    Passed,
    /// At least one check failed; carries the first failing kind.
    Failed(FailureKind),
    /// The step's action raised a configuration error; checks were not run.
    ConfigError,
    /// The suite was cancelled during the step.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Pending,
    Running(usize),
    Passed,
    Failed { step: usize, kind: FailureKind },
    TimedOut(usize),
    ConfigError(usize),
    /// Cancelled while `Some(step)` was in flight, or (`None`) before a step
    /// was started.
    Cancelled(Option<usize>),
}

impl TestState {
    /// Leave `Pending`. A test with no steps passes immediately.
    pub fn start(self, step_count: usize) -> TestState {
        match self {
            TestState::Pending if step_count == 0 => TestState::Passed,
            TestState::Pending => TestState::Running(0),
            other => other,
        }
    }

    /// Apply the outcome of the running step.
    pub fn advance(self, event: StepEvent, step_count: usize) -> TestState {
        let TestState::Running(index) = self else {
            return self;
        };
        match event {
            StepEvent::Passed if index + 1 >= step_count => TestState::Passed,
            StepEvent::Passed => TestState::Running(index + 1),
            StepEvent::Failed(FailureKind::ProcessTimeout) => TestState::TimedOut(index),
            StepEvent::Failed(kind) => TestState::Failed { step: index, kind },
            StepEvent::ConfigError => TestState::ConfigError(index),
            StepEvent::Cancelled => TestState::Cancelled(Some(index)),
        }
    }

    /// Stop before the next step is attempted. That step never ran, so no
    /// step is blamed.
    pub fn cancel(self) -> TestState {
        match self {
            TestState::Pending | TestState::Running(_) => TestState::Cancelled(None),
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestState::Pending | TestState::Running(_))
    }

    pub fn running_step(&self) -> Option<usize> {
        match self {
            TestState::Running(index) => Some(*index),
            _ => None,
        }
    }
}

/// Aggregate outcome of a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    /// A check failed at `step`. Timeouts are `kind: process_timeout`.
    Failed { step: String, kind: FailureKind },
    ConfigError { step: String, message: String },
    /// `step` is `None` when no step was in flight.
    Cancelled { step: Option<String> },
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn failing_step(&self) -> Option<&str> {
        match self {
            Verdict::Passed => None,
            Verdict::Failed { step, .. } | Verdict::ConfigError { step, .. } => Some(step),
            Verdict::Cancelled { step } => step.as_deref(),
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Verdict::Passed => None,
            Verdict::Failed { kind, .. } => Some(*kind),
            Verdict::ConfigError { .. } => Some(FailureKind::ConfigurationError),
            Verdict::Cancelled { .. } => Some(FailureKind::Cancelled),
        }
    }

    /// Short report label.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Passed => "PASS",
            Verdict::Failed { .. } => "FAIL",
            Verdict::ConfigError { .. } => "ERROR",
            Verdict::Cancelled { .. } => "CANCEL",
        }
    }

    /// Stable one-line summary used by failure logs (`step: kind`).
    pub fn failure_summary(&self) -> Option<String> {
        let kind = self.kind()?;
        Some(match self.failing_step() {
            Some(step) => format!("{step}: {kind}"),
            None => kind.to_string(),
        })
    }
}
