//! Step definition and execution.
//!
//! A step optionally transforms the environment (`prepare`), optionally runs a
//! command under a timeout, and then evaluates its checks against the outcome.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::check::{Check, CheckResult};
use crate::core::env::Environment;
use crate::core::state::StepEvent;
use crate::core::template::CommandTemplate;
use crate::core::types::{ConfigError, FailureKind, ProcessStatus};
use crate::io::process::run_command_with_timeout;

/// Environment transformation run before a step's command.
pub type Transform = Arc<dyn Fn(&mut Environment) -> Result<(), ConfigError> + Send + Sync>;

/// Command half of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub template: CommandTemplate,
    pub timeout: Duration,
}

/// A named unit of pipeline work gated by checks. Immutable once built.
#[derive(Clone)]
pub struct Step {
    name: String,
    prepare: Option<Transform>,
    command: Option<CommandSpec>,
    checks: Vec<Check>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("prepare", &self.prepare.is_some())
            .field("command", &self.command)
            .field("checks", &self.checks)
            .finish()
    }
}

impl Step {
    /// Step running `template` under `timeout`.
    pub fn command(name: impl Into<String>, template: CommandTemplate, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            prepare: None,
            command: Some(CommandSpec { template, timeout }),
            checks: Vec::new(),
        }
    }

    /// Pure environment transformation: no process, no timeout, no output.
    pub fn transform<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&mut Environment) -> Result<(), ConfigError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            prepare: Some(Arc::new(transform)),
            command: None,
            checks: Vec::new(),
        }
    }

    /// Derive environment values right before the command is resolved.
    pub fn with_prepare<F>(mut self, transform: F) -> Self
    where
        F: Fn(&mut Environment) -> Result<(), ConfigError> + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(transform));
        self
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_checks(mut self, checks: impl IntoIterator<Item = Check>) -> Self {
        self.checks.extend(checks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_spec(&self) -> Option<&CommandSpec> {
        self.command.as_ref()
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }
}

/// Limits applied to every spawned process.
#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    /// Maximum bytes to capture from stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            output_limit_bytes: 1_000_000,
        }
    }
}

/// What a step's action produced; the input to its checks.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// `None` for transform-only steps.
    pub status: Option<ProcessStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub elapsed: Duration,
}

impl ActionOutcome {
    fn empty(elapsed: Duration) -> Self {
        Self {
            status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            elapsed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    ConfigError,
    Cancelled,
}

/// Recorded outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    /// Resolved command line, when one was resolved.
    pub command: Option<String>,
    pub process: Option<ProcessStatus>,
    pub elapsed: Duration,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub checks: Vec<CheckResult>,
    /// Configuration error that aborted the step before its checks.
    pub error: Option<String>,
}

impl StepResult {
    /// A step is successful iff every check passed.
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Passed
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.process.as_ref().and_then(ProcessStatus::exit_code)
    }

    pub fn first_failure(&self) -> Option<&CheckResult> {
        self.checks.iter().find(|check| !check.passed)
    }

    /// One-line reason this step did not pass.
    pub fn failure_message(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        self.first_failure()
            .map(|check| format!("{}: {}", check.check, check.message))
    }
}

/// A step result plus the event it feeds to the test state machine.
#[derive(Debug, Clone)]
pub struct StepRun {
    pub result: StepResult,
    pub event: StepEvent,
}

/// Execute `step` against `env`, which receives any derived values.
///
/// A configuration error skips check evaluation. Otherwise every check is
/// evaluated. A process that timed out, could not be spawned, or was cancelled
/// always fails the step, even when no check inspects the exit status.
#[instrument(skip_all, fields(step = %step.name))]
pub fn execute_step(
    step: &Step,
    env: &mut Environment,
    limits: ExecLimits,
    cancel: &CancelToken,
) -> StepRun {
    let started = Instant::now();

    if let Some(prepare) = &step.prepare
        && let Err(err) = prepare(env)
    {
        return config_error(step, err, started.elapsed());
    }

    let (command, outcome) = match &step.command {
        None => (None, ActionOutcome::empty(started.elapsed())),
        Some(spec) => {
            let resolved = match spec.template.resolve(env) {
                Ok(resolved) => resolved,
                Err(err) => return config_error(step, err, started.elapsed()),
            };
            info!(command = %resolved, "running step command");
            let output = match run_command_with_timeout(
                resolved.to_command(&env.workdir),
                spec.timeout,
                limits.output_limit_bytes,
                cancel,
            ) {
                Ok(output) => ActionOutcome {
                    status: Some(output.status),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    stdout_truncated: output.stdout_truncated,
                    stderr_truncated: output.stderr_truncated,
                    elapsed: output.elapsed,
                },
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "command execution failed");
                    ActionOutcome {
                        status: Some(ProcessStatus::SpawnFailed {
                            message: format!("{err:#}"),
                        }),
                        ..ActionOutcome::empty(started.elapsed())
                    }
                }
            };
            (Some(resolved.to_string()), output)
        }
    };

    let mut checks: Vec<CheckResult> = step
        .checks
        .iter()
        .map(|check| check.evaluate(&outcome, env))
        .collect();

    let process_kind = match &outcome.status {
        Some(ProcessStatus::TimedOut) => Some(FailureKind::ProcessTimeout),
        Some(ProcessStatus::SpawnFailed { .. }) => Some(FailureKind::SpawnFailed),
        Some(ProcessStatus::Cancelled) => Some(FailureKind::Cancelled),
        _ => None,
    };
    if let (Some(kind), Some(status)) = (process_kind, &outcome.status)
        && !checks.iter().any(|check| check.kind == Some(kind))
    {
        checks.push(CheckResult::fail("process_completed", kind, status.to_string()));
    }

    let (status, event) = if process_kind == Some(FailureKind::Cancelled) {
        (StepStatus::Cancelled, StepEvent::Cancelled)
    } else if let Some(failed) = checks.iter().find(|check| !check.passed) {
        let kind = process_kind
            .or(failed.kind)
            .unwrap_or(FailureKind::NonZeroExit);
        (StepStatus::Failed, StepEvent::Failed(kind))
    } else {
        (StepStatus::Passed, StepEvent::Passed)
    };

    debug!(status = ?status, checks = checks.len(), "step finished");
    StepRun {
        result: StepResult {
            name: step.name.clone(),
            status,
            command,
            process: outcome.status,
            elapsed: outcome.elapsed.max(started.elapsed()),
            stdout: String::from_utf8_lossy(&outcome.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&outcome.stderr).into_owned(),
            stdout_truncated: outcome.stdout_truncated,
            stderr_truncated: outcome.stderr_truncated,
            checks,
            error: None,
        },
        event,
    }
}

fn config_error(step: &Step, err: ConfigError, elapsed: Duration) -> StepRun {
    warn!(err = %err, "step configuration error");
    StepRun {
        result: StepResult {
            name: step.name.clone(),
            status: StepStatus::ConfigError,
            command: None,
            process: None,
            elapsed,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            checks: Vec::new(),
            error: Some(err.to_string()),
        },
        event: StepEvent::ConfigError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{check_retcode_zero, create_check_reference_output};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn sh(name: &str, script: &str) -> Step {
        Step::command(
            name,
            CommandTemplate::new(["sh", "-c", script]),
            Duration::from_secs(5),
        )
    }

    fn run(step: &Step, env: &mut Environment) -> StepRun {
        execute_step(step, env, ExecLimits::default(), &CancelToken::new())
    }

    #[test]
    fn passing_command_records_output() {
        let mut env = Environment::default();
        let step = sh("greet", "printf 'Hello\\n'").with_check(check_retcode_zero());
        let run = run(&step, &mut env);
        assert_eq!(run.event, StepEvent::Passed);
        assert!(run.result.succeeded());
        assert_eq!(run.result.stdout, "Hello\n");
        assert_eq!(run.result.exit_code(), Some(0));
        assert_eq!(run.result.command.as_deref(), Some("sh -c printf 'Hello\\n'"));
    }

    #[test]
    fn all_checks_are_evaluated_after_a_failure() {
        let temp = tempdir().expect("tempdir");
        let mut env = Environment::new(temp.path(), "build");
        let step = sh("run", "exit 1")
            .with_check(check_retcode_zero())
            .with_check(create_check_reference_output("missing.ref"));
        let run = run(&step, &mut env);
        assert_eq!(run.event, StepEvent::Failed(FailureKind::NonZeroExit));
        assert_eq!(run.result.checks.len(), 2);
        assert_eq!(
            run.result.checks[1].kind,
            Some(FailureKind::ReferenceMissing)
        );
    }

    #[test]
    fn missing_key_skips_process_and_checks() {
        let temp = tempdir().expect("tempdir");
        let marker = temp.path().join("ran");
        let mut env = Environment::new(temp.path(), "build");
        let step = Step::command(
            "compile",
            CommandTemplate::new(["touch", "ran", "{javac}"]),
            Duration::from_secs(5),
        )
        .with_check(check_retcode_zero());
        let run = run(&step, &mut env);
        assert_eq!(run.event, StepEvent::ConfigError);
        assert_eq!(run.result.status, StepStatus::ConfigError);
        assert!(run.result.checks.is_empty());
        assert!(run.result.error.as_deref().unwrap_or("").contains("javac"));
        assert!(!marker.exists());
    }

    #[test]
    fn transform_step_derives_values() {
        let mut env = Environment::default().with("testname", "Hello.java");
        let step = Step::transform("derive", |env: &mut Environment| {
            let classname = env
                .testname()?
                .strip_suffix(".java")
                .ok_or_else(|| ConfigError::Invalid("not a .java file".to_string()))?
                .to_string();
            let executable = env.builddir.join(format!("{classname}.exe"));
            env.set("classname", classname);
            env.set("executable", executable);
            Ok(())
        })
        .with_check(check_retcode_zero());
        let run = run(&step, &mut env);
        assert_eq!(run.event, StepEvent::Passed);
        assert_eq!(run.result.process, None);
        assert_eq!(env.executable, Some(PathBuf::from("build/Hello.exe")));
    }

    #[test]
    fn transform_error_is_a_configuration_error() {
        let mut env = Environment::default().with("testname", "Hello.txt");
        let step = Step::transform("derive", |_: &mut Environment| {
            Err(ConfigError::Invalid("not a .java file".to_string()))
        });
        let run = run(&step, &mut env);
        assert_eq!(run.event, StepEvent::ConfigError);
        assert_eq!(run.result.error.as_deref(), Some("not a .java file"));
    }

    #[test]
    fn timeout_fails_even_without_checks() {
        let mut env = Environment::default();
        let step = Step::command(
            "hang",
            CommandTemplate::new(["sh", "-c", "exec sleep 5"]),
            Duration::from_millis(200),
        );
        let run = run(&step, &mut env);
        assert_eq!(run.event, StepEvent::Failed(FailureKind::ProcessTimeout));
        assert_eq!(run.result.process, Some(ProcessStatus::TimedOut));
        assert_eq!(run.result.checks[0].check, "process_completed");
    }

    #[test]
    fn reference_check_reads_workdir_file() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("out.ref"), "hi\n").expect("write ref");
        let mut env = Environment::new(temp.path(), "build");
        let step = sh("run", "echo hi").with_checks([
            check_retcode_zero(),
            create_check_reference_output("out.ref"),
        ]);
        let run = run(&step, &mut env);
        assert!(run.result.succeeded(), "{:?}", run.result.failure_message());
    }
}
