//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;
use crate::core::types::ProcessStatus;

/// How often a waiting step re-checks the cancel token.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Shared budget for both output pipes to close once the process group is
/// gone. Only a descendant that left the group can hold them open that long.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ProcessStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub elapsed: Duration,
}

impl CommandOutput {
    fn spawn_failed(message: String, elapsed: Duration) -> Self {
        Self {
            status: ProcessStatus::SpawnFailed { message },
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            elapsed,
        }
    }
}

type StreamResult = Result<(Vec<u8>, usize)>;

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
///
/// The command runs in its own process group. On timeout or cancellation the whole group is
/// killed and the child reaped before returning; whatever the command leaves running in the
/// group after it exits is killed too. A command that cannot be spawned yields
/// [`ProcessStatus::SpawnFailed`] rather than an error.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs_f64(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let started = Instant::now();
    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!(err = %e, "failed to spawn command");
            return Ok(CommandOutput::spawn_failed(e.to_string(), started.elapsed()));
        }
    };

    let group = match i32::try_from(child.id()) {
        Ok(pid) => Pid::from_raw(pid),
        Err(_) => {
            kill_and_reap(&mut child, None)?;
            return Err(anyhow!("child pid {} out of range", child.id()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let status = loop {
        if cancel.is_cancelled() {
            warn!("suite cancelled, killing command");
            kill_and_reap(&mut child, Some(group))?;
            break ProcessStatus::Cancelled;
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "command timed out, killing"
            );
            kill_and_reap(&mut child, Some(group))?;
            break ProcessStatus::TimedOut;
        }
        let slice = (timeout - elapsed).min(POLL_INTERVAL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            // Leftover descendants would keep the pipes open.
            kill_group(group);
            break exit_status(status);
        }
    };
    let elapsed = started.elapsed();

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let (stdout, stdout_truncated) = join_output(&stdout_rx, "stdout", drain_deadline)?;
    let (stderr, stderr_truncated) = join_output(&stderr_rx, "stderr", drain_deadline)?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(status = %status, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        elapsed,
    })
}

fn exit_status(status: ExitStatus) -> ProcessStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ProcessStatus::Exited { code },
        (None, signal) => ProcessStatus::Signaled { signal },
    }
}

/// SIGKILL every process in `group`. An empty group is not an error.
fn kill_group(group: Pid) {
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => debug!(pgid = group.as_raw(), "killed process group"),
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid = group.as_raw(), err = %err, "failed to kill process group"),
    }
}

fn kill_and_reap(child: &mut Child, group: Option<Pid>) -> Result<()> {
    // The group is killed before the reap so its id cannot be reused meanwhile.
    match group {
        Some(group) => kill_group(group),
        None => {
            // The child may have exited between the last poll and the kill.
            if let Err(err) = child.kill() {
                debug!(err = %err, "kill failed, child already exited");
            }
        }
    }
    child.wait().context("wait command after kill")?;
    Ok(())
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> mpsc::Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver may have given up waiting; nothing to report then.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

fn join_output(
    rx: &mpsc::Receiver<StreamResult>,
    label: &str,
    deadline: Instant,
) -> Result<(Vec<u8>, usize)> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result.with_context(|| format!("read {label}")),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(stream = label, "output pipe still open after exit, dropping output");
            Ok((Vec::new(), 0))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(anyhow!("{label} reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let output = run_command_with_timeout(
            sh("printf 'out'; printf 'err' >&2; exit 3"),
            Duration::from_secs(5),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.status, ProcessStatus::Exited { code: 3 });
        assert_eq!(output.stdout, b"out");
        assert_eq!(output.stderr, b"err");
    }

    #[test]
    fn times_out_and_kills() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("exec sleep 5"),
            Duration::from_millis(200),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.status, ProcessStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdef'"),
            Duration::from_secs(5),
            4,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 2);
    }

    #[test]
    fn missing_program_is_spawn_failure() {
        let output = run_command_with_timeout(
            Command::new("/definitely/not/a/tool"),
            Duration::from_secs(5),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert!(matches!(output.status, ProcessStatus::SpawnFailed { .. }));
    }

    #[test]
    fn timeout_kills_background_helpers_too() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cmd = sh("sleep 30 & echo $! > helper.pid; printf 'started\\n'; wait");
        cmd.current_dir(temp.path());
        let started = Instant::now();
        let output = run_command_with_timeout(
            cmd,
            Duration::from_millis(300),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.status, ProcessStatus::TimedOut);
        assert!(
            started.elapsed() < Duration::from_millis(1500),
            "took {:?}",
            started.elapsed()
        );
        assert_eq!(output.stdout, b"started\n");

        let pid = std::fs::read_to_string(temp.path().join("helper.pid")).expect("pid");
        let pid = Pid::from_raw(pid.trim().parse().expect("numeric pid"));
        assert!(wait_until_gone(pid), "background helper survived");
    }

    #[test]
    fn signal_number_is_recorded() {
        let output = run_command_with_timeout(
            sh("kill -SEGV $$"),
            Duration::from_secs(5),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.status, ProcessStatus::Signaled { signal: Some(11) });
    }

    /// The helper is reparented once its shell dies and may linger as a
    /// zombie until its new parent reaps it; that counts as gone.
    fn wait_until_gone(pid: Pid) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if nix::sys::signal::kill(pid, None) == Err(Errno::ESRCH) || is_zombie(pid) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn is_zombie(pid: Pid) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid.as_raw()))
            .ok()
            .and_then(|stat| stat.rsplit_once(')').map(|(_, rest)| rest.trim_start().starts_with('Z')))
            .unwrap_or(false)
    }

    #[test]
    fn cancelled_token_kills_the_child() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let output =
            run_command_with_timeout(sh("exec sleep 5"), Duration::from_secs(10), 1024, &cancel)
                .expect("run");
        assert_eq!(output.status, ProcessStatus::Cancelled);
    }
}
