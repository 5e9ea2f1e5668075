//! Plain-text rendering of suite results.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::expect::Comparison;
use crate::exit_codes;
use crate::suite::SuiteResult;
use crate::test::TestResult;

/// Lines of captured output shown per stream in verbose mode.
const VERBOSE_TAIL_LINES: usize = 20;

/// Render one line per test plus a summary. `comparisons` may be empty when
/// no expectations file is in use. `verbose` appends the failing step's
/// captured output.
pub fn render_report(
    result: &SuiteResult,
    comparisons: &BTreeMap<String, Comparison>,
    verbose: bool,
) -> String {
    let mut buf = String::new();
    for test in result.in_order() {
        render_test_line(&mut buf, test, comparisons.get(&test.name).copied());
        if verbose && !test.passed() {
            render_failure_detail(&mut buf, test);
        }
    }

    let summary = &result.summary;
    let elapsed = (result.finished_at - result.started_at).num_milliseconds() as f64 / 1000.0;
    let _ = writeln!(
        buf,
        "suite {}: {} tests, {} passed, {} failed, {} errors, {} cancelled in {:.2}s",
        result.name,
        summary.total,
        summary.passed,
        summary.failed,
        summary.errors,
        summary.cancelled,
        elapsed
    );

    if !comparisons.is_empty() {
        let count = |wanted: Comparison| comparisons.values().filter(|c| **c == wanted).count();
        let unexpected = comparisons.values().filter(|c| c.is_unexpected()).count();
        let _ = writeln!(
            buf,
            "expectations: {} expected failures, {} regressions, {} changed, {} fixed ({})",
            count(Comparison::ExpectedFailure),
            count(Comparison::Regression),
            count(Comparison::ChangedFailure),
            count(Comparison::Fixed),
            if unexpected == 0 {
                "as expected".to_string()
            } else {
                format!("{unexpected} unexpected")
            }
        );
    }
    buf
}

fn render_test_line(buf: &mut String, test: &TestResult, comparison: Option<Comparison>) {
    let _ = write!(buf, "{:<6} {}", test.verdict.label(), test.name);
    if let Some(step) = test.verdict.failing_step() {
        let _ = write!(buf, " [{step}]");
    }
    if let Some(message) = test.failure_message() {
        let _ = write!(buf, " {message}");
    }
    match comparison {
        Some(Comparison::ExpectedFailure) => buf.push_str(" (expected failure)"),
        Some(Comparison::Regression) => buf.push_str(" (REGRESSION)"),
        Some(Comparison::ChangedFailure) => buf.push_str(" (failure changed)"),
        Some(Comparison::Fixed) => buf.push_str(" (fixed, remove from expectations)"),
        Some(Comparison::Pass) | None => {}
    }
    buf.push('\n');
}

fn render_failure_detail(buf: &mut String, test: &TestResult) {
    let Some(step) = test.failing_step() else {
        return;
    };
    if let Some(command) = &step.command {
        let _ = writeln!(buf, "    command: {command}");
    }
    for check in step.checks.iter().filter(|check| !check.passed) {
        let _ = writeln!(buf, "    {}: {}", check.check, check.message);
    }
    for (label, output, truncated) in [
        ("stdout", &step.stdout, step.stdout_truncated),
        ("stderr", &step.stderr, step.stderr_truncated),
    ] {
        if output.is_empty() {
            continue;
        }
        let _ = writeln!(buf, "    --- {label} ---");
        let lines: Vec<&str> = output.lines().collect();
        let start = lines.len().saturating_sub(VERBOSE_TAIL_LINES);
        for line in &lines[start..] {
            let _ = writeln!(buf, "    {line}");
        }
        if truncated > 0 {
            let _ = writeln!(buf, "    [{label} truncated {truncated} bytes]");
        }
    }
    if !test.skipped.is_empty() {
        let _ = writeln!(buf, "    not attempted: {}", test.skipped.join(", "));
    }
}

/// Process exit code for a finished run.
pub fn exit_code(result: &SuiteResult) -> i32 {
    if result.all_passed() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}
