//! Pipeline-based test execution engine.
//!
//! A [`test::Test`] is an ordered list of [`step::Step`]s sharing one
//! environment. Each step runs an optional command under a timeout and is gated
//! by [`check::Check`]s; the first step that does not pass ends its test. A
//! [`suite::Suite`] runs independent tests and aggregates their verdicts.
//!
//! - **[`core`]**: Pure, deterministic logic (environment and templating, the
//!   per-test state machine, expectation comparison). No I/O.
//! - **[`io`]**: Side-effecting operations (process execution, configuration,
//!   result and failure-log files).
//!
//! Orchestration modules ([`step`], [`test`], [`suite`], [`report`]) coordinate
//! core logic with I/O.

pub mod cancel;
pub mod check;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod step;
pub mod suite;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
