//! Stable exit codes for suite runs.

/// Every test passed.
pub const OK: i32 = 0;
/// At least one test did not pass.
pub const FAILED: i32 = 1;
/// Invalid invocation or configuration; no tests were run.
pub const INVALID: i32 = 2;
