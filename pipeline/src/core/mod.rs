//! Pure, deterministic engine logic: environment and templating, the per-test
//! state machine, and expectation comparison. No I/O.

pub mod env;
pub mod expect;
pub mod state;
pub mod template;
pub mod types;
