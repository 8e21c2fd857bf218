//! Stable exit codes for delegator CLI commands.

/// Command succeeded, or the run completed.
pub const OK: i32 = 0;
/// Command failed due to invalid config, a backend error or other errors.
pub const INVALID: i32 = 1;
/// The resolver could not recover from a failure.
pub const UNRESOLVABLE: i32 = 2;
/// The run hit `max_steps` or `run_timeout_secs`.
pub const EXHAUSTED: i32 = 3;
/// The model returned something that is not a valid routing decision.
pub const INVALID_DECISION: i32 = 4;
