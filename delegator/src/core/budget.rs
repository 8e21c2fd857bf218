//! Step and wall-clock budget for a run.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Which limit stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    MaxSteps,
    Timeout,
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustReason::MaxSteps => f.write_str("step budget exhausted"),
            ExhaustReason::Timeout => f.write_str("run timed out"),
        }
    }
}

/// Bounds on the number of transitions and total run time.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    pub max_steps: u32,
    pub deadline: Instant,
}

impl RunBudget {
    pub fn new(max_steps: u32, timeout: Duration) -> Self {
        Self {
            max_steps,
            deadline: Instant::now() + timeout,
        }
    }

    /// Returns the exhausted limit, if any, before taking step `steps + 1`.
    pub fn check(&self, steps: u32) -> Option<ExhaustReason> {
        if steps >= self.max_steps {
            return Some(ExhaustReason::MaxSteps);
        }
        if Instant::now() >= self.deadline {
            return Some(ExhaustReason::Timeout);
        }
        None
    }

    /// Time left for a blocking call, capped at `cap`.
    pub fn call_timeout(&self, cap: Duration) -> Result<Duration> {
        Ok(remaining_budget(self.deadline)?.min(cap))
    }
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("run timed out"));
    }
    Ok(remaining)
}
