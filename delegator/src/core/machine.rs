//! Control-loop phases and their deterministic transitions.
//!
//! The model decides *which* target comes next; this module decides which
//! phase that target maps to. Terminal phases are fixed points.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::state::RunState;
use crate::core::types::{ExecutorKind, Target};

/// How a terminal phase was reached through an explicit `END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Halt {
    /// The router declared the request complete.
    Completed,
    /// The resolver gave up on a failure.
    Unresolvable,
}

/// A control-loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum Phase {
    Routing,
    Dispatch(ExecutorKind),
    Recovering,
    Terminal(Halt),
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Terminal(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Routing => f.write_str("routing"),
            Phase::Dispatch(kind) => write!(f, "dispatch:{kind}"),
            Phase::Recovering => f.write_str("recovering"),
            Phase::Terminal(Halt::Completed) => f.write_str("terminal:completed"),
            Phase::Terminal(Halt::Unresolvable) => f.write_str("terminal:unresolvable"),
        }
    }
}

/// Phase to enter at the top of a routing turn.
pub fn routing_entry(state: &RunState) -> Phase {
    if state.failed {
        Phase::Recovering
    } else {
        Phase::Routing
    }
}

/// Phase following a router decision. `None` means the agent name was unmatched.
///
/// A router naming the resolver while nothing has failed has nothing to resolve,
/// so it is treated like an unmatched name.
pub fn after_router(target: Option<Target>) -> Phase {
    match target {
        Some(Target::End) => Phase::Terminal(Halt::Completed),
        Some(Target::Executor(kind)) => Phase::Dispatch(kind),
        Some(Target::Resolver) | None => Phase::Routing,
    }
}

/// Phase following a resolver decision.
pub fn after_resolver(target: Option<Target>) -> Phase {
    match target {
        Some(Target::End) => Phase::Terminal(Halt::Unresolvable),
        Some(Target::Executor(kind)) => Phase::Dispatch(kind),
        Some(Target::Resolver) | None => Phase::Routing,
    }
}

/// Phase following any dispatch, successful or not.
pub fn after_dispatch(state: &RunState) -> Phase {
    routing_entry(state)
}
