//! Model-backed decision makers: the router and the recovery resolver.

use std::fmt;

use crate::core::state::RunState;
use crate::core::types::{DecisionSource, RoutingDecision, Target};

pub mod resolver;
pub mod router;

/// A model response that could not be turned into a routing decision.
///
/// Carried inside `anyhow::Error`; the loop recovers it with `downcast_ref` and
/// stops the run with an invalid-decision outcome.
#[derive(Debug, Clone)]
pub struct InvalidDecisionError {
    pub source: DecisionSource,
    /// Raw model response, empty when the model call itself failed.
    pub raw: String,
    pub reason: String,
}

impl fmt::Display for InvalidDecisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned an invalid decision: {}", self.source, self.reason)
    }
}

impl std::error::Error for InvalidDecisionError {}

/// What a router or resolver turn produced, including run log artifacts.
#[derive(Debug, Clone)]
pub struct DecisionTurn {
    pub source: DecisionSource,
    /// Rendered prompt; `None` when the model was not consulted.
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub decision: Option<RoutingDecision>,
    /// `None` when the decision named no known target.
    pub target: Option<Target>,
}

impl DecisionTurn {
    fn without_model(source: DecisionSource, target: Option<Target>) -> Self {
        Self {
            source,
            prompt: None,
            response: None,
            decision: None,
            target,
        }
    }
}

/// Apply a decision's target to the run state.
fn apply_target(state: &mut RunState, decision: &RoutingDecision, target: Option<Target>) {
    match target {
        Some(t @ Target::Executor(_)) => state.set_next(t, decision.task_description()),
        Some(Target::End) => state.set_next(Target::End, decision.action.clone()),
        Some(Target::Resolver) | None => state.clear_next(),
    }
}

