//! One transition of the control loop.
//!
//! [`run_step`] executes the work for a single [`Phase`] (a router call, a
//! resolver call or one executor dispatch), mutates the [`RunState`]
//! accordingly and reports the phase that follows.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agents::DecisionTurn;
use crate::agents::resolver::Resolver;
use crate::agents::router::Router;
use crate::core::budget::RunBudget;
use crate::core::machine::{Phase, after_dispatch, after_resolver, after_router};
use crate::core::state::RunState;
use crate::core::types::{DecisionSource, ExecutorKind, ExecutorResult, RoutingDecision, Target};
use crate::io::config::DelegatorConfig;
use crate::io::executor::{TaskExecutor, TaskRequest};
use crate::io::model::LanguageModel;

/// Router and resolver settings shared by every step of a run.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub router: Router,
    pub resolver: Resolver,
}

impl StepConfig {
    pub fn from_config(cfg: &DelegatorConfig) -> Self {
        Self {
            router: Router::new(cfg),
            resolver: Resolver::new(cfg),
        }
    }
}

/// Result of a single transition.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Step number within the run (1-indexed).
    pub step: u32,
    /// Phase that was executed.
    pub phase: Phase,
    /// Phase the loop enters next.
    pub next_phase: Phase,
    pub source: Option<DecisionSource>,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub decision: Option<RoutingDecision>,
    pub target: Option<Target>,
    pub executor_result: Option<ExecutorResult>,
    pub duration_ms: u64,
}

impl StepOutcome {
    fn new(step: u32, phase: Phase) -> Self {
        Self {
            step,
            phase,
            next_phase: phase,
            source: None,
            prompt: None,
            response: None,
            decision: None,
            target: None,
            executor_result: None,
            duration_ms: 0,
        }
    }

    fn with_turn(mut self, turn: DecisionTurn) -> Self {
        self.source = Some(turn.source);
        self.prompt = turn.prompt;
        self.response = turn.response;
        self.decision = turn.decision;
        self.target = turn.target;
        self
    }
}

/// Execute the work for `phase` and return the phase that follows.
///
/// Terminal phases are fixed points: the state is left untouched and the same
/// phase is returned. Errors from the model or executor backends propagate;
/// in-band executor failures are recorded on the state instead.
#[instrument(skip_all, fields(run_id = %state.run_id, step = step, phase = %phase))]
pub fn run_step<M: LanguageModel + ?Sized, E: TaskExecutor + ?Sized>(
    model: &M,
    executors: &E,
    config: &StepConfig,
    budget: &RunBudget,
    state: &mut RunState,
    phase: Phase,
    step: u32,
) -> Result<StepOutcome> {
    let start = Instant::now();
    let mut outcome = match phase {
        Phase::Terminal(_) => StepOutcome::new(step, phase),
        Phase::Routing => {
            let turn = config.router.route(model, state, budget)?;
            let next = match turn.target {
                // A pending failure short-circuits the router straight to recovery.
                Some(Target::Resolver) if state.failed => Phase::Recovering,
                target => after_router(target),
            };
            StepOutcome {
                next_phase: next,
                ..StepOutcome::new(step, phase).with_turn(turn)
            }
        }
        Phase::Recovering => {
            let turn = config.resolver.resolve(model, state, budget)?;
            StepOutcome {
                next_phase: after_resolver(turn.target),
                ..StepOutcome::new(step, phase).with_turn(turn)
            }
        }
        Phase::Dispatch(kind) => {
            let result = dispatch(executors, budget, state, kind)?;
            StepOutcome {
                next_phase: after_dispatch(state),
                target: Some(Target::Executor(kind)),
                executor_result: Some(result),
                ..StepOutcome::new(step, phase)
            }
        }
    };
    outcome.duration_ms = start.elapsed().as_millis() as u64;
    Ok(outcome)
}

fn dispatch<E: TaskExecutor + ?Sized>(
    executors: &E,
    budget: &RunBudget,
    state: &mut RunState,
    kind: ExecutorKind,
) -> Result<ExecutorResult> {
    let request = TaskRequest {
        task: state.next_action.clone(),
        timeout: budget.call_timeout(executors.timeout_cap(kind))?,
    };
    info!(executor = %kind, task = %request.task, "dispatching");
    let result = executors
        .invoke(kind, &request)
        .with_context(|| format!("invoke {kind} executor"))?;

    match &result {
        ExecutorResult::Success { output } => state.record_success(kind, output.clone()),
        ExecutorResult::Failure { code, message } => {
            warn!(executor = %kind, ?code, "executor reported failure");
            state.record_failure(message.clone());
        }
    }
    Ok(result)
}
