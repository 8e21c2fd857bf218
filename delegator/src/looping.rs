//! Control loop for `delegator run`.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::agents::InvalidDecisionError;
use crate::core::budget::{ExhaustReason, RunBudget};
use crate::core::machine::{Halt, Phase, routing_entry};
use crate::core::state::RunState;
use crate::core::types::DecisionSource;
use crate::io::config::DelegatorConfig;
use crate::io::executor::TaskExecutor;
use crate::io::model::LanguageModel;
use crate::step::{StepConfig, StepOutcome, run_step};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopStop {
    /// The router declared the request complete.
    Completed,
    /// The resolver gave up on a failure.
    Unresolvable,
    /// The step or time budget ran out first.
    Exhausted { steps: u32, reason: ExhaustReason },
    /// The model produced a response that is not a valid decision.
    Invalid {
        source: DecisionSource,
        reason: String,
        raw: String,
    },
}

impl LoopStop {
    pub fn is_completed(&self) -> bool {
        matches!(self, LoopStop::Completed)
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopOutcome {
    pub run_id: String,
    pub steps_executed: u32,
    pub stop: LoopStop,
    /// Most recent executor failure, set when the run did not complete.
    pub last_failure: Option<String>,
    #[serde(skip)]
    pub state: RunState,
}

/// Drive `state` through router, resolver and executor turns until a terminal
/// phase, an exhausted budget or an invalid model decision.
///
/// `on_step` is called after every transition. Any other error (model or
/// executor backend, I/O, `on_step`) stops the loop immediately.
pub fn run_loop<M, E, F>(
    model: &M,
    executors: &E,
    cfg: &DelegatorConfig,
    mut state: RunState,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    M: LanguageModel + ?Sized,
    E: TaskExecutor + ?Sized,
    F: FnMut(&StepOutcome, &RunState) -> Result<()>,
{
    let step_config = StepConfig::from_config(cfg);
    let budget = RunBudget::new(cfg.max_steps, cfg.run_timeout());
    info!(run_id = %state.run_id, max_steps = cfg.max_steps, "starting run");

    let mut phase = routing_entry(&state);
    let mut steps_executed = 0u32;
    let stop = loop {
        if let Phase::Terminal(halt) = phase {
            break match halt {
                Halt::Completed => LoopStop::Completed,
                Halt::Unresolvable => LoopStop::Unresolvable,
            };
        }
        if let Some(reason) = budget.check(steps_executed) {
            warn!(steps = steps_executed, %reason, "run budget exhausted");
            break LoopStop::Exhausted {
                steps: steps_executed,
                reason,
            };
        }

        match run_step(
            model,
            executors,
            &step_config,
            &budget,
            &mut state,
            phase,
            steps_executed + 1,
        ) {
            Ok(step) => {
                steps_executed += 1;
                phase = step.next_phase;
                on_step(&step, &state)?;
            }
            Err(err) => {
                if let Some(invalid) = err.downcast_ref::<InvalidDecisionError>() {
                    warn!(source = %invalid.source, reason = %invalid.reason, "invalid decision");
                    break LoopStop::Invalid {
                        source: invalid.source,
                        reason: invalid.reason.clone(),
                        raw: invalid.raw.clone(),
                    };
                }
                if let Some(reason @ ExhaustReason::Timeout) = budget.check(steps_executed) {
                    warn!(error = %format!("{err:#}"), "run timed out mid-step");
                    break LoopStop::Exhausted {
                        steps: steps_executed,
                        reason,
                    };
                }
                return Err(err);
            }
        }
    };

    info!(run_id = %state.run_id, steps = steps_executed, ?stop, "run stopped");
    Ok(LoopOutcome {
        run_id: state.run_id.clone(),
        steps_executed,
        last_failure: if stop.is_completed() {
            None
        } else {
            state.last_failure.clone()
        },
        stop,
        state,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::types::{ExecutorKind, ExecutorResult};
    use crate::test_support::{ScriptedExecutor, ScriptedModel, decision, end_decision};

    #[test]
    fn download_then_end_completes() {
        let model = ScriptedModel::new([
            decision("connector_agent", "Download a.csv", json!({"bucket_name": "B"})),
            end_decision(),
        ]);
        let executors = ScriptedExecutor::new([ExecutorResult::success("saved ./data/a.csv")]);
        let mut phases = Vec::new();

        let outcome = run_loop(
            &model,
            &executors,
            &DelegatorConfig::default(),
            RunState::new("run-1", "download a.csv from bucket B"),
            |step, _| {
                phases.push(step.phase);
                Ok(())
            },
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(outcome.last_failure, None);
        assert_eq!(
            phases,
            vec![
                Phase::Routing,
                Phase::Dispatch(ExecutorKind::Storage),
                Phase::Routing
            ]
        );
        assert_eq!(outcome.state.completed_steps.len(), 1);
    }

    #[test]
    fn step_budget_yields_exhausted() {
        let looping = decision("spreadsheet_agent", "???", json!({}));
        let model = ScriptedModel::new(vec![looping; 5]);
        let executors = ScriptedExecutor::new([]);
        let cfg = DelegatorConfig {
            max_steps: 3,
            ..DelegatorConfig::default()
        };

        let outcome = run_loop(&model, &executors, &cfg, RunState::new("run-1", "r"), |_, _| {
            Ok(())
        })
        .expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Exhausted {
                steps: 3,
                reason: ExhaustReason::MaxSteps
            }
        );
        assert_eq!(model.call_count(), 3);
    }

    #[test]
    fn immediate_end_completes_after_one_step() {
        let model = ScriptedModel::new([end_decision()]);
        let executors = ScriptedExecutor::new([]);

        let outcome = run_loop(
            &model,
            &executors,
            &DelegatorConfig::default(),
            RunState::new("run-1", "r"),
            |_, _| Ok(()),
        )
        .expect("loop");
        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(model.call_count(), 1);
    }

    #[test]
    fn callback_error_stops_the_loop() {
        let model = ScriptedModel::new([end_decision()]);
        let executors = ScriptedExecutor::new([]);

        let err = run_loop(
            &model,
            &executors,
            &DelegatorConfig::default(),
            RunState::new("run-1", "r"),
            |_, _| Err(anyhow::anyhow!("disk full")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn elapsed_deadline_exhausts_before_first_step() {
        let model = ScriptedModel::new([end_decision()]);
        let executors = ScriptedExecutor::new([]);
        let cfg = DelegatorConfig {
            run_timeout_secs: 0,
            ..DelegatorConfig::default()
        };

        let outcome = run_loop(&model, &executors, &cfg, RunState::new("run-1", "r"), |_, _| {
            Ok(())
        })
        .expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Exhausted {
                steps: 0,
                reason: ExhaustReason::Timeout
            }
        );
        assert_eq!(model.call_count(), 0);
    }

    /// Model that outlives the run deadline and then fails.
    struct SlowFailingModel(std::time::Duration);

    impl LanguageModel for SlowFailingModel {
        fn complete(&self, _request: &crate::io::model::ModelRequest) -> Result<String> {
            std::thread::sleep(self.0);
            Err(anyhow::anyhow!("model timed out"))
        }
    }

    #[test]
    fn backend_error_past_deadline_is_exhausted() {
        let model = SlowFailingModel(std::time::Duration::from_millis(1100));
        let executors = ScriptedExecutor::new([]);
        let cfg = DelegatorConfig {
            run_timeout_secs: 1,
            ..DelegatorConfig::default()
        };

        let outcome = run_loop(&model, &executors, &cfg, RunState::new("run-1", "r"), |_, _| {
            Ok(())
        })
        .expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Exhausted {
                steps: 0,
                reason: ExhaustReason::Timeout
            }
        );
    }

    #[test]
    fn backend_error_before_deadline_is_returned() {
        let model = ScriptedModel::with_results([Err("connection refused".to_string())]);
        let executors = ScriptedExecutor::new([]);

        let err = run_loop(
            &model,
            &executors,
            &DelegatorConfig::default(),
            RunState::new("run-1", "r"),
            |_, _| Ok(()),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));
    }

    #[test]
    fn stop_serializes_with_kind_tag() {
        let stop = LoopStop::Exhausted {
            steps: 3,
            reason: ExhaustReason::Timeout,
        };
        assert_eq!(
            serde_json::to_value(&stop).expect("serialize"),
            json!({"kind": "exhausted", "steps": 3, "reason": "timeout"})
        );
        assert_eq!(
            serde_json::to_value(LoopStop::Completed).expect("serialize"),
            json!({"kind": "completed"})
        );
    }
}
