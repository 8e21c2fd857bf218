//! Recovery resolver: proposes a corrected action after a failed dispatch.
//!
//! Context comes from prior executor outputs ranked by TF-IDF similarity to
//! the failure message. A run whose first dispatch failed has no such context;
//! what happens then is a [`FirstFailurePolicy`]. What happens when the model
//! call or its response is unusable is a [`ResolverFailurePolicy`].

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::RunBudget;
use crate::core::decision::parse_decision;
use crate::core::selector::select_target;
use crate::core::similarity::top_k_similar;
use crate::core::state::RunState;
use crate::core::types::{DecisionSource, ExecutorOutput, RoutingDecision, Target};
use crate::io::config::{DelegatorConfig, FirstFailurePolicy, ResolverFailurePolicy};
use crate::io::model::{LanguageModel, ModelRequest};
use crate::io::prompt::{PromptBuilder, ResolverPromptInputs};

use super::{DecisionTurn, InvalidDecisionError, apply_target};

/// Resolver settings derived from config.
#[derive(Debug, Clone)]
pub struct Resolver {
    prompts: PromptBuilder,
    top_k: usize,
    history_window: usize,
    first_failure: FirstFailurePolicy,
    on_failure: ResolverFailurePolicy,
    timeout_cap: Duration,
}

impl Resolver {
    pub fn new(cfg: &DelegatorConfig) -> Self {
        Self {
            prompts: PromptBuilder::new(cfg.prompt_budget_bytes),
            top_k: cfg.resolver_top_k,
            history_window: cfg.router_history_window,
            first_failure: cfg.first_failure,
            on_failure: cfg.resolver_failure,
            timeout_cap: cfg.model.timeout(),
        }
    }

    /// Prior outputs most similar to the current failure, most similar first.
    pub fn similar_outputs(&self, state: &RunState) -> Vec<String> {
        let corpus: Vec<String> = state
            .recent_outputs
            .iter()
            .map(ExecutorOutput::render)
            .collect();
        top_k_similar(&state.failure_detail, &corpus, self.top_k)
            .into_iter()
            .map(|idx| corpus[idx].clone())
            .collect()
    }

    pub fn render_prompt(&self, state: &RunState, similar: &[String]) -> Result<String> {
        self.prompts.build_resolver(&ResolverPromptInputs {
            request: &state.request,
            completed: state.completed_window(self.history_window),
            failing_action: &state.next_action,
            failure_detail: &state.failure_detail,
            similar,
        })
    }

    /// Produce a corrected decision (or `END`) for the pending failure and
    /// apply it to `state`. The failure is cleared on every path that returns
    /// `Ok`.
    #[instrument(skip_all, fields(run_id = %state.run_id, prior_outputs = state.recent_outputs.len()))]
    pub fn resolve<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        state: &mut RunState,
        budget: &RunBudget,
    ) -> Result<DecisionTurn> {
        if state.recent_outputs.is_empty() {
            match self.first_failure {
                FirstFailurePolicy::Resolve => {
                    debug!("no prior outputs; resolving without context");
                }
                FirstFailurePolicy::Terminate => {
                    info!("first dispatch failed; ending run");
                    let decision = RoutingDecision::end(format!(
                        "The first task failed and cannot be resolved: {}",
                        state.failure_detail
                    ));
                    state.clear_failure();
                    apply_target(state, &decision, Some(Target::End));
                    return Ok(DecisionTurn {
                        decision: Some(decision),
                        ..DecisionTurn::without_model(DecisionSource::Resolver, Some(Target::End))
                    });
                }
                FirstFailurePolicy::Reroute => {
                    info!("first dispatch failed; rerouting");
                    state.clear_failure();
                    state.clear_next();
                    return Ok(DecisionTurn::without_model(DecisionSource::Resolver, None));
                }
            }
        }

        let similar = self.similar_outputs(state);
        debug!(similar = similar.len(), "ranked prior outputs");
        let prompt = self.render_prompt(state, &similar)?;
        let request = ModelRequest {
            source: DecisionSource::Resolver,
            prompt,
            timeout: budget.call_timeout(self.timeout_cap)?,
        };

        let (raw, parsed) = match model.complete(&request) {
            Ok(raw) => {
                let parsed = parse_decision(&raw).map_err(|err| err.to_string());
                (Some(raw), parsed)
            }
            Err(err) => (None, Err(format!("model call failed: {err:#}"))),
        };
        let decision = match parsed {
            Ok(decision) => decision,
            Err(reason) => match self.on_failure {
                ResolverFailurePolicy::Terminate => {
                    warn!(%reason, "resolver produced no usable decision; ending run");
                    RoutingDecision::end(format!(
                        "The failure could not be resolved: {reason}"
                    ))
                }
                ResolverFailurePolicy::Fail => {
                    return Err(InvalidDecisionError {
                        source: DecisionSource::Resolver,
                        raw: raw.unwrap_or_default(),
                        reason,
                    }
                    .into());
                }
            },
        };

        let target = select_target(&decision.agent);
        match target {
            Some(Target::Executor(kind)) => {
                info!(executor = %kind, action = %decision.action, "resolver proposed correction");
            }
            Some(Target::End) => info!(action = %decision.action, "resolver gave up"),
            Some(Target::Resolver) | None => {
                warn!(agent = %decision.agent, "resolver named no executor; back to router");
            }
        }
        state.clear_failure();
        apply_target(state, &decision, target);

        Ok(DecisionTurn {
            source: DecisionSource::Resolver,
            prompt: Some(request.prompt),
            response: raw,
            decision: Some(decision),
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::types::ExecutorKind;
    use crate::test_support::{ScriptedModel, decision};

    fn budget() -> RunBudget {
        RunBudget::new(10, Duration::from_secs(60))
    }

    fn resolver(first_failure: FirstFailurePolicy, on_failure: ResolverFailurePolicy) -> Resolver {
        Resolver::new(&DelegatorConfig {
            first_failure,
            resolver_failure: on_failure,
            ..DelegatorConfig::default()
        })
    }

    fn default_resolver() -> Resolver {
        resolver(FirstFailurePolicy::Resolve, ResolverFailurePolicy::Terminate)
    }

    fn failed_first_step() -> RunState {
        let mut state = RunState::new("run-1", "download a.csv from bucket B");
        state.set_next(
            Target::Executor(ExecutorKind::Storage),
            "Download a.csv from bucket B",
        );
        state.record_failure("ERROR: file not found");
        state
    }

    fn with_history() -> RunState {
        let mut state = RunState::new("run-1", "merge wb1.csv and wb2.csv then load");
        state.set_next(Target::Executor(ExecutorKind::Storage), "Download wb1.csv");
        state.record_success(
            ExecutorKind::Storage,
            "Downloaded wb1.csv from bucket data_storage into ./data/wb1.csv",
        );
        state.set_next(Target::Executor(ExecutorKind::Warehouse), "Create dataset emp_data");
        state.record_success(ExecutorKind::Warehouse, "Dataset emp_data created in project p");
        state.set_next(Target::Executor(ExecutorKind::Storage), "Download wb2.csv");
        state.record_failure("ERROR: wb2.csv does not exist in bucket data_storage");
        state
    }

    #[test]
    fn first_failure_resolve_asks_model_without_context() {
        let model = ScriptedModel::new([decision(
            "connector_agent",
            "List files in bucket B",
            json!({"bucket_name": "B"}),
        )]);
        let mut state = failed_first_step();

        let turn = default_resolver()
            .resolve(&model, &mut state, &budget())
            .expect("resolve");

        assert_eq!(turn.target, Some(Target::Executor(ExecutorKind::Storage)));
        assert!(!state.failed);
        assert!(state.failure_detail.is_empty());
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("Failed task: Download a.csv from bucket B"));
        assert!(!prompt.contains("### Related Agent Responses"));
    }

    #[test]
    fn first_failure_terminate_ends_without_model() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let mut state = failed_first_step();

        let turn = resolver(FirstFailurePolicy::Terminate, ResolverFailurePolicy::Terminate)
            .resolve(&model, &mut state, &budget())
            .expect("resolve");

        assert_eq!(model.call_count(), 0);
        assert_eq!(turn.target, Some(Target::End));
        assert!(state.is_terminal());
        assert!(!state.failed);
        assert_eq!(state.last_failure.as_deref(), Some("ERROR: file not found"));
    }

    #[test]
    fn first_failure_reroute_hands_back_to_router() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let mut state = failed_first_step();

        let turn = resolver(FirstFailurePolicy::Reroute, ResolverFailurePolicy::Terminate)
            .resolve(&model, &mut state, &budget())
            .expect("resolve");

        assert_eq!(model.call_count(), 0);
        assert_eq!(turn.target, None);
        assert_eq!(state.next_executor, None);
        assert!(!state.failed);
    }

    #[test]
    fn similar_output_is_ranked_first() {
        let state = with_history();
        let similar = default_resolver().similar_outputs(&state);
        assert_eq!(similar.len(), 2);
        assert!(similar[0].contains("wb1.csv"), "{similar:?}");
        assert!(similar[1].contains("emp_data"), "{similar:?}");
    }

    #[test]
    fn unparseable_response_terminates_by_default() {
        let model = ScriptedModel::new(["not a mapping"]);
        let mut state = with_history();

        let turn = default_resolver()
            .resolve(&model, &mut state, &budget())
            .expect("resolve");

        assert_eq!(turn.target, Some(Target::End));
        assert_eq!(turn.response.as_deref(), Some("not a mapping"));
        assert!(state.is_terminal());
        assert!(!state.failed);
    }

    #[test]
    fn unparseable_response_fails_under_fail_policy() {
        let model = ScriptedModel::new(["not a mapping"]);
        let mut state = with_history();

        let err = resolver(FirstFailurePolicy::Resolve, ResolverFailurePolicy::Fail)
            .resolve(&model, &mut state, &budget())
            .unwrap_err();

        let invalid = err
            .downcast_ref::<InvalidDecisionError>()
            .expect("invalid decision");
        assert_eq!(invalid.source, DecisionSource::Resolver);
        assert_eq!(invalid.raw, "not a mapping");
        assert!(state.failed);
    }

    #[test]
    fn model_error_terminates_by_default() {
        let model = ScriptedModel::with_results([Err("rate limited".to_string())]);
        let mut state = with_history();

        let turn = default_resolver()
            .resolve(&model, &mut state, &budget())
            .expect("resolve");

        assert_eq!(turn.target, Some(Target::End));
        assert!(turn.response.is_none());
        assert!(state.next_action.contains("rate limited"));
    }

    #[test]
    fn end_from_model_is_terminal() {
        let model = ScriptedModel::new([decision(
            "END",
            "End the workflow as the conflict could not be resolved",
            json!({}),
        )]);
        let mut state = with_history();

        let turn = default_resolver()
            .resolve(&model, &mut state, &budget())
            .expect("resolve");

        assert_eq!(turn.target, Some(Target::End));
        assert!(state.is_terminal());
        assert!(state.failure_detail.is_empty());
    }
}
