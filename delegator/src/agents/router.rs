//! Router: picks the next executor and action for a run.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::RunBudget;
use crate::core::decision::parse_decision;
use crate::core::selector::select_target;
use crate::core::state::RunState;
use crate::core::types::{DecisionSource, Target};
use crate::io::config::DelegatorConfig;
use crate::io::model::{LanguageModel, ModelRequest};
use crate::io::prompt::{PromptBuilder, RouterPromptInputs};

use super::{DecisionTurn, InvalidDecisionError, apply_target};

/// Router settings derived from config.
#[derive(Debug, Clone)]
pub struct Router {
    prompts: PromptBuilder,
    history_window: usize,
    output_window: usize,
    timeout_cap: Duration,
}

impl Router {
    pub fn new(cfg: &DelegatorConfig) -> Self {
        Self {
            prompts: PromptBuilder::new(cfg.prompt_budget_bytes),
            history_window: cfg.router_history_window,
            output_window: cfg.router_output_window,
            timeout_cap: cfg.model.timeout(),
        }
    }

    /// Render the router prompt for the trailing window of `state`.
    pub fn render_prompt(&self, state: &RunState) -> Result<String> {
        self.prompts.build_router(&RouterPromptInputs {
            request: &state.request,
            completed: state.completed_window(self.history_window),
            outputs: state.output_window(self.output_window),
        })
    }

    /// Produce exactly one routing decision and apply it to `state`.
    ///
    /// With a pending failure the model is not consulted; control is handed to
    /// the resolver. An unparseable response fails with [`InvalidDecisionError`].
    #[instrument(skip_all, fields(run_id = %state.run_id, completed = state.completed_steps.len()))]
    pub fn route<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        state: &mut RunState,
        budget: &RunBudget,
    ) -> Result<DecisionTurn> {
        if state.failed {
            debug!("failure pending; handing off to resolver");
            state.begin_recovery();
            return Ok(DecisionTurn::without_model(
                DecisionSource::Router,
                Some(Target::Resolver),
            ));
        }

        let prompt = self.render_prompt(state)?;
        let request = ModelRequest {
            source: DecisionSource::Router,
            prompt,
            timeout: budget.call_timeout(self.timeout_cap)?,
        };
        let raw = model.complete(&request).context("router model call")?;

        let decision = parse_decision(&raw).map_err(|err| InvalidDecisionError {
            source: DecisionSource::Router,
            raw: raw.clone(),
            reason: err.to_string(),
        })?;
        let target = select_target(&decision.agent);
        match target {
            Some(Target::Executor(kind)) => {
                info!(executor = %kind, action = %decision.action, "router chose executor");
            }
            Some(Target::End) => info!("router declared the request complete"),
            Some(Target::Resolver) | None => {
                warn!(agent = %decision.agent, "router named no executor; asking again");
            }
        }
        apply_target(state, &decision, target);

        Ok(DecisionTurn {
            source: DecisionSource::Router,
            prompt: Some(request.prompt),
            response: Some(raw),
            decision: Some(decision),
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::core::types::ExecutorKind;
    use crate::test_support::{ScriptedModel, decision, end_decision};

    fn budget() -> RunBudget {
        RunBudget::new(10, Duration::from_secs(60))
    }

    fn router() -> Router {
        Router::new(&DelegatorConfig::default())
    }

    #[test]
    fn routes_to_storage_with_parameters_in_task() {
        let model = ScriptedModel::new([decision(
            "call_connector_agent",
            "Download a.csv from bucket B",
            json!({"bucket_name": "B", "filename": "a.csv"}),
        )]);
        let mut state = RunState::new("run-1", "download a.csv from bucket B");

        let turn = router().route(&model, &mut state, &budget()).expect("route");

        assert_eq!(turn.target, Some(Target::Executor(ExecutorKind::Storage)));
        assert_eq!(
            state.next_executor,
            Some(Target::Executor(ExecutorKind::Storage))
        );
        assert_eq!(
            state.next_action,
            r#"Download a.csv from bucket B with parameters {"bucket_name":"B","filename":"a.csv"}"#
        );
        assert!(model.prompts()[0].contains("download a.csv from bucket B"));
    }

    #[test]
    fn end_marks_state_terminal() {
        let model = ScriptedModel::new([end_decision()]);
        let mut state = RunState::new("run-1", "r");
        let turn = router().route(&model, &mut state, &budget()).expect("route");
        assert_eq!(turn.target, Some(Target::End));
        assert!(state.is_terminal());
    }

    #[test]
    fn pending_failure_skips_the_model() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let mut state = RunState::new("run-1", "r");
        state.record_failure("ERROR: file not found");

        let turn = router().route(&model, &mut state, &budget()).expect("route");

        assert_eq!(model.call_count(), 0);
        assert_eq!(turn.target, Some(Target::Resolver));
        assert!(turn.prompt.is_none());
        assert_eq!(state.next_action, "Resolve the error : ERROR: file not found");
    }

    #[test]
    fn unparseable_response_is_invalid_decision() {
        let model = ScriptedModel::new(["I think you should download the file."]);
        let mut state = RunState::new("run-1", "r");

        let err = router().route(&model, &mut state, &budget()).unwrap_err();
        let invalid = err
            .downcast_ref::<InvalidDecisionError>()
            .expect("invalid decision error");
        assert_eq!(invalid.source, DecisionSource::Router);
        assert_eq!(invalid.raw, "I think you should download the file.");
        assert_eq!(state.next_executor, None);
    }

    #[test]
    fn unknown_agent_leaves_no_target() {
        let model = ScriptedModel::new([decision("spreadsheet_agent", "do it", json!({}))]);
        let mut state = RunState::new("run-1", "r");
        let turn = router().route(&model, &mut state, &budget()).expect("route");
        assert_eq!(turn.target, None);
        assert_eq!(state.next_executor, None);
    }

    #[test]
    fn routing_is_idempotent_for_a_deterministic_model() {
        let response = decision("bigquery_agent", "Create dataset emp_data", json!({}));
        let model = ScriptedModel::new([response.clone(), response]);
        let base = RunState::new("run-1", "create dataset emp_data");

        let mut first = base.clone();
        let mut second = base.clone();
        router().route(&model, &mut first, &budget()).expect("first");
        router().route(&model, &mut second, &budget()).expect("second");

        assert_eq!(first, second);
        let prompts = model.prompts();
        assert_eq!(prompts[0], prompts[1]);
    }

    #[test]
    fn model_failure_is_not_an_invalid_decision() {
        let model = ScriptedModel::with_results([Err("connection refused".to_string())]);
        let mut state = RunState::new("run-1", "r");
        let err = router().route(&model, &mut state, &budget()).unwrap_err();
        assert!(err.downcast_ref::<InvalidDecisionError>().is_none());
        assert!(format!("{err:#}").contains("connection refused"));
    }
}
