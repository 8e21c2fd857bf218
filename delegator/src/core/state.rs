//! Run state threaded through the control loop.
//!
//! One [`RunState`] is owned by one run. Mutation happens only through the
//! methods below so the failure invariants hold after every transition.

use serde::{Deserialize, Serialize};

use crate::core::types::{CompletedStep, ExecutorKind, ExecutorOutput, Target};

/// Mutable record of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Identifier for this run.
    pub run_id: String,
    /// Original natural-language goal.
    pub request: String,
    /// Successful dispatches, oldest first.
    pub completed_steps: Vec<CompletedStep>,
    /// Outputs of successful dispatches, oldest first.
    pub recent_outputs: Vec<ExecutorOutput>,
    /// Where control goes after the current phase.
    pub next_executor: Option<Target>,
    /// Task description for the next dispatch.
    pub next_action: String,
    /// True while the last dispatch failed and has not been resolved.
    pub failed: bool,
    /// Raw failure message of the unresolved dispatch; empty otherwise.
    pub failure_detail: String,
    /// Most recent failure message, kept after resolution for reporting.
    pub last_failure: Option<String>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            request: request.into(),
            completed_steps: Vec::new(),
            recent_outputs: Vec::new(),
            next_executor: None,
            next_action: String::new(),
            failed: false,
            failure_detail: String::new(),
            last_failure: None,
        }
    }

    /// True once a router or resolver decided there is no more work.
    pub fn is_terminal(&self) -> bool {
        self.next_executor == Some(Target::End)
    }

    /// Record a successful dispatch of `next_action` to `executor`.
    pub fn record_success(&mut self, executor: ExecutorKind, output: impl Into<String>) {
        self.completed_steps.push(CompletedStep {
            executor,
            action: self.next_action.clone(),
        });
        self.recent_outputs.push(ExecutorOutput {
            executor,
            text: output.into(),
        });
        self.failed = false;
        self.failure_detail.clear();
    }

    /// Record a failed dispatch. History is left untouched.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        let mut message = message.into();
        if message.is_empty() {
            message = "executor reported failure without a message".to_string();
        }
        self.failed = true;
        self.last_failure = Some(message.clone());
        self.failure_detail = message;
    }

    /// Hand the unresolved failure to the resolver without consulting the model.
    pub fn begin_recovery(&mut self) {
        self.next_executor = Some(Target::Resolver);
        self.next_action = format!("Resolve the error : {}", self.failure_detail);
    }

    /// Mark the current failure as handled.
    pub fn clear_failure(&mut self) {
        self.failed = false;
        self.failure_detail.clear();
    }

    /// Apply a routing decision.
    pub fn set_next(&mut self, target: Target, action: impl Into<String>) {
        self.next_executor = Some(target);
        self.next_action = action.into();
    }

    /// Forget the pending target so the router decides afresh.
    pub fn clear_next(&mut self) {
        self.next_executor = None;
    }

    /// Trailing window of completed steps.
    pub fn completed_window(&self, n: usize) -> &[CompletedStep] {
        let start = self.completed_steps.len().saturating_sub(n);
        &self.completed_steps[start..]
    }

    /// Trailing window of executor outputs.
    pub fn output_window(&self, n: usize) -> &[ExecutorOutput] {
        let start = self.recent_outputs.len().saturating_sub(n);
        &self.recent_outputs[start..]
    }

    /// Check failure/history invariants. Returns human-readable violations.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.failed != !self.failure_detail.is_empty() {
            errors.push(format!(
                "failed={} but failure_detail is {}",
                self.failed,
                if self.failure_detail.is_empty() {
                    "empty"
                } else {
                    "set"
                }
            ));
        }
        if self.completed_steps.len() != self.recent_outputs.len() {
            errors.push(format!(
                "completed_steps ({}) and recent_outputs ({}) diverged",
                self.completed_steps.len(),
                self.recent_outputs.len()
            ));
        }
        for (idx, (step, output)) in self
            .completed_steps
            .iter()
            .zip(&self.recent_outputs)
            .enumerate()
        {
            if step.executor != output.executor {
                errors.push(format!(
                    "step {idx}: executor {} does not match output executor {}",
                    step.executor, output.executor
                ));
            }
        }
        errors
    }
}
