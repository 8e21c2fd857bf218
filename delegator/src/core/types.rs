//! Shared deterministic types for the control loop.
//!
//! These types define stable contracts between the router, the resolver, the
//! executors and the loop. They do not depend on I/O and serialize to a stable
//! shape for run logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Agent name the model uses to signal that no more work remains.
pub const END_SENTINEL: &str = "END";

/// Black-box task handlers the loop can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Object storage transfer (download, upload, delete, list, create bucket).
    Storage,
    /// Tabular transformation (preview, generate and execute transformation code).
    Transform,
    /// Warehouse operations (datasets, tables, rows, queries, loads).
    Warehouse,
}

impl ExecutorKind {
    pub const ALL: [ExecutorKind; 3] = [
        ExecutorKind::Storage,
        ExecutorKind::Transform,
        ExecutorKind::Warehouse,
    ];

    /// Stable config/log key.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::Storage => "storage",
            ExecutorKind::Transform => "transform",
            ExecutorKind::Warehouse => "warehouse",
        }
    }

    /// Name advertised to the model in prompts.
    pub fn agent_name(self) -> &'static str {
        match self {
            ExecutorKind::Storage => "connector_agent",
            ExecutorKind::Transform => "smart_transformer_agent",
            ExecutorKind::Warehouse => "bigquery_agent",
        }
    }

    /// Substrings that route a model-chosen agent name to this executor.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            ExecutorKind::Storage => &["connector", "storage"],
            ExecutorKind::Transform => &["transformer", "transform"],
            ExecutorKind::Warehouse => &["bigquery", "warehouse"],
        }
    }

    /// Capability bullets rendered into the router prompt.
    pub fn capabilities(self) -> &'static [&'static str] {
        match self {
            ExecutorKind::Storage => &[
                "Download ONE file at a time from object storage into local storage",
                "Upload ONE file at a time to object storage from local storage",
                "Delete files from object storage",
                "Create new buckets",
                "List files in buckets",
            ],
            ExecutorKind::Transform => &[
                "Preview data files (CSV, Excel, JSON, Parquet)",
                "Understand user instructions for data transformations",
                "Generate and execute transformation code (filtering, aggregating, joining)",
                "Save transformed data to CSV, Excel, JSON or Parquet",
            ],
            ExecutorKind::Warehouse => &[
                "Create datasets and tables",
                "Insert rows into tables",
                "Query data",
                "Load data from object storage into warehouse tables",
            ],
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the loop hands control next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "executor", rename_all = "snake_case")]
pub enum Target {
    Executor(ExecutorKind),
    Resolver,
    End,
}

/// Parsed `{agent, action, parameters}` instruction from the router or resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub agent: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl RoutingDecision {
    pub fn end(action: impl Into<String>) -> Self {
        Self {
            agent: END_SENTINEL.to_string(),
            action: action.into(),
            parameters: Map::new(),
        }
    }

    /// Action text handed to an executor, with parameters serialized into it.
    pub fn task_description(&self) -> String {
        if self.parameters.is_empty() {
            return self.action.clone();
        }
        let params = Value::Object(self.parameters.clone());
        format!("{} with parameters {}", self.action.trim(), params)
    }
}

/// A successful dispatch, as recorded in the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub executor: ExecutorKind,
    pub action: String,
}

/// Raw output of a successful dispatch, tagged with the executor that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub executor: ExecutorKind,
    pub text: String,
}

impl ExecutorOutput {
    /// Text form used for prompts and similarity search (`agent: output`).
    pub fn render(&self) -> String {
        format!("{}: {}", self.executor.agent_name(), self.text.trim())
    }
}

/// Why an executor reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum FailureCode {
    /// The executor reported failure in-band (marker token or structured error).
    Reported,
    /// The executor process exited unsuccessfully.
    ExitStatus(i32),
    /// The executor exceeded its time budget.
    TimedOut,
}

/// Tagged executor result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutorResult {
    Success { output: String },
    Failure { code: FailureCode, message: String },
}

impl ExecutorResult {
    pub fn success(output: impl Into<String>) -> Self {
        ExecutorResult::Success {
            output: output.into(),
        }
    }

    pub fn reported_failure(message: impl Into<String>) -> Self {
        ExecutorResult::Failure {
            code: FailureCode::Reported,
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutorResult::Failure { .. })
    }

    /// Output on success, failure message otherwise.
    pub fn text(&self) -> &str {
        match self {
            ExecutorResult::Success { output } => output,
            ExecutorResult::Failure { message, .. } => message,
        }
    }
}

/// Which component produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Router,
    Resolver,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionSource::Router => f.write_str("router"),
            DecisionSource::Resolver => f.write_str("resolver"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_description_embeds_parameters() {
        let mut parameters = Map::new();
        parameters.insert("bucket".to_string(), json!("B"));
        let decision = RoutingDecision {
            agent: "connector_agent".to_string(),
            action: "download a.csv".to_string(),
            parameters,
        };
        assert_eq!(
            decision.task_description(),
            r#"download a.csv with parameters {"bucket":"B"}"#
        );
    }

    #[test]
    fn task_description_without_parameters_is_action() {
        let decision = RoutingDecision::end("done");
        assert_eq!(decision.task_description(), "done");
    }

    #[test]
    fn executor_result_serializes_tagged() {
        let result = ExecutorResult::Failure {
            code: FailureCode::ExitStatus(2),
            message: "boom".to_string(),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            value,
            json!({"status": "failure", "code": {"kind": "exit_status", "code": 2}, "message": "boom"})
        );
    }
}
