//! Language model abstraction.
//!
//! The [`LanguageModel`] trait decouples routing and recovery from the model
//! backend. [`CommandModel`] pipes the prompt into a configured CLI (any tool
//! that reads a prompt on stdin and prints the completion). Tests use scripted
//! models that return predetermined responses.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::DecisionSource;
use crate::io::config::CommandConfig;
use crate::io::process::{Exit, run_piped};

/// Parameters for a single model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Which component is asking.
    pub source: DecisionSource,
    /// Fully rendered prompt.
    pub prompt: String,
    /// Maximum time to wait for the completion.
    pub timeout: Duration,
}

/// Abstraction over language model backends.
pub trait LanguageModel {
    /// Return the raw completion text for `request.prompt`.
    fn complete(&self, request: &ModelRequest) -> Result<String>;
}

/// Model backend that spawns a configured command.
#[derive(Debug, Clone)]
pub struct CommandModel {
    config: CommandConfig,
}

impl CommandModel {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(source = %request.source, timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        info!(program = ?self.config.command.first(), "invoking model");
        let run = run_piped(&self.config, request.prompt.as_bytes(), request.timeout)
            .context("run model command")?;

        if run.exit == Exit::TimedOut {
            warn!(timeout_secs = request.timeout.as_secs(), "model timed out");
            return Err(anyhow!("model timed out after {:?}", request.timeout));
        }
        if !run.succeeded() {
            warn!(exit_code = ?run.exit_code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                run.exit_code(),
                run.failure_text()
            ));
        }

        let response = run.stdout.text();
        debug!(bytes = response.len(), "model responded");
        Ok(response)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            source: DecisionSource::Router,
            prompt: "route this".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    fn model(script: &str) -> CommandModel {
        CommandModel::new(CommandConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            ..CommandConfig::default()
        })
    }

    #[test]
    fn returns_stdout_of_command() {
        let response = model("cat >/dev/null; echo '{\"agent\": \"END\"}'")
            .complete(&request())
            .expect("complete");
        assert_eq!(response.trim(), r#"{"agent": "END"}"#);
    }

    #[test]
    fn prompt_is_written_to_stdin() {
        let response = model("cat").complete(&request()).expect("complete");
        assert_eq!(response, "route this");
    }

    #[test]
    fn failing_command_is_an_error() {
        let err = model("echo nope >&2; exit 3")
            .complete(&request())
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("Some(3)"), "{msg}");
        assert!(msg.contains("nope"), "{msg}");
    }
}
