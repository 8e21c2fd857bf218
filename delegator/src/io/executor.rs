//! Executor abstraction for task dispatch.
//!
//! The [`TaskExecutor`] trait decouples the control loop from the storage,
//! transform and warehouse backends. [`CommandExecutors`] runs one configured
//! command per executor kind with the task description on stdin. Tests use
//! scripted executors that return predetermined results without spawning
//! processes.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::classify_output;
use crate::core::types::{ExecutorKind, ExecutorResult, FailureCode};
use crate::io::config::{CommandConfig, DelegatorConfig};
use crate::io::process::{Exit, run_piped};

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Natural-language task with parameters serialized into it.
    pub task: String,
    /// Maximum time to wait for the executor.
    pub timeout: Duration,
}

/// Abstraction over executor backends.
///
/// `Err` is reserved for failures to run the executor at all (spawn, I/O);
/// those abort the run. Failures the executor reports are returned as
/// [`ExecutorResult::Failure`] and go through recovery.
pub trait TaskExecutor {
    fn invoke(&self, kind: ExecutorKind, request: &TaskRequest) -> Result<ExecutorResult>;

    /// Cap applied to the per-call timeout for `kind`.
    fn timeout_cap(&self, _kind: ExecutorKind) -> Duration {
        Duration::from_secs(10 * 60)
    }
}

/// Executors backed by configured commands.
#[derive(Debug, Clone)]
pub struct CommandExecutors {
    commands: BTreeMap<ExecutorKind, CommandConfig>,
    failure_marker: String,
}

impl CommandExecutors {
    pub fn from_config(cfg: &DelegatorConfig) -> Result<Self> {
        let mut commands = BTreeMap::new();
        for kind in ExecutorKind::ALL {
            let command = cfg
                .executor(kind)
                .ok_or_else(|| anyhow!("missing [executors.{kind}] section"))?;
            commands.insert(kind, command.clone());
        }
        Ok(Self {
            commands,
            failure_marker: cfg.failure_marker.clone(),
        })
    }

    fn command(&self, kind: ExecutorKind) -> Result<&CommandConfig> {
        self.commands
            .get(&kind)
            .ok_or_else(|| anyhow!("no command configured for executor {kind}"))
    }
}

impl TaskExecutor for CommandExecutors {
    #[instrument(skip_all, fields(executor = %kind, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, kind: ExecutorKind, request: &TaskRequest) -> Result<ExecutorResult> {
        let config = self.command(kind)?;
        info!(program = ?config.command.first(), "dispatching task");
        let run = run_piped(config, request.task.as_bytes(), request.timeout)
            .with_context(|| format!("run {kind} executor"))?;

        if run.exit == Exit::TimedOut {
            warn!(timeout_secs = request.timeout.as_secs(), "executor timed out");
            return Ok(ExecutorResult::Failure {
                code: FailureCode::TimedOut,
                message: format!("ERROR: {kind} executor timed out after {:?}", request.timeout),
            });
        }
        if !run.succeeded() {
            let code = run.exit_code().unwrap_or(-1);
            warn!(exit_code = code, "executor exited unsuccessfully");
            return Ok(ExecutorResult::Failure {
                code: FailureCode::ExitStatus(code),
                message: format!(
                    "ERROR: {kind} executor exited with status {code}: {}",
                    run.failure_text()
                ),
            });
        }

        let result = classify_output(&run.stdout.text(), &self.failure_marker);
        debug!(failed = result.is_failure(), "executor finished");
        Ok(result)
    }

    fn timeout_cap(&self, kind: ExecutorKind) -> Duration {
        self.commands
            .get(&kind)
            .map(CommandConfig::timeout)
            .unwrap_or(Duration::from_secs(10 * 60))
    }
}
