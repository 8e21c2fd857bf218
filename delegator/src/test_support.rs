//! Scripted model and executor doubles plus temp workspaces for tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::core::types::{DecisionSource, ExecutorKind, ExecutorResult};
use crate::io::config::{CommandConfig, DelegatorConfig, write_config};
use crate::io::executor::{TaskExecutor, TaskRequest};
use crate::io::init::DelegatorPaths;
use crate::io::model::{LanguageModel, ModelRequest};

/// Model that replays queued responses and records every prompt it was given.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: RefCell<VecDeque<Result<String, String>>>,
    calls: RefCell<Vec<(DecisionSource, String)>>,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self::with_results(responses.into_iter().map(|r| Ok(r.into())))
    }

    /// Queue responses where `Err(message)` makes the call itself fail.
    pub fn with_results(results: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            responses: RefCell::new(results.into_iter().collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Prompts received, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn sources(&self) -> Vec<DecisionSource> {
        self.calls.borrow().iter().map(|(s, _)| *s).collect()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.calls
            .borrow_mut()
            .push((request.source, request.prompt.clone()));
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted model has no responses left")),
        }
    }
}

/// Executor that replays queued results and records every task it was handed.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    results: RefCell<VecDeque<ExecutorResult>>,
    calls: RefCell<Vec<(ExecutorKind, String)>>,
}

impl ScriptedExecutor {
    pub fn new(results: impl IntoIterator<Item = ExecutorResult>) -> Self {
        Self {
            results: RefCell::new(results.into_iter().collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(ExecutorKind, String)> {
        self.calls.borrow().clone()
    }
}

impl TaskExecutor for ScriptedExecutor {
    fn invoke(&self, kind: ExecutorKind, request: &TaskRequest) -> Result<ExecutorResult> {
        self.calls.borrow_mut().push((kind, request.task.clone()));
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted executor has no results left"))
    }
}

/// JSON routing decision as a model would print it.
pub fn decision(agent: &str, action: &str, parameters: serde_json::Value) -> String {
    serde_json::json!({
        "agent": agent,
        "action": action,
        "parameters": parameters,
    })
    .to_string()
}

/// The `END` decision a router emits when the request is complete.
pub fn end_decision() -> String {
    decision("END", "The task has been completed.", serde_json::json!({}))
}

/// `sh -c <script>` command config.
pub fn sh_command(script: &str) -> CommandConfig {
    CommandConfig {
        command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        timeout_secs: 30,
        ..CommandConfig::default()
    }
}

/// Temporary project root with a written `.delegator/config.toml`.
pub struct TestWorkspace {
    temp: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new(cfg: &DelegatorConfig) -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp workspace")?;
        write_config(&DelegatorPaths::new(temp.path()).config_path, cfg)?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> DelegatorPaths {
        DelegatorPaths::new(self.root())
    }

    /// Run log directory for `run_id` under the default `runs_dir`.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root().join(".delegator").join("runs").join(run_id)
    }
}

/// Config whose model and executors are shell scripts.
pub fn scripted_config(model_script: &str, executor_script: &str) -> DelegatorConfig {
    let mut cfg = DelegatorConfig {
        model: sh_command(model_script),
        ..DelegatorConfig::default()
    };
    for kind in ExecutorKind::ALL {
        cfg.executors
            .insert(kind.as_str().to_string(), sh_command(executor_script));
    }
    cfg
}
