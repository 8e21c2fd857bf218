//! Delegator configuration stored under `.delegator/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::ExecutorKind;

/// What the resolver does with a failure on the very first step, when there
/// are no prior outputs to draw context from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirstFailurePolicy {
    /// Ask the model anyway, with an empty context section.
    Resolve,
    /// End the run as unresolvable.
    Terminate,
    /// Clear the failure and let the router make a fresh attempt.
    Reroute,
}

/// What happens when the resolver's model call or response parsing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverFailurePolicy {
    /// Force `END`; the run stops as unresolvable.
    Terminate,
    /// Abort the run with an invalid-decision error, like the router.
    Fail,
}

/// Delegator configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelegatorConfig {
    /// Maximum number of loop transitions before the run is exhausted.
    pub max_steps: u32,

    /// Total wall-clock budget for a run, in seconds.
    pub run_timeout_secs: u64,

    /// Completed steps shown to the router.
    pub router_history_window: usize,

    /// Executor outputs shown to the router.
    pub router_output_window: usize,

    /// Similar prior outputs handed to the resolver.
    pub resolver_top_k: usize,

    pub first_failure: FirstFailurePolicy,

    pub resolver_failure: ResolverFailurePolicy,

    /// Maximum bytes for a rendered prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    /// Token whose presence in unstructured executor output signals failure.
    pub failure_marker: String,

    /// Where run logs are written, relative to the working directory.
    pub runs_dir: String,

    pub model: CommandConfig,

    /// Executor commands keyed by `storage`, `transform`, `warehouse`.
    pub executors: BTreeMap<String, CommandConfig>,
}

/// An external command invoked with its input on stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Program and arguments (e.g. `["llm", "-m", "gpt-4o-mini"]`).
    pub command: Vec<String>,
    /// Per-invocation timeout in seconds (further capped by the run budget).
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl CommandConfig {
    fn with_command(program: &str) -> Self {
        Self {
            command: vec![program.to_string()],
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, label: &str) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(anyhow!("{label}.command must be a non-empty array"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("{label}.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("{label}.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

impl Default for DelegatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 40,
            run_timeout_secs: 30 * 60,
            router_history_window: 5,
            router_output_window: 2,
            resolver_top_k: 2,
            first_failure: FirstFailurePolicy::Resolve,
            resolver_failure: ResolverFailurePolicy::Terminate,
            prompt_budget_bytes: 40_000,
            failure_marker: "ERROR".to_string(),
            runs_dir: ".delegator/runs".to_string(),
            model: CommandConfig {
                command: vec!["llm".to_string(), "-m".to_string(), "gpt-4o-mini".to_string()],
                timeout_secs: 5 * 60,
                output_limit_bytes: 200_000,
            },
            executors: BTreeMap::from([
                (
                    ExecutorKind::Storage.as_str().to_string(),
                    CommandConfig::with_command("storage-agent"),
                ),
                (
                    ExecutorKind::Transform.as_str().to_string(),
                    CommandConfig::with_command("transform-agent"),
                ),
                (
                    ExecutorKind::Warehouse.as_str().to_string(),
                    CommandConfig::with_command("warehouse-agent"),
                ),
            ]),
        }
    }
}

impl DelegatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.failure_marker.trim().is_empty() {
            return Err(anyhow!("failure_marker must not be empty"));
        }
        self.model.validate("model")?;
        for kind in ExecutorKind::ALL {
            let executor = self
                .executor(kind)
                .ok_or_else(|| anyhow!("missing [executors.{kind}] section"))?;
            executor.validate(&format!("executors.{kind}"))?;
        }
        for name in self.executors.keys() {
            if !ExecutorKind::ALL.iter().any(|kind| kind.as_str() == name.as_str()) {
                return Err(anyhow!("unknown executor [executors.{name}]"));
            }
        }
        Ok(())
    }

    /// Command settings for one executor.
    pub fn executor(&self, kind: ExecutorKind) -> Option<&CommandConfig> {
        self.executors.get(kind.as_str())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DelegatorConfig::default()`.
pub fn load_config(path: &Path) -> Result<DelegatorConfig> {
    if !path.exists() {
        let cfg = DelegatorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DelegatorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DelegatorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
