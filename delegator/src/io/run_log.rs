//! Run log artifacts under `<runs_dir>/<run_id>/`.
//!
//! Each step gets its own directory with `meta.json` plus whichever of
//! `prompt.md`, `response.txt` and `executor_output.txt` apply. The final run
//! state and outcome are written atomically once the loop stops.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::machine::Phase;
use crate::core::state::RunState;
use crate::core::types::{DecisionSource, ExecutorResult, RoutingDecision, Target};

/// Per-step metadata (`meta.json`).
#[derive(Debug, Clone, Serialize)]
pub struct StepMeta {
    pub run_id: String,
    pub step: u32,
    pub phase: Phase,
    pub next_phase: Phase,
    pub source: Option<DecisionSource>,
    pub decision: Option<RoutingDecision>,
    pub target: Option<Target>,
    pub executor_result: Option<ExecutorResult>,
    pub failed_after: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StepPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub executor_output_path: PathBuf,
}

impl StepPaths {
    pub fn new(run_dir: &Path, step: u32) -> Self {
        let dir = run_dir.join(step.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.txt"),
            executor_output_path: dir.join("executor_output.txt"),
        }
    }
}

/// Artifacts of one step.
pub struct StepRecord<'a> {
    pub meta: &'a StepMeta,
    pub prompt: Option<&'a str>,
    pub response: Option<&'a str>,
    pub executor_output: Option<&'a str>,
}

/// Writer for one run's log directory.
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        Self {
            dir: runs_dir.join(run_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.dir.join("run_state.json")
    }

    pub fn outcome_path(&self) -> PathBuf {
        self.dir.join("outcome.json")
    }

    pub fn write_step(&self, record: &StepRecord<'_>) -> Result<StepPaths> {
        let paths = StepPaths::new(&self.dir, record.meta.step);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create step dir {}", paths.dir.display()))?;

        // Write in deterministic order to keep logs stable.
        write_json(&paths.meta_path, record.meta)?;
        if let Some(prompt) = record.prompt {
            write_text(&paths.prompt_path, prompt)?;
        }
        if let Some(response) = record.response {
            write_text(&paths.response_path, response)?;
        }
        if let Some(output) = record.executor_output {
            write_text(&paths.executor_output_path, output)?;
        }
        debug!(step = record.meta.step, dir = %paths.dir.display(), "wrote step log");
        Ok(paths)
    }

    /// Write the final `run_state.json` and `outcome.json`.
    pub fn write_final<O: Serialize>(&self, state: &RunState, outcome: &O) -> Result<()> {
        write_json_atomic(&self.run_state_path(), state)?;
        write_json_atomic(&self.outcome_path(), outcome)?;
        debug!(run_id = %state.run_id, dir = %self.dir.display(), "wrote run outcome");
        Ok(())
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

/// Atomically write JSON to disk (temp file + rename).
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("run log path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::Halt;
    use crate::core::types::ExecutorKind;

    fn meta(step: u32) -> StepMeta {
        StepMeta {
            run_id: "run-1".to_string(),
            step,
            phase: Phase::Routing,
            next_phase: Phase::Dispatch(ExecutorKind::Storage),
            source: Some(DecisionSource::Router),
            decision: Some(RoutingDecision {
                agent: "connector_agent".to_string(),
                action: "Download a.csv".to_string(),
                parameters: serde_json::Map::new(),
            }),
            target: Some(Target::Executor(ExecutorKind::Storage)),
            executor_result: None,
            failed_after: false,
            duration_ms: 12,
        }
    }

    #[test]
    fn step_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::new(temp.path(), "run-1");
        let paths = StepPaths::new(log.dir(), 3);

        assert!(paths.dir.ends_with(Path::new("run-1/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.response_path.ends_with("response.txt"));
        assert!(paths.executor_output_path.ends_with("executor_output.txt"));
    }

    #[test]
    fn writes_only_present_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::new(temp.path(), "run-1");
        let meta = meta(1);

        let paths = log
            .write_step(&StepRecord {
                meta: &meta,
                prompt: Some("prompt"),
                response: Some("{'agent': 'connector_agent'}"),
                executor_output: None,
            })
            .expect("write step");

        assert!(paths.meta_path.is_file());
        assert_eq!(fs::read_to_string(&paths.prompt_path).expect("read"), "prompt");
        assert!(paths.response_path.is_file());
        assert!(!paths.executor_output_path.exists());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("parse meta");
        assert_eq!(json["phase"]["phase"], "routing");
        assert_eq!(json["next_phase"]["detail"], "storage");
        assert_eq!(json["target"]["executor"], "storage");
    }

    #[test]
    fn final_artifacts_are_written() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::new(temp.path(), "run-1");
        let state = RunState::new("run-1", "download a.csv");

        log.write_final(&state, &Phase::Terminal(Halt::Completed))
            .expect("write final");

        let loaded: RunState =
            serde_json::from_str(&fs::read_to_string(log.run_state_path()).expect("read"))
                .expect("parse");
        assert_eq!(loaded, state);
        assert!(log.outcome_path().is_file());
        assert!(!log.dir().join("run_state.json.tmp").exists());
    }
}
