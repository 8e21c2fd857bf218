//! Starting a new run.
//!
//! A run is one pass of the control loop over a single request, identified by
//! a `run_id` that also names its log directory under `runs_dir`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::core::state::RunState;

/// Create the initial state for `request`, with a run id unused in `runs_dir`.
pub fn start_run(runs_dir: &Path, request: &str) -> Result<RunState> {
    let request = request.trim();
    if request.is_empty() {
        return Err(anyhow!("request must not be empty"));
    }
    let run_id = generate_run_id(runs_dir, request)?;
    info!(run_id = %run_id, "run started");
    Ok(RunState::new(run_id, request))
}

fn generate_run_id(runs_dir: &Path, request: &str) -> Result<String> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(request.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    let base = format!("run-{}", &digest[..8]);

    // Ensure uniqueness against existing run log directories.
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        if !runs_dir.join(&id).exists() {
            debug!(run_id = %id, "generated run id");
            return Ok(id);
        }
    }

    Err(anyhow!(
        "unable to generate unique run id from base '{base}' (too many existing runs)"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_trims_request_and_assigns_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = start_run(temp.path(), "  download a.csv from bucket B\n").expect("start");

        assert_eq!(state.request, "download a.csv from bucket B");
        assert!(state.run_id.starts_with("run-"));
        assert_eq!(state.run_id.len(), "run-".len() + 8);
        assert!(state.completed_steps.is_empty());
        assert!(!state.failed);
    }

    #[test]
    fn empty_request_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(start_run(temp.path(), "   ").is_err());
    }

    #[test]
    fn run_id_avoids_existing_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        for _ in 0..5 {
            let id = generate_run_id(temp.path(), "same request").expect("id");
            assert!(!temp.path().join(&id).exists());
            std::fs::create_dir(temp.path().join(&id)).expect("mkdir");
        }
    }
}
