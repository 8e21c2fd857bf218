//! Initialization helpers for `.delegator/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DelegatorConfig, write_config};

/// Canonical paths within `.delegator/` for a project root.
#[derive(Debug, Clone)]
pub struct DelegatorPaths {
    pub root: PathBuf,
    pub delegator_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl DelegatorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let delegator_dir = root.join(".delegator");
        Self {
            root,
            config_path: delegator_dir.join("config.toml"),
            gitignore_path: delegator_dir.join(".gitignore"),
            delegator_dir,
        }
    }

    /// Resolve the configured runs directory against the project root.
    pub fn runs_dir(&self, cfg: &DelegatorConfig) -> PathBuf {
        let runs = Path::new(&cfg.runs_dir);
        if runs.is_absolute() {
            runs.to_path_buf()
        } else {
            self.root.join(runs)
        }
    }
}

/// Options for `init_delegator`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
}

/// Create `.delegator/` with a default config in `root`.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_delegator(root: &Path, options: &InitOptions) -> Result<DelegatorPaths> {
    let paths = DelegatorPaths::new(root);
    if paths.delegator_dir.exists() && !paths.delegator_dir.is_dir() {
        return Err(anyhow!(
            "delegator init: .delegator exists but is not a directory"
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "delegator init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.delegator_dir)
        .with_context(|| format!("create directory {}", paths.delegator_dir.display()))?;
    write_config(&paths.config_path, &DelegatorConfig::default())?;
    fs::write(&paths.gitignore_path, DELEGATOR_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;

    Ok(paths)
}

const DELEGATOR_GITIGNORE: &str = "runs/\n";
