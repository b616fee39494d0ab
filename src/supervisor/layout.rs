//! On-disk run directories
//!
//! `<root>/runs/<run_id>/` holds the frozen `config.yaml`, the append-only
//! `stdout.log`, and the trainer's `results/` checkpoint directory.

use crate::constants::layout::{CONFIG_FILE, LOG_FILE, RESULTS_NAME};
use crate::models::{RunPaths, RunSnapshot};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunLayout {
    runs_root: PathBuf,
}

impl RunLayout {
    pub fn new(runs_root: impl Into<PathBuf>) -> Self {
        Self {
            runs_root: runs_root.into(),
        }
    }

    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    /// Paths a run will own, without touching the filesystem
    pub fn paths_for(&self, run_id: Uuid) -> RunPaths {
        let run_dir = self.runs_root.join(run_id.to_string());
        RunPaths {
            config_path: run_dir.join(CONFIG_FILE),
            log_path: run_dir.join(LOG_FILE),
            // The trainer creates this itself; a pre-existing directory reads as a prior run
            artifacts_dir: run_dir.join(RESULTS_NAME),
            run_dir,
        }
    }

    /// Create the run directory and write the frozen configuration
    pub async fn prepare(&self, run_id: Uuid, snapshot: &RunSnapshot) -> std::io::Result<RunPaths> {
        let paths = self.paths_for(run_id);
        tokio::fs::create_dir_all(&paths.run_dir).await?;

        let yaml = serde_yaml::to_string(&snapshot.trainer_config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&paths.config_path, yaml).await?;

        debug!(
            run_id = %run_id,
            run_dir = %paths.run_dir.display(),
            "📁 LAYOUT: Prepared run directory"
        );
        Ok(paths)
    }
}
