//! # Orchestrator Configuration
//!
//! YAML-based configuration with environment overlays and `RUNFORGE_*`
//! environment-variable overrides. Every operational threshold the engine
//! uses (stop grace period, liveness probe, stuck-detection thresholds, plugin
//! polling) lives here rather than in code.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runforge_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_directory_with_env(Some("config".into()), "test")?;
//! let grace = manager.config().supervisor.stop_grace_period();
//! # let _ = grace;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::invocation::{DEFAULT_TRAINER_PROGRAM, FORCE_FLAG, RESUME_FLAG};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Environment the configuration was loaded for
    pub environment: String,
    pub workspace: WorkspaceConfig,
    pub supervisor: SupervisorConfig,
    pub health: HealthConfig,
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Runs live under `<root>/runs/<run_id>/`
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Trainer executable used when a snapshot does not name one
    pub trainer_program: String,
    pub stop_grace_period_seconds: u64,
    /// How long to wait for exit after a forced kill
    pub kill_wait_seconds: u64,
    /// Interval at which the watcher confirms the exit status is still observable
    pub supervision_ceiling_seconds: Option<u64>,
    pub liveness: LivenessConfig,
    pub resume_flag: String,
    pub force_flag: String,
    pub ports: PortConfig,
    /// Extra environment for every spawned trainer
    pub extra_env: BTreeMap<String, String>,
}

impl SupervisorConfig {
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period_seconds)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_secs(self.kill_wait_seconds)
    }

    pub fn supervision_ceiling(&self) -> Option<Duration> {
        self.supervision_ceiling_seconds.map(Duration::from_secs)
    }
}

/// Definition of "responding" for the starting → running probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// The process must survive at least this long
    pub initial_delay_ms: u64,
    /// Re-check interval until the probe succeeds
    pub poll_interval_ms: u64,
    /// Also require output beyond the supervisor's log header
    pub require_log_output: bool,
}

impl LivenessConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub base: u16,
    /// Gap kept between the ranges of different live runs
    pub spacing: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Log silence tolerated while a run is still starting
    pub startup_silence_threshold_seconds: u64,
    /// Log silence tolerated once a run is running
    pub steady_silence_threshold_seconds: u64,
    /// Runs younger than this are never stuck
    pub min_grace_period_seconds: u64,
    pub sampling_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub completion_poll_interval_ms: u64,
    pub default_completion_timeout_minutes: u64,
    pub execution_retention_hours: u64,
}

impl PluginsConfig {
    pub fn completion_poll_interval(&self) -> Duration {
        Duration::from_millis(self.completion_poll_interval_ms)
    }

    pub fn default_completion_timeout(&self) -> Duration {
        Duration::from_secs(self.default_completion_timeout_minutes * 60)
    }

    pub fn execution_retention(&self) -> Duration {
        Duration::from_secs(self.execution_retention_hours * 3600)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for JSON log files; console only when unset
    pub directory: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            workspace: WorkspaceConfig::default(),
            supervisor: SupervisorConfig::default(),
            health: HealthConfig::default(),
            plugins: PluginsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspace"),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            trainer_program: DEFAULT_TRAINER_PROGRAM.to_string(),
            stop_grace_period_seconds: 30,
            kill_wait_seconds: 10,
            supervision_ceiling_seconds: None,
            liveness: LivenessConfig::default(),
            resume_flag: RESUME_FLAG.to_string(),
            force_flag: FORCE_FLAG.to_string(),
            ports: PortConfig::default(),
            extra_env: BTreeMap::new(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            poll_interval_ms: 1_000,
            require_log_output: false,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            base: 5000,
            spacing: 10,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            startup_silence_threshold_seconds: 300,
            steady_silence_threshold_seconds: 120,
            min_grace_period_seconds: 120,
            sampling_interval_seconds: 30,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            completion_poll_interval_ms: 10_000,
            default_completion_timeout_minutes: 60,
            execution_retention_hours: 24,
        }
    }
}

impl OrchestratorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.supervisor.trainer_program.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "supervisor.trainer_program",
                "",
                "trainer program must not be empty",
            ));
        }

        if self.supervisor.resume_flag == self.supervisor.force_flag {
            return Err(ConfigurationError::invalid_value(
                "supervisor.force_flag",
                self.supervisor.force_flag.clone(),
                "resume and force flags must differ",
            ));
        }

        if self.supervisor.liveness.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "supervisor.liveness.poll_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }

        if self.supervisor.ports.base == 0 {
            return Err(ConfigurationError::invalid_value(
                "supervisor.ports.base",
                "0",
                "must be greater than 0",
            ));
        }

        if let Some(0) = self.supervisor.supervision_ceiling_seconds {
            return Err(ConfigurationError::invalid_value(
                "supervisor.supervision_ceiling_seconds",
                "0",
                "must be greater than 0 when set",
            ));
        }

        let health = &self.health;
        if health.steady_silence_threshold_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.steady_silence_threshold_seconds",
                "0",
                "must be greater than 0",
            ));
        }

        // Startup is expected to be log-silent for longer than steady state
        if health.startup_silence_threshold_seconds <= health.steady_silence_threshold_seconds {
            return Err(ConfigurationError::invalid_value(
                "health.startup_silence_threshold_seconds",
                health.startup_silence_threshold_seconds.to_string(),
                format!(
                    "must be greater than health.steady_silence_threshold_seconds ({})",
                    health.steady_silence_threshold_seconds
                ),
            ));
        }

        if self.plugins.completion_poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "plugins.completion_poll_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn is_test_environment(&self) -> bool {
        self.environment == "test"
    }

    pub fn is_production_environment(&self) -> bool {
        self.environment == "production"
    }

    /// Directory holding every run directory
    pub fn runs_root(&self) -> PathBuf {
        self.workspace.root.join(crate::constants::layout::RUNS_DIR)
    }
}
