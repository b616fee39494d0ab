use crate::config::HealthConfig;
use crate::state_machine::RunState;

/// Which silence threshold applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPhase {
    /// Environment loading; long silences are normal
    Startup,
    /// Training; the trainer logs regularly
    Steady,
}

impl HealthPhase {
    pub fn for_state(state: RunState) -> Option<Self> {
        match state {
            RunState::Starting => Some(Self::Startup),
            RunState::Running => Some(Self::Steady),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub stuck: bool,
    pub reason: String,
}

/// Stuck-detection thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub startup_silence_seconds: u64,
    pub steady_silence_seconds: u64,
    pub min_grace_seconds: u64,
}

impl HealthPolicy {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            startup_silence_seconds: config.startup_silence_threshold_seconds,
            steady_silence_seconds: config.steady_silence_threshold_seconds,
            min_grace_seconds: config.min_grace_period_seconds,
        }
    }

    pub fn silence_threshold(&self, phase: HealthPhase) -> u64 {
        match phase {
            HealthPhase::Startup => self.startup_silence_seconds,
            HealthPhase::Steady => self.steady_silence_seconds,
        }
    }

    /// Classify a live run; never stuck inside the grace period
    pub fn classify(&self, phase: HealthPhase, runtime_seconds: u64, silence_seconds: u64) -> Verdict {
        let threshold = self.silence_threshold(phase);

        if runtime_seconds <= self.min_grace_seconds {
            return Verdict {
                stuck: false,
                reason: format!(
                    "Within grace period ({runtime_seconds}s of {}s)",
                    self.min_grace_seconds
                ),
            };
        }

        if silence_seconds > threshold {
            Verdict {
                stuck: true,
                reason: format!(
                    "No log output for {silence_seconds}s (threshold {threshold}s, runtime {runtime_seconds}s)"
                ),
            }
        } else {
            Verdict {
                stuck: false,
                reason: format!("Last log output {silence_seconds}s ago"),
            }
        }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}
