//! Configuration Loader
//!
//! Environment-aware loading: base YAML file, optional environment overlay,
//! then `RUNFORGE_*` variable overrides, then validation.

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_NAMES: [&str; 2] = ["orchestrator.yaml", "orchestrator.yml"];
const ENVIRONMENTS_DIR: &str = "environments";
const KNOWN_ENVIRONMENTS: [&str; 3] = ["development", "test", "production"];
const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB limit

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, |key| env::var(key).ok())
    }

    /// Load configuration resolving `RUNFORGE_*` overrides through `lookup`
    pub fn load_with_overrides<F>(
        config_dir: Option<PathBuf>,
        environment: &str,
        lookup: F,
    ) -> ConfigResult<Arc<ConfigManager>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment)?;
        apply_env_overrides(&mut config, lookup)?;

        // Validate the loaded configuration
        config.validate()?;

        // Use sanitized configuration for logging to avoid exposing sensitive information
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = %environment,
            workspace = %config.workspace.root.display(),
            trainer = %config.supervisor.trainer_program,
            "🔧 CONFIG: Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            config_directory: PathBuf::new(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get sanitized configuration for debugging/logging that masks sensitive fields
    pub fn debug_config(&self) -> serde_json::Value {
        sanitize_config_for_logging(&self.config)
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("RUNFORGE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Find the configuration file
    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Load and merge configuration with environment-specific overrides
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<OrchestratorConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let mut yaml_data = read_yaml(&config_file)?;

        // Inline environment section in the base file
        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!("Applying inline overrides for: {}", environment);
            merge_yaml_values(&mut yaml_data, env_overrides)?;
        }

        // Remove environment sections to avoid confusion
        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for name in KNOWN_ENVIRONMENTS {
                map.remove(YamlValue::String(name.to_string()));
            }
        }

        // Overlay file
        let overlay_path = config_directory
            .join(ENVIRONMENTS_DIR)
            .join(format!("{environment}.yaml"));
        if overlay_path.exists() {
            debug!("Applying environment overlay: {}", overlay_path.display());
            let overlay = read_yaml(&overlay_path)?;
            merge_yaml_values(&mut yaml_data, overlay)?;
        }

        let mut config: OrchestratorConfig = serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("Failed to deserialize configuration: {e}"),
            )
        })?;

        // Ensure environment is set correctly
        config.environment = environment.to_string();

        Ok(config)
    }
}

/// Safely read a configuration file with resource management and size limits
fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigurationError::invalid_value(
            "file_size",
            metadata.len().to_string(),
            format!(
                "Configuration file too large ({}MB > {}MB limit)",
                metadata.len() / (1024 * 1024),
                MAX_CONFIG_FILE_SIZE / (1024 * 1024)
            ),
        ));
    }

    if !metadata.is_file() {
        return Err(ConfigurationError::invalid_value(
            "file_type",
            "directory or special file".to_string(),
            "Configuration path must point to a regular file",
        ));
    }

    std::fs::read_to_string(path)
        .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
}

fn read_yaml(path: &Path) -> ConfigResult<YamlValue> {
    let content = read_config_file_safely(path)?;
    let value: YamlValue = serde_yaml::from_str(&content)
        .map_err(|e| ConfigurationError::invalid_yaml(path.display().to_string(), e))?;
    // An empty file parses as null
    Ok(match value {
        YamlValue::Null => YamlValue::Mapping(Default::default()),
        other => other,
    })
}

/// Recursively merge YAML values (environment overrides into base config)
fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) -> ConfigResult<()> {
    match (&mut *base, override_value) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
            for (key, value) in override_map {
                if let Some(existing_value) = base_map.get_mut(&key) {
                    merge_yaml_values(existing_value, value)?;
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (YamlValue::Mapping(_), YamlValue::Null) => {}
        (YamlValue::Mapping(_), other) => {
            return Err(ConfigurationError::ConfigMergeError {
                error: format!("cannot merge a {} over a mapping", yaml_kind(&other)),
            });
        }
        (base_ref, override_val) => {
            *base_ref = override_val;
        }
    }
    Ok(())
}

fn yaml_kind(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "boolean",
        YamlValue::Number(_) => "number",
        YamlValue::String(_) => "string",
        YamlValue::Sequence(_) => "sequence",
        YamlValue::Mapping(_) => "mapping",
        YamlValue::Tagged(_) => "tagged value",
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigurationError::environment_override(key, e.to_string()))
}

/// Apply `RUNFORGE_*` overrides on top of the file configuration
fn apply_env_overrides<F>(config: &mut OrchestratorConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = lookup("RUNFORGE_WORKSPACE_ROOT") {
        config.workspace.root = PathBuf::from(root);
    }
    if let Some(program) = lookup("RUNFORGE_TRAINER_PROGRAM") {
        config.supervisor.trainer_program = program;
    }
    if let Some(raw) = lookup("RUNFORGE_STOP_GRACE_PERIOD_SECONDS") {
        config.supervisor.stop_grace_period_seconds =
            parse_override("RUNFORGE_STOP_GRACE_PERIOD_SECONDS", &raw)?;
    }
    if let Some(raw) = lookup("RUNFORGE_PORT_BASE") {
        config.supervisor.ports.base = parse_override("RUNFORGE_PORT_BASE", &raw)?;
    }
    if let Some(raw) = lookup("RUNFORGE_STARTUP_SILENCE_THRESHOLD_SECONDS") {
        config.health.startup_silence_threshold_seconds =
            parse_override("RUNFORGE_STARTUP_SILENCE_THRESHOLD_SECONDS", &raw)?;
    }
    if let Some(raw) = lookup("RUNFORGE_STEADY_SILENCE_THRESHOLD_SECONDS") {
        config.health.steady_silence_threshold_seconds =
            parse_override("RUNFORGE_STEADY_SILENCE_THRESHOLD_SECONDS", &raw)?;
    }
    if let Some(raw) = lookup("RUNFORGE_MIN_GRACE_PERIOD_SECONDS") {
        config.health.min_grace_period_seconds =
            parse_override("RUNFORGE_MIN_GRACE_PERIOD_SECONDS", &raw)?;
    }
    if let Some(dir) = lookup("RUNFORGE_LOG_DIR") {
        config.logging.directory = Some(PathBuf::from(dir));
    }
    Ok(())
}

/// Sanitize configuration for safe logging by masking sensitive fields
fn sanitize_config_for_logging(config: &OrchestratorConfig) -> serde_json::Value {
    let mut config_json = serde_json::json!(config);
    let sensitive_patterns = ["password", "secret", "key", "token", "credential", "auth"];
    sanitize_json_recursive(&mut config_json, &sensitive_patterns);
    config_json
}

/// Recursively sanitize sensitive fields in JSON configuration
fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive {
                    *val = match val {
                        serde_json::Value::String(s) if s.is_empty() => {
                            serde_json::Value::String("[EMPTY]".to_string())
                        }
                        _ => serde_json::Value::String("[MASKED]".to_string()),
                    };
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}
