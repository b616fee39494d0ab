use crate::models::PluginScope;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the plugin coordinator and registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin '{0}' is not registered")]
    NotRegistered(String),

    #[error("Plugin '{plugin}' does not support {scope} scope")]
    ScopeMismatch { plugin: String, scope: PluginScope },

    #[error("Plugin execution {execution_id} is already running for {scope} {target_id}")]
    AlreadyRunning {
        scope: PluginScope,
        target_id: Uuid,
        execution_id: Uuid,
    },

    #[error("Plugin execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("Plugin '{plugin}' is missing required settings: {}", missing.join(", "))]
    MissingSettings { plugin: String, missing: Vec<String> },

    #[error("Invalid plugin settings: {0}")]
    InvalidSettings(String),

    #[error("Plugin execution {execution_id} failed: {message}")]
    Routine { execution_id: Uuid, message: String },
}

pub type PluginResult<T> = Result<T, PluginError>;
