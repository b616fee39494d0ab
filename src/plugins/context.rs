use crate::models::PluginScope;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a routine knows about its own execution
///
/// Settings are read-only. Cancellation is cooperative: the coordinator
/// cancels the token on `stop_plugin` and the routine observes it at its own
/// check points.
#[derive(Debug, Clone)]
pub struct PluginContext {
    execution_id: Uuid,
    plugin_name: String,
    scope: PluginScope,
    target_id: Uuid,
    settings: Value,
    cancellation: CancellationToken,
}

impl PluginContext {
    pub fn new(
        execution_id: Uuid,
        plugin_name: impl Into<String>,
        scope: PluginScope,
        target_id: Uuid,
        settings: Value,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id,
            plugin_name: plugin_name.into(),
            scope,
            target_id,
            settings,
            cancellation,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn scope(&self) -> PluginScope {
        self.scope
    }

    pub fn target_id(&self) -> Uuid {
        self.target_id
    }

    pub fn settings(&self) -> &Value {
        &self.settings
    }

    /// Look up a single setting
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn setting_u64(&self, key: &str, default: u64) -> u64 {
        self.setting(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn setting_f64(&self, key: &str, default: f64) -> f64 {
        self.setting(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn should_stop(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn should_continue(&self) -> bool {
        !self.should_stop()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
