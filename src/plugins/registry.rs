//! # Plugin Registry
//!
//! Named automation routines with their scope, metadata, and a settings
//! schema checked before an execution starts.

use super::errors::{PluginError, PluginResult};
use super::routine::PluginRoutine;
use crate::models::PluginScope;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Expected JSON type of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    Int,
    Float,
    String,
    Boolean,
}

impl SettingKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingSpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<SettingKind>,
    #[serde(default)]
    pub description: String,
}

impl SettingSpec {
    pub fn required(kind: SettingKind) -> Self {
        Self {
            required: true,
            kind: Some(kind),
            description: String::new(),
        }
    }

    pub fn optional(kind: SettingKind) -> Self {
        Self {
            required: false,
            kind: Some(kind),
            description: String::new(),
        }
    }
}

/// Registered plugin and its metadata
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub scope: PluginScope,
    pub description: String,
    pub version: String,
    pub author: Option<String>,
    pub settings_schema: BTreeMap<String, SettingSpec>,
    routine: Arc<dyn PluginRoutine>,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("version", &self.version)
            .field("settings_schema", &self.settings_schema)
            .finish_non_exhaustive()
    }
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, scope: PluginScope, routine: Arc<dyn PluginRoutine>) -> Self {
        Self {
            name: name.into(),
            scope,
            description: String::new(),
            version: "1.0.0".to_string(),
            author: None,
            settings_schema: BTreeMap::new(),
            routine,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, spec: SettingSpec) -> Self {
        self.settings_schema.insert(key.into(), spec);
        self
    }

    pub fn routine(&self) -> Arc<dyn PluginRoutine> {
        self.routine.clone()
    }

    /// Check settings against the schema
    ///
    /// Settings must be a mapping (or null); an empty schema accepts any keys.
    pub fn validate_settings(&self, settings: &Value) -> PluginResult<()> {
        let empty = serde_json::Map::new();
        let provided = match settings {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(PluginError::InvalidSettings(format!(
                    "settings for plugin '{}' must be a mapping, got {other}",
                    self.name
                )))
            }
        };
        if self.settings_schema.is_empty() {
            return Ok(());
        }

        let missing: Vec<String> = self
            .settings_schema
            .iter()
            .filter(|(key, spec)| spec.required && !provided.contains_key(*key))
            .map(|(key, _)| key.clone())
            .collect();
        if !missing.is_empty() {
            return Err(PluginError::MissingSettings {
                plugin: self.name.clone(),
                missing,
            });
        }

        for (key, spec) in &self.settings_schema {
            if let (Some(kind), Some(value)) = (spec.kind, provided.get(key)) {
                if !kind.accepts(value) {
                    return Err(PluginError::InvalidSettings(format!(
                        "setting '{key}' of plugin '{}' must be {kind:?}, got {value}",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Thread-safe registry of plugins keyed by name
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a plugin
    pub fn register(&self, descriptor: PluginDescriptor) {
        info!(
            plugin = %descriptor.name,
            scope = %descriptor.scope,
            version = %descriptor.version,
            "🧩 PLUGIN_REGISTRY: Registered plugin"
        );
        self.plugins.insert(descriptor.name.clone(), descriptor);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.plugins.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<PluginDescriptor> {
        self.plugins.get(name).map(|entry| entry.value().clone())
    }

    /// Resolve a plugin for a scope, rejecting scope mismatches
    pub fn resolve(&self, name: &str, scope: PluginScope) -> PluginResult<PluginDescriptor> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| PluginError::NotRegistered(name.to_string()))?;
        if descriptor.scope != scope {
            return Err(PluginError::ScopeMismatch {
                plugin: name.to_string(),
                scope,
            });
        }
        Ok(descriptor)
    }

    /// Registered plugin names, optionally filtered by scope, sorted
    pub fn list(&self, scope: Option<PluginScope>) -> Vec<String> {
        let mut names: Vec<String> = self
            .plugins
            .iter()
            .filter(|entry| scope.map_or(true, |s| entry.scope == s))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
