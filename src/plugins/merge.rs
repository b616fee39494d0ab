//! Trainer configuration merge helpers used when routines derive revisions.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Largest relative change applied to a mutated numeric value
pub const MUTATION_SPREAD: f64 = 0.2;

/// How configuration updates are combined with a base configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Recurse into nested mappings
    #[default]
    Deep,
    /// Replace top-level keys wholesale
    Shallow,
}

impl MergeStrategy {
    pub fn apply(self, base: &mut Value, updates: &Value) {
        match self {
            Self::Deep => deep_merge(base, updates),
            Self::Shallow => shallow_merge(base, updates),
        }
    }
}

/// Recursively merge `updates` into `base`; non-mapping values replace
pub fn deep_merge(base: &mut Value, updates: &Value) {
    match (base, updates) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                let nested = value.is_object() && base_map.get(key).is_some_and(Value::is_object);
                match base_map.get_mut(key) {
                    Some(existing) if nested => deep_merge(existing, value),
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, updates) => *base = updates.clone(),
    }
}

/// Overwrite top-level keys of `base` with those of `updates`
pub fn shallow_merge(base: &mut Value, updates: &Value) {
    match (base, updates) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                base_map.insert(key.clone(), value.clone());
            }
        }
        (base, updates) => *base = updates.clone(),
    }
}

/// Merge hyperparameters into `behaviors.<name>.hyperparameters`
///
/// With no behavior name every behavior is updated. Fails when the config has
/// no behaviors or the named behavior does not exist.
pub fn merge_hyperparameters(
    config: &mut Value,
    hyperparameters: &Map<String, Value>,
    behavior_name: Option<&str>,
) -> Result<(), String> {
    let behaviors = config
        .get_mut("behaviors")
        .and_then(Value::as_object_mut)
        .filter(|behaviors| !behaviors.is_empty())
        .ok_or_else(|| "configuration has no behaviors section".to_string())?;

    let updates = Value::Object(hyperparameters.clone());
    match behavior_name {
        Some(name) => {
            let behavior = behaviors
                .get_mut(name)
                .ok_or_else(|| format!("behavior '{name}' not found in configuration"))?;
            merge_into_behavior(behavior, &updates);
        }
        None => {
            for behavior in behaviors.values_mut() {
                merge_into_behavior(behavior, &updates);
            }
        }
    }
    Ok(())
}

fn merge_into_behavior(behavior: &mut Value, updates: &Value) {
    if !behavior.is_object() {
        *behavior = Value::Object(Map::new());
    }
    if let Value::Object(section) = behavior {
        let hyperparameters = section
            .entry("hyperparameters")
            .or_insert_with(|| Value::Object(Map::new()));
        deep_merge(hyperparameters, updates);
    }
}

/// Perturb numeric values of `config` by up to ±[`MUTATION_SPREAD`]
///
/// Each number is mutated with probability `mutation_rate`; nested mappings
/// are visited, while strings, booleans, and lists are kept as they are.
/// Integers stay integers, truncated toward zero.
pub fn mutate_numeric<R: Rng + ?Sized>(config: &Value, mutation_rate: f64, rng: &mut R) -> Value {
    let mut mutated = config.clone();
    mutate_in_place(&mut mutated, mutation_rate, rng);
    mutated
}

fn mutate_in_place<R: Rng + ?Sized>(value: &mut Value, mutation_rate: f64, rng: &mut R) {
    match value {
        Value::Object(map) => {
            for nested in map.values_mut() {
                mutate_in_place(nested, mutation_rate, rng);
            }
        }
        Value::Number(number) => {
            if rng.gen::<f64>() >= mutation_rate {
                return;
            }
            let factor = 1.0 + rng.gen_range(-MUTATION_SPREAD..=MUTATION_SPREAD);
            if let Some(int) = number.as_i64() {
                *number = Number::from((int as f64 * factor).trunc() as i64);
            } else if let Some(mutated) = number.as_f64().and_then(|f| Number::from_f64(f * factor)) {
                *number = mutated;
            }
        }
        _ => {}
    }
}
