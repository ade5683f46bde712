//! Environment-keyed configuration document and merged reader configuration.

use crate::backend::BackendKind;
use crate::error::{DataError, Result};
use crate::types::ParamValue;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Untyped key/value mapping, as found in the configuration document
pub type ConfigMap = serde_json::Map<String, Value>;

/// Entire configuration: environment name -> environment block.
///
/// An environment block is either flat (backend keys directly, selected by
/// `db_type`) or nested (`{postgres: {...}, s3: {...}}`). Immutable once loaded.
#[derive(Debug, Clone)]
pub struct EnvironmentDocument {
    source: String,
    environments: BTreeMap<String, ConfigMap>,
}

impl EnvironmentDocument {
    /// Load a YAML (`.yml`/`.yaml`) or JSON (`.json`) document
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration document from '{}'", path.display());

        let contents = std::fs::read_to_string(path)?;
        let source = path.display().to_string();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&contents, &source)
        } else {
            Self::from_yaml_str(&contents, &source)
        }
    }

    pub fn from_yaml_str(contents: &str, source: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(contents).map_err(|e| {
            DataError::Serialization(format!("Failed to parse YAML '{}': {}", source, e))
        })?;
        Self::from_value(value, source)
    }

    pub fn from_json_str(contents: &str, source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(contents).map_err(|e| {
            DataError::Serialization(format!("Failed to parse JSON '{}': {}", source, e))
        })?;
        Self::from_value(value, source)
    }

    pub fn from_value(value: Value, source: &str) -> Result<Self> {
        let Value::Object(top) = value else {
            return Err(DataError::configuration(format!(
                "Configuration '{}' must be a mapping of environment names",
                source
            )));
        };

        let mut environments = BTreeMap::new();
        for (name, block) in top {
            match block {
                Value::Object(map) => {
                    environments.insert(name, map);
                }
                _ => {
                    return Err(DataError::configuration(format!(
                        "Environment '{}' in '{}' must be a mapping",
                        name, source
                    )))
                }
            }
        }

        debug!(
            "Loaded {} environments from '{}'",
            environments.len(),
            source
        );

        Ok(Self {
            source: source.to_string(),
            environments,
        })
    }

    /// Where the document came from, for messages
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn environment_names(&self) -> impl Iterator<Item = &str> {
        self.environments.keys().map(String::as_str)
    }

    pub fn environment(&self, name: &str) -> Result<&ConfigMap> {
        self.environments.get(name).ok_or_else(|| {
            DataError::configuration(format!(
                "Environment '{}' not found in {}",
                name, self.source
            ))
        })
    }

    /// Raw settings of `kind` within `environment`, in either layout
    pub fn backend_block(&self, environment: &str, kind: BackendKind) -> Result<&ConfigMap> {
        let env_block = self.environment(environment)?;

        let nested = env_block.iter().find_map(|(key, value)| match value {
            Value::Object(map) if kind.matches(key) => Some(map),
            _ => None,
        });
        if let Some(block) = nested {
            return Ok(block);
        }

        let is_nested_layout = env_block.iter().any(|(key, value)| {
            value.is_object() && BackendKind::ALL.iter().any(|k| k.matches(key))
        });
        let flat_matches = match env_block.get("db_type").and_then(Value::as_str) {
            Some(db_type) => kind.matches(db_type),
            None => true,
        };

        if !is_nested_layout && flat_matches {
            return Ok(env_block);
        }

        Err(DataError::configuration(format!(
            "No '{}' block in environment '{}' of {}",
            kind, environment, self.source
        )))
    }
}

/// Caller-supplied values merged over file-sourced configuration.
///
/// A `null` value is treated as absent and never clobbers a file value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeOverrides {
    values: ConfigMap,
}

impl RuntimeOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Set only when a value is present
    pub fn set_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(Value::is_null)
    }

    pub fn values(&self) -> &ConfigMap {
        &self.values
    }
}

impl From<ConfigMap> for RuntimeOverrides {
    fn from(values: ConfigMap) -> Self {
        Self { values }
    }
}

/// Merge overrides on top of `base`, key by key.
///
/// Present override values always win; nested maps are replaced as a whole.
pub fn merge_overrides(base: &ConfigMap, overrides: &RuntimeOverrides) -> ConfigMap {
    let mut merged = base.clone();
    for (key, value) in overrides.values() {
        if value.is_null() {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Merged, backend-scoped settings handed to a reader constructor
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    kind: BackendKind,
    values: ConfigMap,
}

impl ReaderConfig {
    pub fn new(kind: BackendKind, values: ConfigMap) -> Self {
        Self { kind, values }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// String value; scalars are rendered, blank strings count as absent
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn require_str(&self, key: &str) -> Result<String> {
        self.get_str(key)
            .ok_or_else(|| DataError::missing_parameter(self.kind.as_str(), key))
    }

    /// Unsigned integer from a number or numeric string
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value_as_u64(value).map(Some).ok_or_else(|| {
                DataError::configuration(format!(
                    "'{}' for {} must be a non-negative integer, got {}",
                    key, self.kind, value
                ))
            }),
        }
    }

    pub fn require_u16(&self, key: &str) -> Result<u16> {
        let value = self
            .get_u64(key)?
            .ok_or_else(|| DataError::missing_parameter(self.kind.as_str(), key))?;
        u16::try_from(value).map_err(|_| {
            DataError::configuration(format!("'{}' for {} out of range: {}", key, self.kind, value))
        })
    }

    /// Boolean flag; absent means false
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(value) => value_as_bool(value).ok_or_else(|| {
                DataError::configuration(format!(
                    "'{}' for {} must be a boolean, got {}",
                    key, self.kind, value
                ))
            }),
        }
    }

    /// String list from an array or a comma-separated string
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        let items: Vec<String> = match self.get(key) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
            Some(_) => Vec::new(),
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// The `pooling` sub-map, if configured
    pub fn pooling(&self) -> Option<&ConfigMap> {
        self.get("pooling").and_then(Value::as_object)
    }

    /// A pooling setting, falling back to `default` when the sub-map or key is absent
    pub fn pool_setting(&self, key: &str, default: u32) -> Result<u32> {
        let Some(value) = self.pooling().and_then(|p| p.get(key)).filter(|v| !v.is_null()) else {
            return Ok(default);
        };
        value_as_u64(value)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                DataError::configuration(format!(
                    "pooling.{} for {} must be a non-negative integer, got {}",
                    key, self.kind, value
                ))
            })
    }

    /// Pre-bound parameters; a scalar is a single parameter
    pub fn params(&self) -> Vec<ParamValue> {
        match self.get("params") {
            None => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(ParamValue::from_json).collect(),
            Some(other) => vec![ParamValue::from_json(other)],
        }
    }
}

/// Lenient boolean: JSON booleans, 0/1, and the usual yes/no words
pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().filter(|v| *v <= 1).map(|v| v == 1),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
