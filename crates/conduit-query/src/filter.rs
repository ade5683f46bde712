//! Backend-scoped whitelisting and validation of raw configuration blocks.

use crate::backend::BackendKind;
use crate::config::{ConfigMap, EnvironmentDocument, RuntimeOverrides};
use crate::error::{DataError, Result};
use crate::secrets::display_value;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Validated, whitelist-filtered settings of one backend in one environment
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredConfig {
    pub kind: BackendKind,
    pub environment: String,
    pub values: ConfigMap,
}

/// Per-backend filtering of a raw configuration block.
///
/// Implementations only describe their key sets; the default `filter`
/// copies whitelisted keys, handles `db_type`, then validates.
pub trait PropertyFilter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Keys kept from the raw block; everything else is dropped silently
    fn whitelist(&self) -> &'static [&'static str];

    /// Keys that must be present (and non-null) after filtering
    fn required(&self) -> &'static [&'static str];

    /// Whether an absent `db_type` is filled in with this backend's kind
    fn injects_kind(&self) -> bool {
        false
    }

    /// Every required key missing from `filtered`
    fn missing_keys(&self, filtered: &ConfigMap) -> Vec<String> {
        self.required()
            .iter()
            .filter(|key| is_absent(filtered, key))
            .map(|key| key.to_string())
            .collect()
    }

    /// Keep only whitelisted keys
    fn retain_whitelisted(&self, raw: &ConfigMap) -> ConfigMap {
        let whitelist = self.whitelist();
        raw.iter()
            .filter(|(key, _)| whitelist.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Whitelist-filtered copy of caller overrides
    fn filter_overrides(&self, overrides: &RuntimeOverrides) -> RuntimeOverrides {
        let kept = self.retain_whitelisted(overrides.values());
        for key in overrides.values().keys() {
            if !kept.contains_key(key) {
                debug!("Dropping override '{}' not accepted by {}", key, self.kind());
            }
        }
        RuntimeOverrides::from(kept)
    }

    fn filter(&self, raw: &ConfigMap, environment: &str) -> Result<FilteredConfig> {
        let kind = self.kind();
        debug!("Filtering {} config for environment '{}'", kind, environment);

        let mut values = self.retain_whitelisted(raw);

        let current = values
            .get("db_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        match current.as_deref() {
            None if self.injects_kind() => {
                values.insert("db_type".to_string(), Value::from(kind.as_str()));
            }
            Some(db_type) if !kind.matches(db_type) => {
                warn!("Overriding db_type from '{}' to '{}'", db_type, kind);
                values.insert("db_type".to_string(), Value::from(kind.as_str()));
            }
            _ => {}
        }

        let missing = self.missing_keys(&values);
        if !missing.is_empty() {
            return Err(DataError::validation(
                format!("{} config of environment '{}'", kind, environment),
                missing,
            ));
        }

        info!(
            "Loaded environment '{}' with the following {} config:",
            environment, kind
        );
        for (key, value) in &values {
            info!("    {} = {}", key, display_value(key, value));
        }

        Ok(FilteredConfig {
            kind,
            environment: environment.to_string(),
            values,
        })
    }
}

/// Whether `key` is missing or null in `map`
pub fn is_absent(map: &ConfigMap, key: &str) -> bool {
    match map.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Look up `environment`, then the filter's backend block, then filter it
pub fn resolve(
    document: &EnvironmentDocument,
    environment: &str,
    filter: &dyn PropertyFilter,
) -> Result<FilteredConfig> {
    let raw = document.backend_block(environment, filter.kind())?;
    filter.filter(raw, environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DemoFilter;

    impl PropertyFilter for DemoFilter {
        fn kind(&self) -> BackendKind {
            BackendKind::Postgres
        }

        fn whitelist(&self) -> &'static [&'static str] {
            &["db_type", "host", "password"]
        }

        fn required(&self) -> &'static [&'static str] {
            &["db_type", "host", "password"]
        }
    }

    struct InjectingFilter;

    impl PropertyFilter for InjectingFilter {
        fn kind(&self) -> BackendKind {
            BackendKind::S3
        }

        fn whitelist(&self) -> &'static [&'static str] {
            &["db_type", "bucket"]
        }

        fn required(&self) -> &'static [&'static str] {
            &["bucket"]
        }

        fn injects_kind(&self) -> bool {
            true
        }
    }

    fn map(value: Value) -> ConfigMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_drops_unknown_keys_silently() {
        let raw = map(json!({"db_type": "postgres", "host": "h", "password": "p", "colour": "red"}));
        let filtered = DemoFilter.filter(&raw, "DEV").unwrap();
        assert!(!filtered.values.contains_key("colour"));
        assert!(filtered
            .values
            .keys()
            .all(|k| DemoFilter.whitelist().contains(&k.as_str())));
    }

    #[test]
    fn test_reports_all_missing_keys() {
        let raw = map(json!({"host": "", "port": 1}));
        let err = DemoFilter.filter(&raw, "DEV").unwrap_err();
        assert_eq!(err.missing_fields(), ["db_type", "host", "password"]);
    }

    #[test]
    fn test_injects_kind_when_absent() {
        let filtered = InjectingFilter.filter(&map(json!({"bucket": "b"})), "DEV").unwrap();
        assert_eq!(filtered.values.get("db_type"), Some(&json!("s3")));
    }

    #[test]
    fn test_mismatched_db_type_is_overwritten() {
        let raw = map(json!({"db_type": "oracle", "host": "h", "password": "p"}));
        let filtered = DemoFilter.filter(&raw, "DEV").unwrap();
        assert_eq!(filtered.values.get("db_type"), Some(&json!("postgres")));
    }

    #[test]
    fn test_filter_overrides() {
        let overrides = RuntimeOverrides::new().set("host", "x").set("bogus", 1);
        let kept = DemoFilter.filter_overrides(&overrides);
        assert_eq!(kept.get("host"), Some(&json!("x")));
        assert!(kept.get("bogus").is_none());
    }
}
