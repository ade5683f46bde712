//! Named query definitions: `name -> {sql, params}`.

use crate::error::{DataError, Result};
use crate::types::ParamValue;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
struct QueryDefinition {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// Query-definitions file, looked up by name
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    queries: BTreeMap<String, QueryDefinition>,
}

impl QueryCatalog {
    /// Load a JSON file (or YAML, by `.yml`/`.yaml` extension)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading queries from '{}'", path.display());

        let contents = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );

        let queries = if is_yaml {
            serde_yaml::from_str(&contents).map_err(|e| {
                DataError::Serialization(format!("Failed to parse '{}': {}", path.display(), e))
            })?
        } else {
            serde_json::from_str(&contents).map_err(|e| {
                DataError::Serialization(format!("Failed to parse '{}': {}", path.display(), e))
            })?
        };

        Ok(Self { queries })
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let queries = serde_json::from_str(contents)
            .map_err(|e| DataError::Serialization(format!("Failed to parse queries: {}", e)))?;
        Ok(Self { queries })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    /// The stored SQL and ordered parameters, verbatim
    pub fn get(&self, name: &str) -> Result<(String, Vec<ParamValue>)> {
        let definition = self
            .queries
            .get(name)
            .ok_or_else(|| DataError::QueryNotFound(name.to_string()))?;

        let sql = definition
            .sql
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| DataError::InvalidQueryDefinition {
                name: name.to_string(),
                reason: "no 'sql' field".to_string(),
            })?;

        let params = match &definition.params {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(ParamValue::from_json).collect(),
            Some(_) => {
                return Err(DataError::InvalidQueryDefinition {
                    name: name.to_string(),
                    reason: "'params' must be a list".to_string(),
                })
            }
        };

        Ok((sql, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERIES: &str = r#"{
        "employee_select": {"sql": "SELECT * FROM emp WHERE dept_id = $1", "params": [10]},
        "no_params": {"sql": "SELECT 1"},
        "broken": {"params": []},
        "bad_params": {"sql": "SELECT 1", "params": "10"}
    }"#;

    #[test]
    fn test_get_returns_sql_and_params() {
        let catalog = QueryCatalog::from_json_str(QUERIES).unwrap();
        let (sql, params) = catalog.get("employee_select").unwrap();
        assert_eq!(sql, "SELECT * FROM emp WHERE dept_id = $1");
        assert_eq!(params, vec![ParamValue::Int(10)]);

        let (_, params) = catalog.get("no_params").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn test_errors() {
        let catalog = QueryCatalog::from_json_str(QUERIES).unwrap();
        assert!(matches!(
            catalog.get("missing"),
            Err(DataError::QueryNotFound(_))
        ));
        assert!(matches!(
            catalog.get("broken"),
            Err(DataError::InvalidQueryDefinition { .. })
        ));
        assert!(matches!(
            catalog.get("bad_params"),
            Err(DataError::InvalidQueryDefinition { .. })
        ));
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.yml");
        std::fs::write(&path, "q:\n  sql: SELECT 2\n  params: [a]\n").unwrap();

        let catalog = QueryCatalog::load(&path).unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["q"]);
        let (sql, params) = catalog.get("q").unwrap();
        assert_eq!(sql, "SELECT 2");
        assert_eq!(params, vec![ParamValue::Text("a".into())]);
    }
}
