use conduit_query::filter::is_absent;
use conduit_query::{BackendKind, ConfigMap, PropertyFilter};
use serde_json::Value;

use crate::locator::S3Locator;

/// Keys accepted from an S3 configuration block
pub struct S3PropertyFilter;

impl PropertyFilter for S3PropertyFilter {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    fn whitelist(&self) -> &'static [&'static str] {
        &[
            "db_type",
            "bucket",
            "prefix",
            "file_pattern",
            "region_name",
            "aws_profile",
            "endpoint_url",
            "format",
            "sql",
            "params",
        ]
    }

    fn required(&self) -> &'static [&'static str] {
        &["bucket"]
    }

    fn injects_kind(&self) -> bool {
        true
    }

    /// `bucket` may be omitted when `sql` holds a full `s3://` locator
    fn missing_keys(&self, filtered: &ConfigMap) -> Vec<String> {
        let has_locator = filtered
            .get("sql")
            .and_then(Value::as_str)
            .map(S3Locator::is_fully_qualified)
            .unwrap_or(false);

        if is_absent(filtered, "bucket") && !has_locator {
            vec!["bucket".to_string()]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_query::{resolve, DataError, EnvironmentDocument};

    const DOCUMENT: &str = r#"
DEV:
  bucket: analytics-dev
  prefix: exports
  aws_secret_access_key: nope
QA:
  sql: s3://shared/qa/latest.parquet
PROD:
  prefix: exports
"#;

    #[test]
    fn test_injects_db_type_and_drops_unknown_keys() {
        let document = EnvironmentDocument::from_yaml_str(DOCUMENT, "test").unwrap();
        let filtered = resolve(&document, "DEV", &S3PropertyFilter).unwrap();
        assert_eq!(filtered.values["db_type"], "s3");
        assert!(!filtered.values.contains_key("aws_secret_access_key"));
    }

    #[test]
    fn test_locator_replaces_bucket() {
        let document = EnvironmentDocument::from_yaml_str(DOCUMENT, "test").unwrap();
        assert!(resolve(&document, "QA", &S3PropertyFilter).is_ok());

        let err = resolve(&document, "PROD", &S3PropertyFilter).unwrap_err();
        assert!(matches!(err, DataError::Validation { .. }));
        assert_eq!(err.missing_fields(), ["bucket"]);
    }
}
