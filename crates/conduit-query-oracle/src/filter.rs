use conduit_query::config::value_as_bool;
use conduit_query::filter::is_absent;
use conduit_query::{BackendKind, ConfigMap, PropertyFilter};

/// Keys accepted from an Oracle configuration block
pub struct OraclePropertyFilter;

impl PropertyFilter for OraclePropertyFilter {
    fn kind(&self) -> BackendKind {
        BackendKind::Oracle
    }

    fn whitelist(&self) -> &'static [&'static str] {
        &[
            "db_type",
            "dsn",
            "user",
            "password",
            "external_auth",
            "pooling",
            "sql",
            "params",
            "table",
            "mode",
            "pk_cols",
            "pk_col",
            "sequence_name",
            "chunk_size",
        ]
    }

    fn required(&self) -> &'static [&'static str] {
        &["db_type", "dsn", "user", "password"]
    }

    /// Kerberos/OS authentication (`external_auth`) needs neither user nor password
    fn missing_keys(&self, filtered: &ConfigMap) -> Vec<String> {
        let external = filtered
            .get("external_auth")
            .and_then(value_as_bool)
            .unwrap_or(false);

        self.required()
            .iter()
            .filter(|key| !(external && matches!(**key, "user" | "password")))
            .filter(|key| is_absent(filtered, key))
            .map(|key| key.to_string())
            .collect()
    }
}
