use conduit_query::config::value_as_bool;
use conduit_query::filter::is_absent;
use conduit_query::{BackendKind, ConfigMap, PropertyFilter};

/// Keys accepted from a PostgreSQL configuration block
pub struct PostgresPropertyFilter;

impl PropertyFilter for PostgresPropertyFilter {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn whitelist(&self) -> &'static [&'static str] {
        &[
            "db_type",
            "host",
            "port",
            "user",
            "password",
            "database",
            "pooling",
            "sql",
            "params",
            "sslmode",
            "sslrootcert",
            "token_ttl",
            "iam_auth",
            "region",
            "table",
            "merge_on",
            "chunk_size",
        ]
    }

    fn required(&self) -> &'static [&'static str] {
        &["db_type", "host", "port", "user", "password", "database"]
    }

    /// With `iam_auth` the password is replaced by a token and `region` is needed instead
    fn missing_keys(&self, filtered: &ConfigMap) -> Vec<String> {
        let iam = filtered
            .get("iam_auth")
            .and_then(value_as_bool)
            .unwrap_or(false);

        let mut missing: Vec<String> = self
            .required()
            .iter()
            .filter(|key| !(iam && **key == "password"))
            .filter(|key| is_absent(filtered, key))
            .map(|key| key.to_string())
            .collect();
        if iam && is_absent(filtered, "region") {
            missing.push("region".to_string());
        }
        missing
    }
}
