//! PostgreSQL reader and writer for conduit-query
//!
//! Pooled, parameterized SELECTs and batched MERGE/INSERT writes over sqlx.
//! The pool is created on the first `connect` (explicit or implicit) and
//! released by `close`. With `iam_auth` the password is an RDS IAM token that
//! is regenerated before it expires.

mod connection;
mod decode;
mod filter;
mod iam;
mod writer;

pub use connection::DEFAULT_TOKEN_TTL_SECS;
pub use filter::PostgresPropertyFilter;
pub use writer::PostgresWriter;

use async_trait::async_trait;
use conduit_query::{
    BackendKind, DataError, DatasetSchema, ParamValue, PoolId, PoolSlot, QueryRequest, Reader,
    ReaderConfig, ReaderState, Result, Row, Table,
};
use connection::{PgConnector, PgSettings};
use sqlx::postgres::{PgDatabaseError, PgPool, PgRow};
use tracing::{debug, error, info};

/// PostgreSQL reader implementation
pub struct PostgresReader {
    connector: PgConnector,
    query: Option<String>,
    params: Vec<ParamValue>,
    pool: PoolSlot<PgPool>,
}

impl PostgresReader {
    /// Build a reader from merged configuration; no connection is opened
    pub fn new(config: ReaderConfig) -> Result<Self> {
        let settings = PgSettings::from_config(&config)?;
        let label = settings.label("reader");
        debug!("Created {}", label);

        Ok(Self {
            connector: PgConnector::new(settings),
            query: config.get_str("sql"),
            params: config.params(),
            pool: PoolSlot::new(label),
        })
    }

    async fn pool(&self) -> Result<(PgPool, PoolId)> {
        let (pool, id) = self
            .pool
            .get_or_init_with_id(|| self.connector.create_pool())
            .await?;
        self.connector.refresh_credentials(&pool).await?;
        Ok((pool, id))
    }

    /// Closed check, then effective query, then pool; in that order
    async fn prepare<'a>(
        &'a self,
        request: &'a QueryRequest,
    ) -> Result<(PgPool, &'a str, &'a [ParamValue])> {
        self.pool.ensure_open().await?;
        let sql = request
            .effective_query(self.query.as_deref())
            .ok_or_else(|| DataError::NoQueryProvided(BackendKind::Postgres.to_string()))?;
        let params = request.effective_params(&self.params);
        let (pool, _) = self.pool().await?;
        Ok((pool, sql, params))
    }

    async fn run(&self, pool: &PgPool, sql: &str, params: &[ParamValue]) -> Result<Vec<PgRow>> {
        debug!("Executing SQL with {} parameters: {}", params.len(), sql);

        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                ParamValue::Null => query.bind(None::<String>),
                ParamValue::Bool(v) => query.bind(*v),
                ParamValue::Int(v) => query.bind(*v),
                ParamValue::Float(v) => query.bind(*v),
                ParamValue::Text(v) => query.bind(v.as_str()),
            };
        }

        query.fetch_all(pool).await.map_err(|e| {
            error!("PostgreSQL SQL execution failed: {}", e);
            DataError::query_failed(describe_error(&e), sql)
        })
    }
}

/// Message plus detail/hint when the server supplied them
pub(crate) fn describe_error(e: &sqlx::Error) -> String {
    let sqlx::Error::Database(db_error) = e else {
        return e.to_string();
    };

    let mut msg = db_error.message().to_string();
    if let Some(pg_error) = db_error.try_downcast_ref::<PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            msg.push_str(&format!("\nDetail: {}", detail));
        }
        if let Some(hint) = pg_error.hint() {
            msg.push_str(&format!("\nHint: {}", hint));
        }
    }
    msg
}

#[async_trait]
impl Reader for PostgresReader {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn default_query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn default_params(&self) -> &[ParamValue] {
        &self.params
    }

    async fn state(&self) -> ReaderState {
        self.pool.state().await
    }

    async fn connect(&self) -> Result<PoolId> {
        self.pool().await.map(|(_, id)| id)
    }

    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Row>> {
        let (pool, sql, params) = self.prepare(request).await?;
        let rows = self.run(&pool, sql, params).await?;
        Ok(rows.iter().map(decode::extract_row).collect())
    }

    async fn fetch(&self, request: &QueryRequest) -> Result<Table> {
        let (pool, sql, params) = self.prepare(request).await?;

        let start = std::time::Instant::now();
        let rows = self.run(&pool, sql, params).await?;

        let fields = rows.first().map(decode::schema_of).unwrap_or_default();
        let data_rows = rows.iter().map(decode::extract_row).collect();
        let execution_ms = start.elapsed().as_millis() as u64;

        let table = Table::new(DatasetSchema::new(fields), data_rows, execution_ms);
        debug!(
            "Fetched {} rows from PostgreSQL in {}ms",
            table.stats.row_count, execution_ms
        );
        Ok(table)
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.close().await {
            pool.close().await;
            let settings = self.connector.settings();
            info!(
                "Closed PostgreSQL pool for {}:{}/{}",
                settings.host, settings.port, settings.database
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_query::ConfigMap;
    use serde_json::json;
    use std::time::Duration;

    fn config(value: serde_json::Value) -> ReaderConfig {
        let values: ConfigMap = value.as_object().unwrap().clone();
        ReaderConfig::new(BackendKind::Postgres, values)
    }

    fn base() -> serde_json::Value {
        json!({
            "db_type": "postgres",
            "host": "localhost",
            "port": 5432,
            "user": "app",
            "password": "secret",
            "database": "hr"
        })
    }

    #[test]
    fn test_missing_constructor_argument() {
        let mut value = base();
        value.as_object_mut().unwrap().remove("database");
        let err = PostgresReader::new(config(value)).err().unwrap();
        assert!(matches!(
            err,
            DataError::MissingParameter { ref parameter, .. } if parameter == "database"
        ));
    }

    #[test]
    fn test_pool_settings_default_and_override() {
        let reader = PostgresReader::new(config(base())).unwrap();
        let settings = reader.connector.settings();
        assert_eq!(settings.min_connections, 1);
        assert_eq!(settings.max_connections, 5);
        assert_eq!(settings.pool_options().get_max_lifetime(), None);

        let mut value = base();
        value["pooling"] = json!({"minconn": 2, "maxconn": 8});
        value["token_ttl"] = json!(900);
        let reader = PostgresReader::new(config(value)).unwrap();
        let options = reader.connector.settings().pool_options();
        assert_eq!(options.get_min_connections(), 2);
        assert_eq!(options.get_max_connections(), 8);
        assert_eq!(options.get_max_lifetime(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_min_above_max_is_rejected() {
        let mut value = base();
        value["pooling"] = json!({"minconn": 6, "maxconn": 2});
        assert!(matches!(
            PostgresReader::new(config(value)),
            Err(DataError::Configuration(_))
        ));
    }

    #[test]
    fn test_connect_options() {
        let mut value = base();
        value["sslmode"] = json!("require");
        let reader = PostgresReader::new(config(value)).unwrap();
        let options = reader.connector.settings().connect_options("secret").unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("hr"));

        let mut value = base();
        value["sslmode"] = json!("sometimes");
        let reader = PostgresReader::new(config(value)).unwrap();
        assert!(matches!(
            reader.connector.settings().connect_options("secret"),
            Err(DataError::Configuration(_))
        ));
    }

    #[test]
    fn test_iam_reader_builds_without_password() {
        let mut value = base();
        let block = value.as_object_mut().unwrap();
        block.remove("password");
        block.insert("iam_auth".into(), json!(true));
        block.insert("region".into(), json!("eu-west-1"));
        let reader = PostgresReader::new(config(value)).unwrap();
        assert!(reader.connector.settings().is_iam());
    }

    #[tokio::test]
    async fn test_fetch_without_query_fails_before_connecting() {
        let reader = PostgresReader::new(config(base())).unwrap();
        let err = reader.fetch(&QueryRequest::new()).await.unwrap_err();
        assert!(matches!(err, DataError::NoQueryProvided(_)));
        assert_eq!(reader.state().await, ReaderState::Uninitialized);

        let err = reader
            .execute(&QueryRequest::new().with_query("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::NoQueryProvided(_)));
    }

    #[tokio::test]
    async fn test_defaults_come_from_config() {
        let mut value = base();
        value["sql"] = json!("SELECT * FROM emp WHERE dept_id = $1");
        value["params"] = json!([10]);
        let reader = PostgresReader::new(config(value)).unwrap();
        assert_eq!(
            reader.default_query(),
            Some("SELECT * FROM emp WHERE dept_id = $1")
        );
        assert_eq!(reader.default_params(), &[ParamValue::Int(10)]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let reader = PostgresReader::new(config(base())).unwrap();
        reader.close().await.unwrap();
        reader.close().await.unwrap();
        assert_eq!(reader.state().await, ReaderState::Closed);

        let request = QueryRequest::new().with_query("SELECT 1");
        assert!(matches!(
            reader.fetch(&request).await,
            Err(DataError::ClosedReader(_))
        ));
        assert!(matches!(
            reader.connect().await,
            Err(DataError::ClosedReader(_))
        ));
        // Closed wins over a missing query
        assert!(matches!(
            reader.execute(&QueryRequest::new()).await,
            Err(DataError::ClosedReader(_))
        ));
    }
}
