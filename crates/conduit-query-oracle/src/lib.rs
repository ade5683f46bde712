//! Oracle reader and writer for conduit-query
//!
//! The driver is blocking; every pool and statement call runs on the tokio
//! blocking pool.

mod filter;
mod session;
mod writer;

pub use filter::OraclePropertyFilter;
pub use writer::OracleWriter;

use async_trait::async_trait;
use conduit_query::{
    BackendKind, DataError, DatasetSchema, FieldDef, FieldType, ParamValue, PoolId, PoolSlot,
    QueryRequest, Reader, ReaderConfig, ReaderState, Result, Row, Table,
};
use oracle::pool::Pool;
use oracle::sql_type::{OracleType, ToSql};
use oracle::SqlValue;
use session::OracleSettings;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, error, warn};

/// Oracle reader implementation
pub struct OracleReader {
    settings: OracleSettings,
    query: Option<String>,
    params: Vec<ParamValue>,
    pool: PoolSlot<Arc<Pool>>,
}

impl OracleReader {
    /// Build a reader from merged configuration; no session is opened
    pub fn new(config: ReaderConfig) -> Result<Self> {
        let settings = OracleSettings::from_config(&config)?;
        Ok(Self {
            pool: PoolSlot::new(settings.label("reader")),
            query: config.get_str("sql"),
            params: config.params(),
            settings,
        })
    }

    async fn pool(&self) -> Result<(Arc<Pool>, PoolId)> {
        self.pool
            .get_or_init_with_id(|| self.settings.create_pool())
            .await
    }

    /// Closed check, then effective query, then pool
    async fn run(&self, request: &QueryRequest) -> Result<(Vec<FieldDef>, Vec<Row>)> {
        self.pool.ensure_open().await?;
        let sql = request
            .effective_query(self.query.as_deref())
            .ok_or_else(|| DataError::NoQueryProvided(BackendKind::Oracle.to_string()))?
            .to_string();
        let params = request.effective_params(&self.params).to_vec();
        let (pool, _) = self.pool().await?;

        debug!("Executing SQL with {} parameters: {}", params.len(), sql);

        task::spawn_blocking(move || run_statement(&pool, &sql, &params))
            .await
            .map_err(|e| DataError::QueryFailed(format!("Query task failed: {}", e)))?
    }
}

/// Check out a session, run one statement and return it to the pool
fn run_statement(
    pool: &Pool,
    sql: &str,
    params: &[ParamValue],
) -> Result<(Vec<FieldDef>, Vec<Row>)> {
    let conn = pool
        .get()
        .map_err(|e| DataError::ConnectionFailed(format!("Failed to acquire session: {}", e)))?;

    let bound = bind_params(params);
    let refs: Vec<&dyn ToSql> = bound.iter().map(|p| p.as_ref()).collect();

    let fail = |e: oracle::Error| {
        error!("Oracle SQL execution failed: {}", e);
        DataError::query_failed(e, sql)
    };

    let mut stmt = conn.statement(sql).build().map_err(fail)?;

    if !stmt.is_query() {
        stmt.execute(&refs).map_err(fail)?;
        conn.commit().map_err(fail)?;
        return Ok((Vec::new(), Vec::new()));
    }

    let result_set = stmt.query(&refs).map_err(fail)?;
    let fields: Vec<FieldDef> = result_set
        .column_info()
        .iter()
        .map(|info| FieldDef::new(info.name(), map_oracle_type(info.oracle_type())))
        .collect();

    let mut rows = Vec::new();
    for row in result_set {
        let row = row.map_err(fail)?;
        rows.push(row.sql_values().iter().map(extract_value).collect());
    }

    Ok((fields, rows))
}

fn bind_params(params: &[ParamValue]) -> Vec<Box<dyn ToSql>> {
    params
        .iter()
        .map(|param| -> Box<dyn ToSql> {
            match param {
                ParamValue::Null => Box::new(None::<String>),
                // No SQL boolean before 23c; bind as 1/0
                ParamValue::Bool(v) => Box::new(i64::from(*v)),
                ParamValue::Int(v) => Box::new(*v),
                ParamValue::Float(v) => Box::new(*v),
                ParamValue::Text(v) => Box::new(v.clone()),
            }
        })
        .collect()
}

fn map_oracle_type(oracle_type: &OracleType) -> FieldType {
    match oracle_type {
        OracleType::Number(_, 0) | OracleType::Int64 => FieldType::Int64,
        OracleType::Number(_, _) | OracleType::Float(_) | OracleType::BinaryDouble => {
            FieldType::Float64
        }
        OracleType::BinaryFloat => FieldType::Float32,
        OracleType::Date => FieldType::Date,
        OracleType::Timestamp(_) | OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
            FieldType::Timestamp
        }
        OracleType::Raw(_) | OracleType::BLOB | OracleType::LongRaw => FieldType::Bytes,
        OracleType::Boolean => FieldType::Boolean,
        _ => FieldType::String,
    }
}

fn extract_value(value: &SqlValue) -> serde_json::Value {
    let converted = match value.oracle_type() {
        Ok(OracleType::Number(_, 0)) | Ok(OracleType::Int64) => value
            .get::<Option<i64>>()
            .map(|v| v.map(serde_json::Value::from)),
        Ok(OracleType::Number(_, _))
        | Ok(OracleType::Float(_))
        | Ok(OracleType::BinaryDouble)
        | Ok(OracleType::BinaryFloat) => value.get::<Option<f64>>().map(|v| {
            v.and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
        }),
        Ok(OracleType::Boolean) => value
            .get::<Option<bool>>()
            .map(|v| v.map(serde_json::Value::Bool)),
        _ => value
            .get::<Option<String>>()
            .map(|v| v.map(serde_json::Value::String)),
    };

    match converted {
        Ok(v) => v.unwrap_or(serde_json::Value::Null),
        Err(e) => {
            warn!("Unreadable Oracle value, using null: {}", e);
            serde_json::Value::Null
        }
    }
}

#[async_trait]
impl Reader for OracleReader {
    fn backend(&self) -> BackendKind {
        BackendKind::Oracle
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
        let (_, rows) = self.run(request).await?;
        Ok(rows)
    }

    async fn fetch(&self, request: &QueryRequest) -> Result<Table> {
        let start = std::time::Instant::now();
        let (fields, rows) = self.run(request).await?;
        let execution_ms = start.elapsed().as_millis() as u64;

        let table = Table::new(DatasetSchema::new(fields), rows, execution_ms);
        debug!(
            "Fetched {} rows from Oracle in {}ms",
            table.stats.row_count, execution_ms
        );
        Ok(table)
    }

    async fn close(&self) -> Result<()> {
        match self.pool.close().await {
            Some(pool) => session::close_pool(pool, &self.settings.dsn).await,
            None => Ok(()),
        }
    }
}
