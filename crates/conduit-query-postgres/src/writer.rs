//! Batched INSERT, UPDATE and MERGE into one PostgreSQL table.
//!
//! Every write runs in a single transaction: all chunks commit together or
//! the whole write rolls back. Bound values are cast to the target column
//! types read from the catalog, so JSON text cells land in date, numeric or
//! enum columns the same way a literal would.

use crate::connection::{PgConnector, PgSettings};
use crate::describe_error;
use async_trait::async_trait;
use conduit_query::{
    column_positions, BackendKind, DataError, PoolId, PoolSlot, ReaderConfig, ReaderState, Result,
    Table, WriteMode, WriteRequest, WriteSummary, Writer, DEFAULT_MERGE_KEY,
};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, Postgres};
use sqlx::query::Query;
use sqlx::Row as _;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Upper bound on bind parameters in one PostgreSQL statement
const MAX_BIND_PARAMS: usize = 65_535;

const COLUMN_TYPES_SQL: &str = "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
     FROM pg_attribute a \
     WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped";

/// Names that fold to lower case unquoted are left bare; anything else is quoted
fn ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Schema-qualified table names are split on `.` and each part handled by `ident`
fn table_ident(table: &str) -> String {
    table.split('.').map(ident).collect::<Vec<_>>().join(".")
}

fn column_list(columns: &[String], prefix: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{}{}", prefix, ident(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Statement shape of one write, independent of how many rows a chunk carries
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WritePlan {
    table: String,
    mode: WriteMode,
    columns: Vec<String>,
    keys: Vec<String>,
    casts: Vec<Option<String>>,
}

impl WritePlan {
    pub fn new(table: &str, mode: WriteMode, columns: Vec<String>, keys: Vec<String>) -> Self {
        let casts = vec![None; columns.len()];
        Self {
            table: table.to_string(),
            mode,
            columns,
            keys,
            casts,
        }
    }

    /// Cast each bound value to its target column type, where the target has the column
    pub fn with_column_types(mut self, types: &HashMap<String, String>) -> Self {
        self.casts = self
            .columns
            .iter()
            .map(|c| {
                types
                    .get(c)
                    .or_else(|| types.get(&c.to_lowercase()))
                    .cloned()
            })
            .collect();
        self
    }

    fn set_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !self.keys.contains(c))
            .cloned()
            .collect()
    }

    /// Rows per statement: the requested size, capped by the bind parameter limit
    pub fn rows_per_statement(&self, requested: usize) -> usize {
        let cap = (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1);
        requested.clamp(1, cap)
    }

    fn values(&self, rows: usize) -> String {
        let width = self.columns.len();
        (0..rows)
            .map(|row| {
                let cells = (0..width)
                    .map(|col| {
                        let n = row * width + col + 1;
                        match &self.casts[col] {
                            Some(ty) => format!("${}::{}", n, ty),
                            None => format!("${}", n),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", cells)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn statement(&self, rows: usize) -> String {
        let table = table_ident(&self.table);
        let columns = column_list(&self.columns, "");

        if self.mode == WriteMode::Insert {
            return format!(
                "INSERT INTO {} ({}) VALUES {}",
                table,
                columns,
                self.values(rows)
            );
        }

        let on = self
            .keys
            .iter()
            .map(|k| format!("tgt.{} = src.{}", ident(k), ident(k)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let set = self
            .set_columns()
            .iter()
            .map(|c| format!("{} = src.{}", ident(c), ident(c)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "MERGE INTO {} AS tgt USING (VALUES {}) AS src ({}) ON {}",
            table,
            self.values(rows),
            columns,
            on
        );
        if set.is_empty() {
            sql.push_str(" WHEN MATCHED THEN DO NOTHING");
        } else {
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", set));
        }
        if self.mode == WriteMode::Merge {
            sql.push_str(&format!(
                " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
                columns,
                column_list(&self.columns, "src.")
            ));
        }
        sql
    }

    /// Short form used in error messages instead of the full placeholder list
    pub fn describe(&self) -> String {
        match self.mode {
            WriteMode::Insert => format!("INSERT INTO {}", self.table),
            mode => format!("{} INTO {} ON ({})", mode, self.table, self.keys.join(", ")),
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
    }
}

/// PostgreSQL writer implementation
pub struct PostgresWriter {
    connector: PgConnector,
    table: Option<String>,
    merge_on: Vec<String>,
    chunk_size: Option<usize>,
    pool: PoolSlot<PgPool>,
}

impl PostgresWriter {
    /// Build a writer from merged configuration; no connection is opened
    pub fn new(config: ReaderConfig) -> Result<Self> {
        let settings = PgSettings::from_config(&config)?;
        let label = settings.label("writer");
        debug!("Created {}", label);

        Ok(Self {
            connector: PgConnector::new(settings),
            table: config.get_str("table"),
            merge_on: config.get_str_list("merge_on"),
            chunk_size: config
                .get_u64("chunk_size")?
                .and_then(|n| usize::try_from(n).ok()),
            pool: PoolSlot::new(label),
        })
    }

    /// Call-time keys, else configured `merge_on`, else `id_rec`
    fn key_columns(&self, request: &WriteRequest) -> Vec<String> {
        if !request.key_columns.is_empty() {
            request.key_columns.clone()
        } else if !self.merge_on.is_empty() {
            self.merge_on.clone()
        } else {
            vec![DEFAULT_MERGE_KEY.to_string()]
        }
    }

    /// Everything a write needs short of a connection; fails before connecting
    fn plan(&self, table: &Table, request: &WriteRequest) -> Result<(WritePlan, Vec<usize>)> {
        let target = request
            .effective_table(self.table.as_deref())
            .ok_or_else(|| DataError::missing_parameter(BackendKind::Postgres.as_str(), "table"))?;
        let mode = request.mode.unwrap_or(WriteMode::Merge);

        let columns: Vec<String> = table
            .schema
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let positions: Vec<usize> = (0..columns.len()).collect();

        let keys = match mode {
            WriteMode::Insert => Vec::new(),
            WriteMode::Update | WriteMode::Merge => {
                let keys = self.key_columns(request);
                column_positions(&table.schema, &keys, &format!("{} of {}", mode, target))?;
                keys
            }
        };

        let plan = WritePlan::new(target, mode, columns, keys);
        if mode == WriteMode::Update && plan.set_columns().is_empty() {
            return Err(DataError::configuration(format!(
                "update of {} has no columns besides the key columns",
                target
            )));
        }
        Ok((plan, positions))
    }

    async fn pool(&self) -> Result<(PgPool, PoolId)> {
        let (pool, id) = self
            .pool
            .get_or_init_with_id(|| self.connector.create_pool())
            .await?;
        self.connector.refresh_credentials(&pool).await?;
        Ok((pool, id))
    }

    async fn column_types(pool: &PgPool, table: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(COLUMN_TYPES_SQL)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(|e| DataError::query_failed(describe_error(&e), COLUMN_TYPES_SQL))?;
        if rows.is_empty() {
            return Err(DataError::QueryFailed(format!(
                "Target table '{}' does not exist",
                table
            )));
        }

        let mut types = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row
                .try_get(0)
                .map_err(|e| DataError::query_failed(e, COLUMN_TYPES_SQL))?;
            let ty: String = row
                .try_get(1)
                .map_err(|e| DataError::query_failed(e, COLUMN_TYPES_SQL))?;
            types.insert(name, ty);
        }
        Ok(types)
    }
}

#[async_trait]
impl Writer for PostgresWriter {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn state(&self) -> ReaderState {
        self.pool.state().await
    }

    async fn connect(&self) -> Result<PoolId> {
        self.pool().await.map(|(_, id)| id)
    }

    async fn write(&self, table: &Table, request: &WriteRequest) -> Result<WriteSummary> {
        self.pool.ensure_open().await?;
        let target = request
            .effective_table(self.table.as_deref())
            .ok_or_else(|| DataError::missing_parameter(BackendKind::Postgres.as_str(), "table"))?
            .to_string();
        if table.is_empty() {
            warn!("No rows to write to {}; skipping", target);
            return Ok(WriteSummary::skipped(target));
        }
        if request.sequence.is_some() {
            warn!("Sequence fill is not used by the PostgreSQL writer; ignoring it");
        }

        let (plan, positions) = self.plan(table, request)?;
        let (pool, _) = self.pool().await?;
        let plan = plan.with_column_types(&Self::column_types(&pool, &target).await?);

        let requested = request.effective_chunk_size(self.chunk_size.unwrap_or(table.rows.len()));
        let per_statement = plan.rows_per_statement(requested);
        info!(
            "Writing {} rows to {} ({}, {} rows per statement)",
            table.rows.len(),
            target,
            plan.mode,
            per_statement
        );

        let start = std::time::Instant::now();
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| DataError::ConnectionFailed(describe_error(&e)))?;

        let mut batches = 0;
        for chunk in table.rows.chunks(per_statement) {
            let sql = plan.statement(chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for idx in &positions {
                    query = bind_value(query, row.get(*idx).unwrap_or(&Value::Null));
                }
            }

            if let Err(e) = query.execute(&mut *tx).await {
                error!("PostgreSQL write to {} failed; rolling back: {}", target, e);
                if let Err(rollback) = tx.rollback().await {
                    error!("Rollback of write to {} failed: {}", target, rollback);
                }
                return Err(DataError::query_failed(describe_error(&e), &plan.describe()));
            }
            batches += 1;
        }

        tx.commit()
            .await
            .map_err(|e| DataError::query_failed(describe_error(&e), &plan.describe()))?;

        let summary = WriteSummary {
            target,
            rows_written: table.rows.len(),
            batches,
            execution_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Wrote {} rows to {} in {} statements ({}ms)",
            summary.rows_written, summary.target, summary.batches, summary.execution_ms
        );
        Ok(summary)
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.close().await {
            pool.close().await;
            let settings = self.connector.settings();
            info!(
                "Closed PostgreSQL writer pool for {}:{}/{}",
                settings.host, settings.port, settings.database
            );
        }
        Ok(())
    }
}
