//! Batched INSERT and UPDATE into one Oracle table.
//!
//! Rows are array-bound in chunks and each chunk commits on its own; a
//! failing chunk is rolled back and stops the write. Insert can fill a key
//! column from a block of ids reserved in the `SEQUENCES` counter table.

use crate::session::{self, OracleSettings};
use async_trait::async_trait;
use conduit_query::{
    column_positions, BackendKind, DataError, PoolId, PoolSlot, ReaderConfig, ReaderState, Result,
    Row, SequenceFill, Table, WriteMode, WriteRequest, WriteSummary, Writer,
};
use oracle::pool::Pool;
use oracle::sql_type::{OracleType, ToSql};
use oracle::{Connection, ErrorKind};
use serde_json::Value;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, error, info, warn};

const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Longest text bound as VARCHAR2; anything longer goes as a CLOB
const MAX_VARCHAR2_BYTES: usize = 4000;

const LOCK_SEQUENCE_SQL: &str =
    "SELECT LAST_THRESHOLD FROM SEQUENCES WHERE ENTITYNAME = :1 FOR UPDATE";
const ADVANCE_SEQUENCE_SQL: &str =
    "UPDATE SEQUENCES SET LAST_THRESHOLD = :1, LAST_CHANGED_AT = SYSDATE WHERE ENTITYNAME = :2";

/// Plain names stay bare and fold to upper case; others are quoted verbatim
fn ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'));
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn table_ident(table: &str) -> String {
    table.split('.').map(ident).collect::<Vec<_>>().join(".")
}

pub(crate) fn insert_sql(table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| ident(c)).collect();
    let binds: Vec<String> = (1..=columns.len()).map(|n| format!(":{}", n)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_ident(table),
        names.join(", "),
        binds.join(", ")
    )
}

/// SET values bind first, key values last
pub(crate) fn update_sql(table: &str, set_columns: &[String], keys: &[String]) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = :{}", ident(c), i + 1))
        .collect();
    let conditions: Vec<String> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = :{}", ident(k), set_columns.len() + i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {}",
        table_ident(table),
        assignments.join(", "),
        conditions.join(" AND ")
    )
}

/// Where one bind position takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Column(usize),
    Sequence,
}

/// Statement and bind layout of one write
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OraclePlan {
    target: String,
    mode: WriteMode,
    sql: String,
    binds: Vec<Source>,
    sequence: Option<SequenceFill>,
}

/// Bind type chosen for a whole column of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindKind {
    Int,
    Float,
    Text,
}

impl BindKind {
    /// Integers (and booleans as 1/0) bind as NUMBER, other numbers as
    /// BINARY_DOUBLE, everything else as text. All-null columns are text.
    fn of<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut kind: Option<BindKind> = None;
        for value in values {
            let this = match value {
                Value::Null => continue,
                Value::Bool(_) => BindKind::Int,
                Value::Number(n) if n.is_i64() => BindKind::Int,
                Value::Number(_) => BindKind::Float,
                _ => return BindKind::Text,
            };
            kind = Some(match (kind, this) {
                (Some(BindKind::Float), _) | (_, BindKind::Float) => BindKind::Float,
                _ => BindKind::Int,
            });
        }
        kind.unwrap_or(BindKind::Text)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
}

impl Bound {
    fn new(kind: BindKind, value: &Value) -> Self {
        match kind {
            BindKind::Int => Bound::Int(match value {
                Value::Bool(b) => Some(i64::from(*b)),
                other => other.as_i64(),
            }),
            BindKind::Float => Bound::Float(value.as_f64()),
            BindKind::Text => Bound::Text(match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }),
        }
    }

    fn as_sql(&self) -> &dyn ToSql {
        match self {
            Bound::Int(v) => v,
            Bound::Float(v) => v,
            Bound::Text(v) => v,
        }
    }
}

/// Column-major bind values of one chunk with their declared Oracle types
fn bind_columns(
    binds: &[Source],
    chunk: &[Row],
    first_id: Option<i64>,
) -> Vec<(OracleType, Vec<Bound>)> {
    binds
        .iter()
        .map(|source| match source {
            Source::Sequence => {
                let start = first_id.unwrap_or_default();
                let ids = (0..chunk.len() as i64)
                    .map(|i| Bound::Int(Some(start + i)))
                    .collect();
                (OracleType::Int64, ids)
            }
            Source::Column(idx) => {
                let cells = || chunk.iter().map(|row| row.get(*idx).unwrap_or(&Value::Null));
                let kind = BindKind::of(cells());
                let values: Vec<Bound> = cells().map(|v| Bound::new(kind, v)).collect();
                let oracle_type = match kind {
                    BindKind::Int => OracleType::Int64,
                    BindKind::Float => OracleType::BinaryDouble,
                    BindKind::Text => {
                        let longest = values
                            .iter()
                            .map(|b| match b {
                                Bound::Text(Some(s)) => s.len(),
                                _ => 0,
                            })
                            .max()
                            .unwrap_or(0);
                        if longest > MAX_VARCHAR2_BYTES {
                            OracleType::CLOB
                        } else {
                            OracleType::Varchar2(longest.max(1) as u32)
                        }
                    }
                };
                (oracle_type, values)
            }
        })
        .collect()
}

fn oracle_failure(sql: &str) -> impl Fn(oracle::Error) -> DataError + '_ {
    move |e| {
        error!("Oracle write statement failed: {}", e);
        DataError::query_failed(e, sql)
    }
}

/// Reserve `count` ids for `sequence`; returns the first one
fn allocate_ids(conn: &Connection, sequence: &SequenceFill, count: usize) -> Result<i64> {
    let last: i64 = match conn.query_row_as::<i64>(LOCK_SEQUENCE_SQL, &[&sequence.entity]) {
        Ok(last) => last,
        Err(e) if matches!(e.kind(), ErrorKind::NoDataFound) => {
            return Err(DataError::configuration(format!(
                "No SEQUENCES row for entity '{}'",
                sequence.entity
            )));
        }
        Err(e) => return Err(oracle_failure(LOCK_SEQUENCE_SQL)(e)),
    };
    let next = last + count as i64;

    let advanced = conn
        .execute(ADVANCE_SEQUENCE_SQL, &[&next, &sequence.entity])
        .and_then(|_| conn.commit());
    if let Err(e) = advanced {
        let _ = conn.rollback();
        return Err(oracle_failure(ADVANCE_SEQUENCE_SQL)(e));
    }

    debug!(
        "Reserved ids {}..={} of sequence '{}'",
        last + 1,
        next,
        sequence.entity
    );
    Ok(last + 1)
}

fn write_chunk(conn: &Connection, plan: &OraclePlan, chunk: &[Row], first_id: Option<i64>) -> oracle::Result<()> {
    let columns = bind_columns(&plan.binds, chunk, first_id);
    let mut batch = conn.batch(&plan.sql, chunk.len().max(1)).build()?;
    for (pos, (oracle_type, _)) in columns.iter().enumerate() {
        batch.set_type(pos + 1, oracle_type)?;
    }
    for row in 0..chunk.len() {
        let refs: Vec<&dyn ToSql> = columns.iter().map(|(_, values)| values[row].as_sql()).collect();
        batch.append_row(&refs)?;
    }
    batch.execute()
}

/// Runs on the blocking pool; returns the number of committed chunks
fn write_blocking(pool: &Pool, plan: &OraclePlan, rows: &[Row], chunk_size: usize) -> Result<usize> {
    let conn = pool
        .get()
        .map_err(|e| DataError::ConnectionFailed(format!("Failed to acquire session: {}", e)))?;

    let first_id = match &plan.sequence {
        Some(sequence) => Some(allocate_ids(&conn, sequence, rows.len())?),
        None => None,
    };

    let mut batches = 0;
    for (n, chunk) in rows.chunks(chunk_size).enumerate() {
        let chunk_first = first_id.map(|id| id + (n * chunk_size) as i64);
        if let Err(e) = write_chunk(&conn, plan, chunk, chunk_first).and_then(|_| conn.commit()) {
            error!(
                "Oracle {} of {} failed at chunk {}; rolling back: {}",
                plan.mode,
                plan.target,
                n + 1,
                e
            );
            if let Err(rollback) = conn.rollback() {
                error!("Rollback of write to {} failed: {}", plan.target, rollback);
            }
            return Err(DataError::query_failed(e, &plan.sql));
        }
        batches += 1;
        debug!("Committed chunk {} ({} rows) to {}", n + 1, chunk.len(), plan.target);
    }
    Ok(batches)
}

/// Oracle writer: insert or update by key columns
pub struct OracleWriter {
    settings: OracleSettings,
    table: Option<String>,
    mode: Option<WriteMode>,
    pk_cols: Vec<String>,
    sequence: Option<SequenceFill>,
    chunk_size: Option<usize>,
    pool: PoolSlot<Arc<Pool>>,
}

impl OracleWriter {
    /// Build a writer from merged configuration; no session is opened
    pub fn new(config: ReaderConfig) -> Result<Self> {
        let settings = OracleSettings::from_config(&config)?;
        let mode = config
            .get_str("mode")
            .map(|m| m.parse::<WriteMode>())
            .transpose()?;
        let sequence = match (config.get_str("pk_col"), config.get_str("sequence_name")) {
            (Some(column), Some(entity)) => Some(SequenceFill::new(column, entity)),
            (None, None) => None,
            _ => {
                return Err(DataError::configuration(
                    "pk_col and sequence_name must be given together",
                ))
            }
        };

        Ok(Self {
            pool: PoolSlot::new(settings.label("writer")),
            table: config.get_str("table"),
            mode,
            pk_cols: config.get_str_list("pk_cols"),
            sequence,
            chunk_size: config
                .get_u64("chunk_size")?
                .and_then(|n| usize::try_from(n).ok()),
            settings,
        })
    }

    /// Validate the request against the data; never touches the database
    fn plan(&self, table: &Table, request: &WriteRequest) -> Result<OraclePlan> {
        let backend = BackendKind::Oracle.as_str();
        let target = request
            .effective_table(self.table.as_deref())
            .ok_or_else(|| DataError::missing_parameter(backend, "table"))?
            .to_string();
        let mode = request
            .mode
            .or(self.mode)
            .ok_or_else(|| DataError::missing_parameter(backend, "mode"))?;
        let columns: Vec<String> = table
            .schema
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        match mode {
            WriteMode::Insert => {
                let sequence = request.sequence.clone().or_else(|| self.sequence.clone());
                let mut names = columns.clone();
                let mut binds: Vec<Source> = (0..columns.len()).map(Source::Column).collect();
                if let Some(seq) = &sequence {
                    match table.schema.position(&seq.column) {
                        Some(idx) => binds[idx] = Source::Sequence,
                        None => {
                            names.push(seq.column.clone());
                            binds.push(Source::Sequence);
                        }
                    }
                }
                Ok(OraclePlan {
                    sql: insert_sql(&target, &names),
                    target,
                    mode,
                    binds,
                    sequence,
                })
            }
            WriteMode::Update => {
                let keys = if request.key_columns.is_empty() {
                    self.pk_cols.clone()
                } else {
                    request.key_columns.clone()
                };
                if keys.is_empty() {
                    return Err(DataError::missing_parameter(backend, "pk_cols"));
                }
                let key_positions =
                    column_positions(&table.schema, &keys, &format!("update of {}", target))?;

                let set_positions: Vec<usize> = (0..columns.len())
                    .filter(|idx| !key_positions.contains(idx))
                    .collect();
                if set_positions.is_empty() {
                    return Err(DataError::configuration(format!(
                        "update of {} has no columns besides the key columns",
                        target
                    )));
                }
                let set_columns: Vec<String> =
                    set_positions.iter().map(|idx| columns[*idx].clone()).collect();

                let binds = set_positions
                    .iter()
                    .chain(key_positions.iter())
                    .map(|idx| Source::Column(*idx))
                    .collect();
                Ok(OraclePlan {
                    sql: update_sql(&target, &set_columns, &keys),
                    target,
                    mode,
                    binds,
                    sequence: None,
                })
            }
            WriteMode::Merge => Err(DataError::UnsupportedWriteMode {
                backend: backend.to_string(),
                mode: mode.to_string(),
            }),
        }
    }

    async fn pool(&self) -> Result<(Arc<Pool>, PoolId)> {
        self.pool
            .get_or_init_with_id(|| self.settings.create_pool())
            .await
    }
}

#[async_trait]
impl Writer for OracleWriter {
    fn backend(&self) -> BackendKind {
        BackendKind::Oracle
    }

    async fn state(&self) -> ReaderState {
        self.pool.state().await
    }

    async fn connect(&self) -> Result<PoolId> {
        self.pool().await.map(|(_, id)| id)
    }

    async fn write(&self, table: &Table, request: &WriteRequest) -> Result<WriteSummary> {
        self.pool.ensure_open().await?;
        let plan = self.plan(table, request)?;
        if table.is_empty() {
            warn!("No rows to write to {}; skipping", plan.target);
            return Ok(WriteSummary::skipped(plan.target));
        }

        let chunk_size = request.effective_chunk_size(self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE));
        info!(
            "Writing {} rows to {} ({}, {} rows per chunk)",
            table.rows.len(),
            plan.target,
            plan.mode,
            chunk_size
        );

        let (pool, _) = self.pool().await?;
        let start = std::time::Instant::now();
        let rows = table.rows.clone();
        let target = plan.target.clone();
        let batches = task::spawn_blocking(move || write_blocking(&pool, &plan, &rows, chunk_size))
            .await
            .map_err(|e| DataError::QueryFailed(format!("Write task failed: {}", e)))??;

        let summary = WriteSummary {
            target,
            rows_written: table.rows.len(),
            batches,
            execution_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Wrote {} rows to {} in {} chunks ({}ms)",
            summary.rows_written, summary.target, summary.batches, summary.execution_ms
        );
        Ok(summary)
    }

    async fn close(&self) -> Result<()> {
        match self.pool.close().await {
            Some(pool) => session::close_pool(pool, &self.settings.dsn).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_query::{ConfigMap, DatasetSchema, FieldDef, FieldType};
    use serde_json::json;

    fn config(value: Value) -> ReaderConfig {
        let values: ConfigMap = value.as_object().unwrap().clone();
        ReaderConfig::new(BackendKind::Oracle, values)
    }

    fn base() -> Value {
        json!({
            "db_type": "oracle",
            "dsn": "ora:1521/SVC",
            "external_auth": true,
            "table": "HR.EMP"
        })
    }

    fn emp() -> Table {
        let schema = DatasetSchema::new(vec![
            FieldDef::new("EMPNO", FieldType::Int64),
            FieldDef::new("ENAME", FieldType::String),
            FieldDef::new("SAL", FieldType::Float64),
        ]);
        let rows = vec![
            vec![json!(7369), json!("SMITH"), json!(800.5)],
            vec![json!(7499), json!("ALLEN"), json!(1600)],
        ];
        Table::new(schema, rows, 0)
    }

    #[test]
    fn test_insert_and_update_sql() {
        let columns = vec!["EMPNO".to_string(), "ENAME".to_string()];
        assert_eq!(
            insert_sql("HR.EMP", &columns),
            "INSERT INTO HR.EMP (EMPNO, ENAME) VALUES (:1, :2)"
        );
        assert_eq!(
            update_sql("emp", &["ENAME".into(), "SAL".into()], &["EMPNO".into(), "DEPTNO".into()]),
            "UPDATE emp SET ENAME = :1, SAL = :2 WHERE EMPNO = :3 AND DEPTNO = :4"
        );
        assert_eq!(ident("last name"), "\"last name\"");
        assert_eq!(ident("_x"), "\"_x\"");
    }

    #[test]
    fn test_bind_kinds() {
        assert_eq!(BindKind::of([json!(1), Value::Null, json!(true)].iter()), BindKind::Int);
        assert_eq!(BindKind::of([json!(1), json!(2.5)].iter()), BindKind::Float);
        assert_eq!(BindKind::of([json!(1), json!("x")].iter()), BindKind::Text);
        assert_eq!(BindKind::of([Value::Null].iter()), BindKind::Text);
    }

    #[test]
    fn test_bind_columns_types_and_ids() {
        let table = emp();
        let binds = vec![Source::Sequence, Source::Column(1), Source::Column(2)];
        let columns = bind_columns(&binds, &table.rows, Some(101));

        assert_eq!(columns[0].0, OracleType::Int64);
        assert_eq!(columns[0].1, vec![Bound::Int(Some(101)), Bound::Int(Some(102))]);
        assert_eq!(columns[1].0, OracleType::Varchar2(5));
        assert_eq!(columns[2].0, OracleType::BinaryDouble);
        assert_eq!(columns[2].1[1], Bound::Float(Some(1600.0)));
    }

    #[test]
    fn test_long_text_binds_as_clob() {
        let rows = vec![vec![json!("x".repeat(MAX_VARCHAR2_BYTES + 1))], vec![Value::Null]];
        let columns = bind_columns(&[Source::Column(0)], &rows, None);
        assert_eq!(columns[0].0, OracleType::CLOB);
        assert_eq!(columns[0].1[1], Bound::Text(None));
    }

    #[test]
    fn test_update_plan_binds_keys_last() {
        let writer = OracleWriter::new(config(base())).unwrap();
        let request = WriteRequest::new()
            .with_mode(WriteMode::Update)
            .with_key_columns(["EMPNO"]);
        let plan = writer.plan(&emp(), &request).unwrap();
        assert_eq!(plan.sql, "UPDATE HR.EMP SET ENAME = :1, SAL = :2 WHERE EMPNO = :3");
        assert_eq!(
            plan.binds,
            vec![Source::Column(1), Source::Column(2), Source::Column(0)]
        );
    }

    #[test]
    fn test_insert_plan_with_sequence_column() {
        let mut value = base();
        value["mode"] = json!("insert");
        value["pk_col"] = json!("ID_REC");
        value["sequence_name"] = json!("EMP");
        let writer = OracleWriter::new(config(value)).unwrap();

        let plan = writer.plan(&emp(), &WriteRequest::new()).unwrap();
        assert_eq!(
            plan.sql,
            "INSERT INTO HR.EMP (EMPNO, ENAME, SAL, ID_REC) VALUES (:1, :2, :3, :4)"
        );
        assert_eq!(plan.binds.last(), Some(&Source::Sequence));
        assert_eq!(plan.sequence, Some(SequenceFill::new("ID_REC", "EMP")));

        // an existing column is overwritten in place
        let request = WriteRequest::new().with_sequence(SequenceFill::new("EMPNO", "EMP"));
        let plan = writer.plan(&emp(), &request).unwrap();
        assert_eq!(plan.binds[0], Source::Sequence);
        assert_eq!(plan.binds.len(), 3);
    }

    #[test]
    fn test_plan_rejections() {
        let writer = OracleWriter::new(config(base())).unwrap();

        let err = writer.plan(&emp(), &WriteRequest::new()).unwrap_err();
        assert!(matches!(err, DataError::MissingParameter { ref parameter, .. } if parameter == "mode"));

        let err = writer
            .plan(&emp(), &WriteRequest::new().with_mode(WriteMode::Merge))
            .unwrap_err();
        assert!(matches!(err, DataError::UnsupportedWriteMode { .. }));

        let err = writer
            .plan(&emp(), &WriteRequest::new().with_mode(WriteMode::Update))
            .unwrap_err();
        assert!(matches!(err, DataError::MissingParameter { ref parameter, .. } if parameter == "pk_cols"));

        let request = WriteRequest::new()
            .with_mode(WriteMode::Update)
            .with_key_columns(["EMPNO", "DEPTNO"]);
        let err = writer.plan(&emp(), &request).unwrap_err();
        assert_eq!(err.missing_fields(), ["DEPTNO"]);
    }

    #[test]
    fn test_half_configured_sequence_rejected() {
        let mut value = base();
        value["pk_col"] = json!("ID_REC");
        assert!(matches!(
            OracleWriter::new(config(value)),
            Err(DataError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_table_skipped_and_closed_writer_rejected() {
        let writer = OracleWriter::new(config(base())).unwrap();
        let request = WriteRequest::new().with_mode(WriteMode::Insert);
        let summary = writer.write(&Table::empty(), &request).await.unwrap();
        assert_eq!(summary, WriteSummary::skipped("HR.EMP"));
        assert_eq!(writer.state().await, ReaderState::Uninitialized);

        writer.close().await.unwrap();
        assert!(matches!(
            writer.write(&emp(), &request).await,
            Err(DataError::ClosedReader(_))
        ));
    }
}
