#![allow(dead_code)]

use async_trait::async_trait;
use conduit_query::{
    BackendKind, DataError, DatasetSchema, ParamValue, PoolId, PoolSlot, QueryRequest, Reader,
    ReaderConfig, ReaderState, Result, Row, Table, WriteRequest, WriteSummary, Writer,
};
use conduit_readers::{ConnectionFactory, ReaderEntry, ReaderRegistry};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const DOCUMENT: &str = r#"
DEV:
  db_type: postgres
  host: dev-db.internal
  port: 5432
  user: app
  password: dev-password
  database: hr
  pooling:
    minconn: 1
    maxconn: 3
  application_name: etl
  colour: blue
QA:
  db_type: postgres
  host: qa-db.internal
  port: 5432
  user: app
  database: hr
PROD:
  postgres:
    db_type: postgres
    host: prod-db.internal
    port: 5432
    user: app
    password: prod-password
    database: hr
    sql: SELECT * FROM emp
  oracle:
    db_type: oracle
    dsn: prod-ora:1521/HR
    user: scott
    password: tiger
    pooling: {min: 2, max: 8, increment: 2}
  s3:
    bucket: prod-exports
    prefix: /daily/
    region_name: eu-west-1
    endpoint_url: http://127.0.0.1:9000
    format: parquet
"#;

/// Configuration document written to a temporary directory
pub struct Fixture {
    _dir: TempDir,
    pub path: PathBuf,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db_config.yml");
    std::fs::write(&path, DOCUMENT).unwrap();
    Fixture { _dir: dir, path }
}

pub struct FakePool;

/// Reader double that records what it was built with and asked to do
pub struct MockReader {
    pub kind: BackendKind,
    pub config: ReaderConfig,
    pub pools_created: Arc<AtomicUsize>,
    pub requests: Mutex<Vec<QueryRequest>>,
    query: Option<String>,
    params: Vec<ParamValue>,
    pool: PoolSlot<Arc<FakePool>>,
}

impl MockReader {
    pub fn new(config: ReaderConfig, pools_created: Arc<AtomicUsize>) -> Self {
        Self {
            kind: config.kind(),
            query: config.get_str("sql"),
            params: config.params(),
            pool: PoolSlot::new(format!("mock {}", config.kind())),
            config,
            pools_created,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn pool(&self) -> Result<Arc<FakePool>> {
        self.pool_with_id().await.map(|(pool, _)| pool)
    }

    async fn pool_with_id(&self) -> Result<(Arc<FakePool>, PoolId)> {
        self.pool
            .get_or_init_with_id(|| async {
                self.pools_created.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakePool))
            })
            .await
    }
}

#[async_trait]
impl Reader for MockReader {
    fn backend(&self) -> BackendKind {
        self.kind
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
        self.pool_with_id().await.map(|(_, id)| id)
    }

    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Row>> {
        self.pool.ensure_open().await?;
        let query = request
            .effective_query(self.query.as_deref())
            .ok_or_else(|| DataError::NoQueryProvided(self.kind.to_string()))?
            .to_string();
        let params = request.effective_params(&self.params).to_vec();
        self.pool().await?;
        self.requests.lock().unwrap().push(request.clone());

        let mut row = vec![serde_json::Value::String(query)];
        row.extend(params.iter().map(ParamValue::to_json));
        Ok(vec![row])
    }

    async fn fetch(&self, request: &QueryRequest) -> Result<Table> {
        let rows = self.execute(request).await?;
        let columns: Vec<String> = (0..rows[0].len()).map(|i| format!("c{}", i)).collect();
        Ok(Table::new(DatasetSchema::infer(&columns, &rows), rows, 0))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Writer double that keeps every table and request it is given
pub struct MockWriter {
    pub kind: BackendKind,
    pub config: ReaderConfig,
    pub pools_created: Arc<AtomicUsize>,
    pub writes: Mutex<Vec<(Table, WriteRequest)>>,
    pool: PoolSlot<Arc<FakePool>>,
}

impl MockWriter {
    pub fn new(config: ReaderConfig, pools_created: Arc<AtomicUsize>) -> Self {
        Self {
            kind: config.kind(),
            pool: PoolSlot::new(format!("mock {} writer", config.kind())),
            config,
            pools_created,
            writes: Mutex::new(Vec::new()),
        }
    }

    async fn pool_with_id(&self) -> Result<(Arc<FakePool>, PoolId)> {
        self.pool
            .get_or_init_with_id(|| async {
                self.pools_created.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakePool))
            })
            .await
    }
}

#[async_trait]
impl Writer for MockWriter {
    fn backend(&self) -> BackendKind {
        self.kind
    }

    async fn state(&self) -> ReaderState {
        self.pool.state().await
    }

    async fn connect(&self) -> Result<PoolId> {
        self.pool_with_id().await.map(|(_, id)| id)
    }

    async fn write(&self, table: &Table, request: &WriteRequest) -> Result<WriteSummary> {
        self.pool.ensure_open().await?;
        self.pool_with_id().await?;
        let target = request
            .effective_table(self.config.get_str("table").as_deref())
            .unwrap_or("mock")
            .to_string();
        self.writes
            .lock()
            .unwrap()
            .push((table.clone(), request.clone()));
        Ok(WriteSummary {
            target,
            rows_written: table.rows.len(),
            batches: 1,
            execution_ms: 0,
        })
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Built-in filters with mock constructors
pub fn mock_registry(pools_created: Arc<AtomicUsize>) -> ReaderRegistry {
    let mut registry = ReaderRegistry::empty();
    for kind in BackendKind::ALL {
        let readers = pools_created.clone();
        let writers = pools_created.clone();
        let entry = ReaderEntry {
            filter: ReaderEntry::builtin(kind).filter,
            constructor: Arc::new(move |config| {
                Ok(Box::new(MockReader::new(config, readers.clone())) as Box<dyn Reader>)
            }),
            writer: None,
        }
        .with_writer(move |config| {
            Ok(Box::new(MockWriter::new(config, writers.clone())) as Box<dyn Writer>)
        });
        registry.register(kind, entry);
    }
    registry
}

pub fn mock_factory(fixture: &Fixture) -> (ConnectionFactory, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let document = conduit_query::EnvironmentDocument::load(&fixture.path).unwrap();
    let factory = ConnectionFactory::with_registry(document, mock_registry(counter.clone()));
    (factory, counter)
}
