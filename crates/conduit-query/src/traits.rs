use crate::backend::BackendKind;
use crate::error::Result;
use crate::pool::{PoolId, ReaderState};
use crate::types::{ParamValue, QueryRequest, Row, Table};
use crate::write::{WriteRequest, WriteSummary};
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};

/// Capability contract every backend reader honors.
///
/// A reader owns exactly one pool, created lazily by the first `connect`
/// (explicit or implicit) and released by `close`. After `close`, `connect`,
/// `execute` and `fetch` fail with `ClosedReader`; `close` itself stays a no-op.
#[async_trait]
pub trait Reader: Send + Sync + Downcast {
    /// Backend kind this reader was constructed for
    fn backend(&self) -> BackendKind;

    /// Query (or locator) bound at construction time, if any
    fn default_query(&self) -> Option<&str>;

    /// Parameters bound at construction time
    fn default_params(&self) -> &[ParamValue];

    /// Current pool lifecycle state
    async fn state(&self) -> ReaderState;

    /// Create the pool if needed and report its identity.
    ///
    /// While a pool exists this reuses it and returns the same id.
    async fn connect(&self) -> Result<PoolId>;

    /// Run the effective query and return ordered row tuples
    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Row>>;

    /// Run the effective query (or transfer) and materialize a table
    async fn fetch(&self, request: &QueryRequest) -> Result<Table>;

    /// Release the pool; idempotent
    async fn close(&self) -> Result<()>;
}

impl_downcast!(Reader);

/// Capability contract every backend writer honors.
///
/// Pool lifecycle matches `Reader`: one lazily created pool, released by an
/// idempotent `close`, after which `connect` and `write` fail with `ClosedReader`.
#[async_trait]
pub trait Writer: Send + Sync + Downcast {
    fn backend(&self) -> BackendKind;

    async fn state(&self) -> ReaderState;

    async fn connect(&self) -> Result<PoolId>;

    /// Apply every row of `table` to the target described by `request`
    async fn write(&self, table: &Table, request: &WriteRequest) -> Result<WriteSummary>;

    async fn close(&self) -> Result<()>;
}

impl_downcast!(Writer);
