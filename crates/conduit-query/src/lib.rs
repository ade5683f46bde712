//! # conduit-query
//!
//! Core abstractions for reading and writing tabular data across heterogeneous backends.
//!
//! This crate holds everything the backend crates share:
//! - Environment configuration documents and runtime overrides
//! - Per-backend property filters (whitelist + required keys)
//! - The async `Reader` and `Writer` contracts and their pool lifecycle
//! - Tables, schemas and positional query parameters
//! - Named query catalogs
//!
//! ## Example
//!
//! ```rust
//! use conduit_query::{BackendKind, EnvironmentDocument};
//!
//! # fn example() -> conduit_query::Result<()> {
//! let document = EnvironmentDocument::from_yaml_str(
//!     "DEV:\n  db_type: postgres\n  host: localhost\n",
//!     "inline",
//! )?;
//! let block = document.backend_block("DEV", BackendKind::Postgres)?;
//! assert_eq!(block.get("host").and_then(|v| v.as_str()), Some("localhost"));
//! # Ok(())
//! # }
//! ```
//!
//! Backend crates:
//! - `conduit-query-postgres` - PostgreSQL reader and merge writer
//! - `conduit-query-oracle` - Oracle reader and insert/update writer
//! - `conduit-query-s3` - S3 object reader and writer

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod pool;
pub mod secrets;
pub mod traits;
pub mod types;
pub mod write;

// Re-export commonly used items
pub use backend::BackendKind;
pub use catalog::QueryCatalog;
pub use config::{merge_overrides, ConfigMap, EnvironmentDocument, ReaderConfig, RuntimeOverrides};
pub use error::{DataError, Result};
pub use filter::{resolve, FilteredConfig, PropertyFilter};
pub use pool::{PoolId, PoolSlot, ReaderState};
pub use traits::{Reader, Writer};
pub use types::{
    DatasetSchema, FieldDef, FieldType, ParamValue, QueryRequest, QueryStats, Row, Table,
};
pub use write::{
    column_positions, SequenceFill, WriteMode, WriteRequest, WriteSummary, DEFAULT_MERGE_KEY,
};
