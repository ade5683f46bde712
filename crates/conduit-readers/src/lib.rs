//! # conduit-readers
//!
//! Resolution and construction of backend readers and writers:
//!
//! - **ReaderRegistry**: backend kind -> (property filter, reader and writer constructors)
//! - **ConnectionFactory**: configuration document + environment + overrides -> reader or writer
//! - **ReaderService**: caller-facing facade that validates intent first
//! - **WriterService**: the same for writes
//!
//! ## Example
//!
//! ```rust,no_run
//! use conduit_readers::{ReaderService, SourceArgs};
//!
//! # async fn example() -> conduit_query::Result<()> {
//! let service = ReaderService::open(
//!     "config/db_config.yml",
//!     "DEV",
//!     "postgres",
//!     SourceArgs::new().with_query("SELECT * FROM emp WHERE dept_id = $1"),
//! )?;
//! let params = vec!["10".to_string()];
//! let table = service.fetch(None, Some(&params)).await;
//! service.close().await?;
//! let _ = table?;
//! # Ok(())
//! # }
//! ```

pub mod factory;
pub mod registry;
pub mod service;
pub mod writer;

pub use factory::ConnectionFactory;
pub use registry::{ReaderConstructor, ReaderEntry, ReaderRegistry, WriterConstructor};
pub use service::{ReaderService, SourceArgs};
pub use writer::{TargetArgs, WriterService};
