use conduit_query::{
    BackendKind, DataError, PropertyFilter, Reader, ReaderConfig, Result, Writer,
};
use conduit_query_oracle::{OraclePropertyFilter, OracleReader, OracleWriter};
use conduit_query_postgres::{PostgresPropertyFilter, PostgresReader, PostgresWriter};
use conduit_query_s3::{S3PropertyFilter, S3Reader, S3Writer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a not-yet-connected reader from merged configuration
pub type ReaderConstructor = Arc<dyn Fn(ReaderConfig) -> Result<Box<dyn Reader>> + Send + Sync>;

/// Builds a not-yet-connected writer from the same merged configuration
pub type WriterConstructor = Arc<dyn Fn(ReaderConfig) -> Result<Box<dyn Writer>> + Send + Sync>;

/// Property filter and constructors of one backend kind.
///
/// Readers and writers of a kind share one configuration block, so they
/// share its filter.
#[derive(Clone)]
pub struct ReaderEntry {
    pub filter: Arc<dyn PropertyFilter>,
    pub constructor: ReaderConstructor,
    pub writer: Option<WriterConstructor>,
}

impl ReaderEntry {
    pub fn new<F>(filter: impl PropertyFilter + 'static, constructor: F) -> Self
    where
        F: Fn(ReaderConfig) -> Result<Box<dyn Reader>> + Send + Sync + 'static,
    {
        Self {
            filter: Arc::new(filter),
            constructor: Arc::new(constructor),
            writer: None,
        }
    }

    pub fn with_writer<F>(mut self, constructor: F) -> Self
    where
        F: Fn(ReaderConfig) -> Result<Box<dyn Writer>> + Send + Sync + 'static,
    {
        self.writer = Some(Arc::new(constructor));
        self
    }

    /// Writer constructor, or `UnsupportedBackend` if `kind` cannot be written
    pub fn writer(&self, kind: BackendKind) -> Result<&WriterConstructor> {
        self.writer
            .as_ref()
            .ok_or_else(|| DataError::UnsupportedBackend(format!("{} (no writer)", kind)))
    }

    /// Built-in entry of `kind`
    pub fn builtin(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Postgres => Self::new(PostgresPropertyFilter, |config| {
                Ok(Box::new(PostgresReader::new(config)?) as Box<dyn Reader>)
            })
            .with_writer(|config| Ok(Box::new(PostgresWriter::new(config)?) as Box<dyn Writer>)),
            BackendKind::Oracle => Self::new(OraclePropertyFilter, |config| {
                Ok(Box::new(OracleReader::new(config)?) as Box<dyn Reader>)
            })
            .with_writer(|config| Ok(Box::new(OracleWriter::new(config)?) as Box<dyn Writer>)),
            BackendKind::S3 => Self::new(S3PropertyFilter, |config| {
                Ok(Box::new(S3Reader::new(config)?) as Box<dyn Reader>)
            })
            .with_writer(|config| Ok(Box::new(S3Writer::new(config)?) as Box<dyn Writer>)),
        }
    }
}

/// Backend kind -> (property filter, reader constructor, writer constructor)
pub struct ReaderRegistry {
    entries: HashMap<BackendKind, ReaderEntry>,
}

impl ReaderRegistry {
    /// Registry with every built-in backend
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for kind in BackendKind::ALL {
            registry.register(kind, ReaderEntry::builtin(kind));
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register an entry for a backend kind
    pub fn register(&mut self, kind: BackendKind, entry: ReaderEntry) {
        if self.entries.contains_key(&kind) {
            warn!("Overwriting existing reader entry for backend: {}", kind);
        }
        self.entries.insert(kind, entry);
        debug!("Registered reader entry for backend: {}", kind);
    }

    pub fn get(&self, kind: BackendKind) -> Result<&ReaderEntry> {
        self.entries
            .get(&kind)
            .ok_or_else(|| DataError::UnsupportedBackend(kind.to_string()))
    }

    /// Parse a backend name and check that it is registered
    pub fn lookup(&self, name: &str) -> Result<BackendKind> {
        let kind: BackendKind = name.parse()?;
        self.get(kind)?;
        Ok(kind)
    }

    /// Registered backend kinds
    pub fn kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.entries.contains_key(kind))
            .collect()
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
