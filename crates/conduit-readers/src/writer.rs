use crate::factory::ConnectionFactory;
use crate::registry::ReaderRegistry;
use conduit_query::{
    BackendKind, DataError, EnvironmentDocument, Result, RuntimeOverrides, Table, WriteRequest,
    WriteSummary, Writer,
};
use std::path::Path;
use tracing::{debug, info, warn};

/// What the caller supplies when opening a writer
#[derive(Debug, Clone, Default)]
pub struct TargetArgs {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub file_pattern: Option<String>,
    pub format: Option<String>,
    pub table: Option<String>,
}

impl TargetArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_file_pattern(mut self, file_pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(file_pattern.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides::new()
            .set_opt("bucket", self.bucket.clone())
            .set_opt("prefix", self.prefix.clone())
            .set_opt("file_pattern", self.file_pattern.clone())
            .set_opt("format", self.format.clone())
            .set_opt("table", self.table.clone())
    }
}

/// Facade over one writer
pub struct WriterService {
    kind: BackendKind,
    environment: String,
    writer: Box<dyn Writer>,
}

impl WriterService {
    /// Check the target, then load the configuration document and build.
    ///
    /// An unknown target fails before the document is read.
    pub fn open(
        config_path: impl AsRef<Path>,
        environment: &str,
        target: &str,
        args: TargetArgs,
    ) -> Result<Self> {
        let registry = ReaderRegistry::new();
        let kind = Self::check_target(&registry, target)?;

        let document = EnvironmentDocument::load(config_path)?;
        let factory = ConnectionFactory::with_registry(document, registry);
        Self::build(&factory, kind, environment, &args)
    }

    /// Same as `open`, with an already loaded factory
    pub fn with_factory(
        factory: &ConnectionFactory,
        environment: &str,
        target: &str,
        args: TargetArgs,
    ) -> Result<Self> {
        let kind = Self::check_target(factory.registry(), target)?;
        Self::build(factory, kind, environment, &args)
    }

    fn check_target(registry: &ReaderRegistry, target: &str) -> Result<BackendKind> {
        let kind = registry
            .lookup(target)
            .map_err(|_| DataError::UnsupportedSource(target.to_string()))?;
        registry.get(kind)?.writer(kind)?;
        Ok(kind)
    }

    fn build(
        factory: &ConnectionFactory,
        kind: BackendKind,
        environment: &str,
        args: &TargetArgs,
    ) -> Result<Self> {
        info!("Creating writer for target={} environment={}", kind, environment);
        let writer = factory.build_writer(kind, environment, &args.overrides())?;
        Ok(Self {
            kind,
            environment: environment.to_string(),
            writer,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn writer(&self) -> &dyn Writer {
        self.writer.as_ref()
    }

    /// Write every row of `table`; an empty table is skipped with a warning
    pub async fn write(&self, table: &Table, request: &WriteRequest) -> Result<WriteSummary> {
        if table.is_empty() {
            let target = request
                .table
                .clone()
                .or_else(|| request.file_pattern.clone())
                .unwrap_or_else(|| self.kind.to_string());
            warn!("No data to write to {}; skipping", target);
            return Ok(WriteSummary::skipped(target));
        }

        debug!(
            "write on {} writer: {} rows, mode {:?}",
            self.kind,
            table.rows.len(),
            request.mode
        );
        self.writer.write(table, request).await
    }

    pub async fn close(&self) -> Result<()> {
        self.writer.close().await?;
        debug!("Closed {} writer", self.kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_overrides() {
        let overrides = TargetArgs::new()
            .with_table("HR.EMP")
            .with_file_pattern("out.parquet")
            .overrides();
        assert_eq!(overrides.get("table"), Some(&json!("HR.EMP")));
        assert_eq!(overrides.get("file_pattern"), Some(&json!("out.parquet")));
        assert!(overrides.get("bucket").is_none());
        assert!(TargetArgs::new().overrides().is_empty());
    }

    #[test]
    fn test_unknown_target_fails_before_reading_config() {
        let err = WriterService::open("/nonexistent/db_config.yml", "DEV", "mongodb", TargetArgs::new())
            .err()
            .unwrap();
        assert!(matches!(err, DataError::UnsupportedSource(ref s) if s == "mongodb"));
    }
}
