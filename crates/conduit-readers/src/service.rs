use crate::factory::ConnectionFactory;
use crate::registry::ReaderRegistry;
use conduit_query::{
    BackendKind, DataError, EnvironmentDocument, ParamValue, QueryRequest, Reader, Result, Row,
    RuntimeOverrides, Table,
};
use conduit_query_s3::S3Locator;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// What the caller supplies when opening a reader
#[derive(Debug, Clone, Default)]
pub struct SourceArgs {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub file_pattern: Option<String>,
    pub query: Option<String>,
    /// Raw text parameters, coerced before use
    pub params: Vec<String>,
}

impl SourceArgs {
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

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }

    /// Caller-side required fields of `kind`
    fn validate(&self, kind: BackendKind) -> Result<()> {
        match kind {
            BackendKind::S3 => {
                let has_locator = self
                    .query()
                    .map(S3Locator::is_fully_qualified)
                    .unwrap_or(false);
                let has_bucket = self.bucket.as_deref().is_some_and(|b| !b.trim().is_empty());
                if has_bucket || has_locator {
                    Ok(())
                } else {
                    Err(DataError::validation("s3 source arguments", ["bucket"]))
                }
            }
            // A query may still arrive at fetch time
            BackendKind::Postgres | BackendKind::Oracle => Ok(()),
        }
    }

    fn overrides(&self) -> RuntimeOverrides {
        let params = (!self.params.is_empty()).then(|| {
            Value::Array(
                ParamValue::coerce_all(&self.params)
                    .iter()
                    .map(ParamValue::to_json)
                    .collect(),
            )
        });

        RuntimeOverrides::new()
            .set_opt("bucket", self.bucket.clone())
            .set_opt("prefix", self.prefix.clone())
            .set_opt("file_pattern", self.file_pattern.clone())
            .set_opt("sql", self.query().map(str::to_string))
            .set_opt("params", params)
    }
}

/// Facade over one reader: validates caller intent, then delegates
pub struct ReaderService {
    kind: BackendKind,
    environment: String,
    reader: Box<dyn Reader>,
}

impl ReaderService {
    /// Validate the source, then load the configuration document and build.
    ///
    /// An unknown source fails before the document is read.
    pub fn open(
        config_path: impl AsRef<Path>,
        environment: &str,
        source: &str,
        args: SourceArgs,
    ) -> Result<Self> {
        let registry = ReaderRegistry::new();
        let kind = Self::check_source(&registry, source, &args)?;

        let document = EnvironmentDocument::load(config_path)?;
        let factory = ConnectionFactory::with_registry(document, registry);
        Self::build(&factory, kind, environment, &args)
    }

    /// Same as `open`, with an already loaded factory
    pub fn with_factory(
        factory: &ConnectionFactory,
        environment: &str,
        source: &str,
        args: SourceArgs,
    ) -> Result<Self> {
        let kind = Self::check_source(factory.registry(), source, &args)?;
        Self::build(factory, kind, environment, &args)
    }

    fn check_source(
        registry: &ReaderRegistry,
        source: &str,
        args: &SourceArgs,
    ) -> Result<BackendKind> {
        let kind = registry
            .lookup(source)
            .map_err(|_| DataError::UnsupportedSource(source.to_string()))?;
        args.validate(kind)?;
        Ok(kind)
    }

    fn build(
        factory: &ConnectionFactory,
        kind: BackendKind,
        environment: &str,
        args: &SourceArgs,
    ) -> Result<Self> {
        info!("Creating reader for source={} environment={}", kind, environment);
        let reader = factory.build(kind, environment, &args.overrides())?;
        Ok(Self {
            kind,
            environment: environment.to_string(),
            reader,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn reader(&self) -> &dyn Reader {
        self.reader.as_ref()
    }

    /// Read a table; call-time values apply to this call only
    pub async fn fetch(&self, query: Option<&str>, params: Option<&[String]>) -> Result<Table> {
        self.fetch_request(&Self::request(query, params)).await
    }

    /// `fetch` with already typed call-time values
    pub async fn fetch_request(&self, request: &QueryRequest) -> Result<Table> {
        debug!("fetch on {} reader: {:?}", self.kind, request.query);
        self.reader.fetch(request).await
    }

    /// Row tuples; call-time values apply to this call only
    pub async fn execute(
        &self,
        query: Option<&str>,
        params: Option<&[String]>,
    ) -> Result<Vec<Row>> {
        let request = Self::request(query, params);
        self.reader.execute(&request).await
    }

    pub async fn close(&self) -> Result<()> {
        self.reader.close().await?;
        debug!("Closed {} reader", self.kind);
        Ok(())
    }

    fn request(query: Option<&str>, params: Option<&[String]>) -> QueryRequest {
        let mut request = QueryRequest::new();
        if let Some(query) = query {
            request = request.with_query(query);
        }
        if let Some(params) = params {
            request = request.with_params(ParamValue::coerce_all(params));
        }
        request
    }
}
