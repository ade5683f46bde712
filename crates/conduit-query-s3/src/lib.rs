//! S3 object reader and writer for conduit-query
//!
//! Reads CSV, JSON and Parquet objects into tables. A locator may address one
//! object, a directory or a glob; multi-object reads are concatenated. The
//! writer puts a whole table as one object in the same formats.
//!
//! ## Example
//!
//! ```rust,no_run
//! use conduit_query::{BackendKind, ConfigMap, QueryRequest, Reader, ReaderConfig};
//! use conduit_query_s3::S3Reader;
//!
//! # async fn example() -> conduit_query::Result<()> {
//! let mut values = ConfigMap::new();
//! values.insert("bucket".into(), "analytics".into());
//! values.insert("region_name".into(), "eu-west-1".into());
//!
//! let reader = S3Reader::new(ReaderConfig::new(BackendKind::S3, values))?;
//! let _table = reader
//!     .fetch(&QueryRequest::new().with_query("s3://analytics/daily/*.csv"))
//!     .await?;
//! reader.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod decode;
mod encode;
mod filter;
mod format;
mod locator;
mod writer;

pub use decode::decode;
pub use encode::encode;
pub use filter::S3PropertyFilter;
pub use format::FileFormat;
pub use locator::{LocationDefaults, S3Locator};
pub use writer::S3Writer;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use bytes::Bytes;
use client::ClientSettings;
use conduit_query::{
    BackendKind, DataError, ParamValue, PoolId, PoolSlot, QueryRequest, Reader, ReaderConfig,
    ReaderState, Result, Row, Table,
};
use glob::{MatchOptions, Pattern};
use tracing::{debug, error, info, warn};

/// Keys are matched whole, fnmatch style: `*` and `?` also match `/`
const KEY_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// S3 reader implementation; the pooled resource is the SDK client
pub struct S3Reader {
    location: LocationDefaults,
    client_settings: ClientSettings,
    default_format: FileFormat,
    params: Vec<ParamValue>,
    client: PoolSlot<Client>,
}

impl S3Reader {
    /// Build a reader from merged configuration; no client is created
    pub fn new(config: ReaderConfig) -> Result<Self> {
        let location = LocationDefaults {
            bucket: config.get_str("bucket"),
            prefix: config.get_str("prefix"),
            file_pattern: config.get_str("file_pattern"),
            sql: config.get_str("sql"),
        };

        let has_locator = location
            .sql
            .as_deref()
            .map(S3Locator::is_fully_qualified)
            .unwrap_or(false);
        if location.bucket.is_none() && !has_locator {
            return Err(DataError::missing_parameter(BackendKind::S3.as_str(), "bucket"));
        }

        let default_format = match config.get_str("format") {
            None => FileFormat::Csv,
            Some(name) => FileFormat::from_name(&name).unwrap_or_else(|| {
                warn!("Unrecognized format '{}', defaulting to csv", name);
                FileFormat::Csv
            }),
        };

        info!(
            "Initialized S3 reader with bucket={:?}, prefix={:?}, pattern={:?}",
            location.bucket, location.prefix, location.file_pattern
        );

        Ok(Self {
            client: PoolSlot::new(format!(
                "s3 {}",
                location.bucket.as_deref().unwrap_or("<locator>")
            )),
            location,
            client_settings: ClientSettings::from_config(&config),
            default_format,
            params: config.params(),
        })
    }

    /// Resolve the locator and format one call would use
    pub fn plan(&self, request: &QueryRequest) -> Result<(S3Locator, FileFormat)> {
        let locator = self.location.resolve(request.query.as_deref())?;
        let params = request.effective_params(&self.params);
        let format = FileFormat::resolve(params, &locator, self.default_format);
        Ok((locator, format))
    }

    async fn client(&self) -> Result<(Client, PoolId)> {
        self.client
            .get_or_init_with_id(|| self.client_settings.build())
            .await
    }

    /// Keys under the locator's literal prefix that match the locator
    async fn list_keys(&self, client: &Client, locator: &S3Locator) -> Result<Vec<String>> {
        let pattern = if locator.key.ends_with('/') || locator.key.is_empty() {
            None
        } else {
            Some(Pattern::new(&locator.key).map_err(|e| {
                DataError::configuration(format!("Invalid file pattern '{}': {}", locator, e))
            })?)
        };

        debug!(
            "Listing objects in bucket '{}' with prefix '{}'",
            locator.bucket,
            locator.list_prefix()
        );

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = client
                .list_objects_v2()
                .bucket(&locator.bucket)
                .prefix(locator.list_prefix());
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                error!(
                    "Failed to list objects in bucket '{}': {}",
                    locator.bucket,
                    DisplayErrorContext(&e)
                );
                DataError::query_failed(DisplayErrorContext(&e), &locator.to_string())
            })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter(|key| !key.ends_with('/'))
                    .filter(|key| match &pattern {
                        Some(pattern) => pattern.matches_with(key, KEY_MATCH_OPTIONS),
                        None => key.starts_with(locator.key.as_str()),
                    })
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!("Found {} objects matching {}", keys.len(), locator);
        Ok(keys)
    }

    /// Object body, or `None` if the key does not exist
    async fn get_body(&self, client: &Client, bucket: &str, key: &str) -> Result<Option<Bytes>> {
        let source = format!("s3://{}/{}", bucket, key);
        debug!("Downloading object '{}'", source);

        let response = match client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) => {
                return Ok(None);
            }
            Err(e) => {
                error!("Failed to download object '{}': {}", source, DisplayErrorContext(&e));
                return Err(DataError::query_failed(DisplayErrorContext(&e), &source));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| DataError::query_failed(e, &source))?;
        Ok(Some(body.into_bytes()))
    }

    async fn read(
        &self,
        client: &Client,
        locator: &S3Locator,
        format: FileFormat,
    ) -> Result<Table> {
        if !locator.is_multi() {
            return match self.get_body(client, &locator.bucket, &locator.key).await? {
                Some(body) => decode(format, body, &locator.to_string()),
                None => {
                    warn!("No files found at {}", locator);
                    Ok(Table::empty())
                }
            };
        }

        let keys = self.list_keys(client, locator).await?;
        if keys.is_empty() {
            warn!("No files found at {}", locator);
            return Ok(Table::empty());
        }

        let mut table = Table::empty();
        for key in keys {
            if let Some(body) = self.get_body(client, &locator.bucket, &key).await? {
                let source = format!("s3://{}/{}", locator.bucket, key);
                table.append(decode(format, body, &source)?);
            }
        }
        Ok(table)
    }
}

#[async_trait]
impl Reader for S3Reader {
    fn backend(&self) -> BackendKind {
        BackendKind::S3
    }

    fn default_query(&self) -> Option<&str> {
        self.location.sql.as_deref()
    }

    fn default_params(&self) -> &[ParamValue] {
        &self.params
    }

    async fn state(&self) -> ReaderState {
        self.client.state().await
    }

    async fn connect(&self) -> Result<PoolId> {
        self.client().await.map(|(_, id)| id)
    }

    /// Objects are not row-addressable; resolves and validates, returns no rows
    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Row>> {
        self.client.ensure_open().await?;
        let (locator, format) = self.plan(request)?;
        self.client().await?;
        debug!("execute on S3 resolved {} as {}; returning no rows", locator, format);
        Ok(Vec::new())
    }

    async fn fetch(&self, request: &QueryRequest) -> Result<Table> {
        self.client.ensure_open().await?;
        let (locator, format) = self.plan(request)?;
        let (client, _) = self.client().await?;

        info!("Reading {} from {}", format, locator);
        let start = std::time::Instant::now();
        let mut table = self.read(&client, &locator, format).await?;
        table.stats.execution_ms = start.elapsed().as_millis() as u64;

        let (rows, columns) = table.shape();
        info!("Successfully read table with shape ({}, {})", rows, columns);
        Ok(table)
    }

    async fn close(&self) -> Result<()> {
        if self.client.close().await.is_some() {
            debug!("Closed S3 client");
        }
        Ok(())
    }
}
