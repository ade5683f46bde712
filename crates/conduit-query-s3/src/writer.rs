//! One table, one object.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use conduit_query::{
    BackendKind, DataError, PoolId, PoolSlot, ReaderConfig, ReaderState, Result, Table,
    WriteRequest, WriteSummary, Writer,
};
use tracing::{debug, error, info, warn};

use crate::client::ClientSettings;
use crate::encode::encode;
use crate::format::FileFormat;
use crate::locator::S3Locator;

const DEFAULT_OBJECT_NAME: &str = "output.csv";
const GLOB_CHARS: &[char] = &['*', '?', '['];

fn content_type(format: FileFormat) -> &'static str {
    match format {
        FileFormat::Csv => "text/csv",
        FileFormat::Json => "application/json",
        _ => "application/octet-stream",
    }
}

/// S3 writer; the pooled resource is the SDK client
pub struct S3Writer {
    bucket: Option<String>,
    prefix: Option<String>,
    file_pattern: Option<String>,
    format: Option<String>,
    client_settings: ClientSettings,
    client: PoolSlot<Client>,
}

impl S3Writer {
    /// Build a writer from merged configuration; no client is created
    pub fn new(config: ReaderConfig) -> Result<Self> {
        let bucket = config.get_str("bucket");
        info!(
            "Initialized S3 writer with bucket={:?}, prefix={:?}",
            bucket,
            config.get_str("prefix")
        );

        Ok(Self {
            client: PoolSlot::new(format!(
                "s3 writer {}",
                bucket.as_deref().unwrap_or("<locator>")
            )),
            bucket,
            prefix: config.get_str("prefix"),
            file_pattern: config.get_str("file_pattern"),
            format: config.get_str("format"),
            client_settings: ClientSettings::from_config(&config),
        })
    }

    /// Target object and format of one write.
    ///
    /// The object is `bucket/prefix/file_pattern` (default `output.csv`), or
    /// the call-time file pattern itself when it is a full `s3://` locator.
    /// Format: call-time value, then the key's extension, then the configured
    /// `format`, then csv.
    pub fn plan(&self, request: &WriteRequest) -> Result<(S3Locator, FileFormat)> {
        let pattern = request
            .file_pattern
            .as_deref()
            .or(self.file_pattern.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_OBJECT_NAME);

        let locator = match S3Locator::parse(pattern) {
            Some(locator) => locator,
            None => {
                let bucket = self.bucket.as_deref().ok_or_else(|| {
                    DataError::missing_parameter(BackendKind::S3.as_str(), "bucket")
                })?;
                S3Locator::compose(bucket, self.prefix.as_deref(), Some(pattern))
            }
        };
        if locator.key.is_empty() || locator.key.ends_with('/') || locator.key.contains(GLOB_CHARS) {
            return Err(DataError::configuration(format!(
                "{} does not name a single object to write",
                locator
            )));
        }

        let format = match request.format.as_deref() {
            Some(name) => name.parse::<FileFormat>()?,
            None => match locator.extension().and_then(FileFormat::from_name) {
                Some(format) => format,
                None => match self.format.as_deref() {
                    Some(name) => name.parse::<FileFormat>()?,
                    None => FileFormat::Csv,
                },
            },
        };
        Ok((locator, format))
    }

    async fn client(&self) -> Result<(Client, PoolId)> {
        self.client
            .get_or_init_with_id(|| self.client_settings.build())
            .await
    }
}

#[async_trait]
impl Writer for S3Writer {
    fn backend(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn state(&self) -> ReaderState {
        self.client.state().await
    }

    async fn connect(&self) -> Result<PoolId> {
        self.client().await.map(|(_, id)| id)
    }

    async fn write(&self, table: &Table, request: &WriteRequest) -> Result<WriteSummary> {
        self.client.ensure_open().await?;
        let (locator, format) = self.plan(request)?;
        let target = locator.to_string();
        if table.is_empty() {
            warn!("No rows to write to {}; skipping", target);
            return Ok(WriteSummary::skipped(target));
        }

        let start = std::time::Instant::now();
        let body = encode(format, table, &target)?;
        debug!("Encoded {} rows as {} ({} bytes)", table.rows.len(), format, body.len());

        let (client, _) = self.client().await?;
        client
            .put_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .body(ByteStream::from(body))
            .content_type(content_type(format))
            .send()
            .await
            .map_err(|e| {
                error!("Failed to upload {}: {}", target, DisplayErrorContext(&e));
                DataError::query_failed(DisplayErrorContext(&e), &target)
            })?;

        let summary = WriteSummary {
            target,
            rows_written: table.rows.len(),
            batches: 1,
            execution_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Successfully wrote {} rows to {} ({}ms)",
            summary.rows_written, summary.target, summary.execution_ms
        );
        Ok(summary)
    }

    async fn close(&self) -> Result<()> {
        if self.client.close().await.is_some() {
            debug!("Closed S3 writer client");
        }
        Ok(())
    }
}
