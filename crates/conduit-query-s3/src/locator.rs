//! `s3://bucket/key` locators and their resolution.

use conduit_query::{BackendKind, DataError, Result};
use std::fmt;
use tracing::debug;

const SCHEME: &str = "s3://";
const GLOB_CHARS: &[char] = &['*', '?', '['];

/// A bucket plus an object key, key pattern or key prefix
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct S3Locator {
    pub bucket: String,
    pub key: String,
}

impl S3Locator {
    /// Parse a fully-qualified `s3://bucket[/key]` locator
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.trim().strip_prefix(SCHEME)?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn is_fully_qualified(uri: &str) -> bool {
        Self::parse(uri).is_some()
    }

    /// bucket + prefix (trimmed of '/') + file pattern.
    ///
    /// A prefix without a pattern addresses everything under that prefix.
    pub fn compose(bucket: &str, prefix: Option<&str>, file_pattern: Option<&str>) -> Self {
        let mut key = prefix.map(|p| p.trim_matches('/')).unwrap_or("").to_string();
        match file_pattern.map(|p| p.trim_start_matches('/')).filter(|p| !p.is_empty()) {
            Some(pattern) => {
                if !key.is_empty() {
                    key.push('/');
                }
                key.push_str(pattern);
            }
            None if !key.is_empty() => key.push('/'),
            None => {}
        }
        Self {
            bucket: bucket.to_string(),
            key,
        }
    }

    /// Whether the key names many objects: empty, a directory or a glob
    pub fn is_multi(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/') || self.key.contains(GLOB_CHARS)
    }

    /// Literal part of the key, used as the listing prefix
    pub fn list_prefix(&self) -> &str {
        match self.key.find(GLOB_CHARS) {
            Some(idx) => &self.key[..idx],
            None => &self.key,
        }
    }

    /// Extension of the last key segment, without the dot
    pub fn extension(&self) -> Option<&str> {
        let name = self.key.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext)
    }
}

impl fmt::Display for S3Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.key)
    }
}

/// Configured location pieces of one reader
#[derive(Debug, Clone, Default)]
pub struct LocationDefaults {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub file_pattern: Option<String>,
    /// Construction-time `sql`: a full locator or a key in `bucket`
    pub sql: Option<String>,
}

impl LocationDefaults {
    /// Resolve the locator for one call.
    ///
    /// Precedence: call-time query, then the construction-time `sql`, then
    /// bucket + prefix + file pattern. A query of either kind that is not
    /// fully qualified is a key in `bucket`.
    pub fn resolve(&self, call_time: Option<&str>) -> Result<S3Locator> {
        if let Some(query) = non_blank(call_time) {
            let locator = self.locate(query)?;
            debug!("Using call-time locator: {}", locator);
            return Ok(locator);
        }

        if let Some(sql) = non_blank(self.sql.as_deref()) {
            let locator = self.locate(sql)?;
            debug!("Using configured sql as locator: {}", locator);
            return Ok(locator);
        }

        let locator = S3Locator::compose(
            self.require_bucket()?,
            self.prefix.as_deref(),
            self.file_pattern.as_deref(),
        );
        debug!("Built locator: {}", locator);
        Ok(locator)
    }

    fn locate(&self, query: &str) -> Result<S3Locator> {
        if let Some(locator) = S3Locator::parse(query) {
            return Ok(locator);
        }
        Ok(S3Locator {
            bucket: self.require_bucket()?.to_string(),
            key: query.trim_start_matches('/').to_string(),
        })
    }

    fn require_bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .ok_or_else(|| DataError::missing_parameter(BackendKind::S3.as_str(), "bucket"))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
