use thiserror::Error;

/// Unified error type for resolving, constructing and driving readers
#[derive(Error, Debug)]
pub enum DataError {
    /// Environment or backend block absent from the configuration document
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Required fields missing from a configuration block or from caller arguments
    #[error("Validation failed for {context}: missing {}", missing.join(", "))]
    Validation {
        context: String,
        missing: Vec<String>,
    },

    /// Backend kind not present in the reader registry
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// Source requested through the reader service is not a registered backend
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// Reader construction still lacks a required argument after merging overrides
    #[error("Missing parameter '{parameter}' for {backend} reader")]
    MissingParameter { backend: String, parameter: String },

    /// Row-oriented fetch attempted with no query from any source
    #[error("No query provided for {0} reader")]
    NoQueryProvided(String),

    /// Pool or session could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted after close() on a reader or writer
    #[error("Connection is closed: {0}")]
    ClosedReader(String),

    /// Underlying query or transfer failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// File format recognized but no decoder is available for it
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Write mode not offered by the target backend
    #[error("Write mode '{mode}' is not supported by the {backend} writer")]
    UnsupportedWriteMode { backend: String, mode: String },

    /// Named query absent from the query-definitions file
    #[error("Query '{0}' not found")]
    QueryNotFound(String),

    /// Query definition present but malformed
    #[error("Invalid query definition '{name}': {reason}")]
    InvalidQueryDefinition { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DataError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        DataError::Configuration(msg.into())
    }

    /// Create a validation error; the missing list is sorted and deduplicated
    pub fn validation<I, S>(context: impl Into<String>, missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut missing: Vec<String> = missing.into_iter().map(Into::into).collect();
        missing.sort();
        missing.dedup();
        DataError::Validation {
            context: context.into(),
            missing,
        }
    }

    pub fn missing_parameter(backend: impl Into<String>, parameter: impl Into<String>) -> Self {
        DataError::MissingParameter {
            backend: backend.into(),
            parameter: parameter.into(),
        }
    }

    /// Build a query failure, appending the statement or locator unless it carries secrets
    pub fn query_failed(cause: impl std::fmt::Display, statement: &str) -> Self {
        if crate::secrets::contains_secret(statement) {
            DataError::QueryFailed(cause.to_string())
        } else {
            DataError::QueryFailed(format!("{}\n\nQuery: {}", cause, statement))
        }
    }

    /// Fields reported missing by a validation error, empty for every other variant
    pub fn missing_fields(&self) -> &[String] {
        match self {
            DataError::Validation { missing, .. } => missing,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
