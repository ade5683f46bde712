//! Write-side request and summary types shared by every backend writer.

use crate::error::{DataError, Result};
use crate::types::DatasetSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column every merge is keyed on when the caller names none
pub const DEFAULT_MERGE_KEY: &str = "id_rec";

/// How rows are applied to a relational target
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Append every row
    Insert,
    /// Update existing rows matched on the key columns
    Update,
    /// Update matched rows, insert the rest
    Merge,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Insert => "insert",
            WriteMode::Update => "update",
            WriteMode::Merge => "merge",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(WriteMode::Insert),
            "update" => Ok(WriteMode::Update),
            "merge" | "upsert" => Ok(WriteMode::Merge),
            other => Err(DataError::configuration(format!(
                "Unknown write mode '{}', expected insert, update or merge",
                other
            ))),
        }
    }
}

/// Key column filled from a block-allocated counter before insert.
///
/// The counter row is looked up by `entity` in the target's sequence table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFill {
    pub column: String,
    pub entity: String,
}

impl SequenceFill {
    pub fn new(column: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            entity: entity.into(),
        }
    }
}

/// Call-time write options.
///
/// Absent fields fall back to the writer's configured values for this call only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteRequest {
    /// Target table of a relational write
    pub table: Option<String>,
    pub mode: Option<WriteMode>,
    /// Columns rows are matched on by update and merge
    pub key_columns: Vec<String>,
    pub sequence: Option<SequenceFill>,
    /// Rows per statement or batch; `None` lets the writer decide
    pub chunk_size: Option<usize>,
    /// Object name under the target prefix of an object-store write
    pub file_pattern: Option<String>,
    /// Explicit file format of an object-store write
    pub format: Option<String>,
}

impl WriteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sequence(mut self, sequence: SequenceFill) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
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

    /// Call-time table if given and non-blank, else the fallback
    pub fn effective_table<'a>(&'a self, fallback: Option<&'a str>) -> Option<&'a str> {
        self.table
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(fallback.filter(|t| !t.trim().is_empty()))
    }

    /// Chunk size to use; zero is treated as unset
    pub fn effective_chunk_size(&self, fallback: usize) -> usize {
        self.chunk_size.filter(|n| *n > 0).unwrap_or(fallback).max(1)
    }
}

/// Outcome of one write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Table name or object locator written to
    pub target: String,
    pub rows_written: usize,
    /// Statements or objects issued
    pub batches: usize,
    pub execution_ms: u64,
}

impl WriteSummary {
    /// Summary of a write that had nothing to do
    pub fn skipped(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }
}

/// Positions of `names` in `schema`, failing with every name the data lacks
pub fn column_positions(schema: &DatasetSchema, names: &[String], context: &str) -> Result<Vec<usize>> {
    let mut positions = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match schema.position(name) {
            Some(idx) => positions.push(idx),
            None => missing.push(name.clone()),
        }
    }
    if missing.is_empty() {
        Ok(positions)
    } else {
        Err(DataError::validation(context, missing))
    }
}
