//! Object body -> table decoders.

use bytes::Bytes;
use conduit_query::{DataError, DatasetSchema, ParamValue, Result, Row, Table};
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde_json::Value;

use crate::format::FileFormat;

/// Decode one object body; `source` names the object in error messages
pub fn decode(format: FileFormat, body: Bytes, source: &str) -> Result<Table> {
    match format {
        FileFormat::Csv => decode_csv(&body, source),
        FileFormat::Json => decode_json(&body, source),
        FileFormat::Parquet => decode_parquet(body, source),
        FileFormat::Orc | FileFormat::Excel => Err(DataError::UnsupportedFormat(format!(
            "no {} decoder available for {}",
            format, source
        ))),
    }
}

/// Header row gives the columns; cells are coerced like call-time
/// parameters and empty cells are null
fn decode_csv(body: &[u8], source: &str) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| DataError::query_failed(e, source))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DataError::query_failed(e, source))?;
        let mut row: Row = record
            .iter()
            .take(columns.len())
            .map(|cell| {
                if cell.is_empty() {
                    Value::Null
                } else {
                    ParamValue::coerce(cell).to_json()
                }
            })
            .collect();
        row.resize(columns.len(), Value::Null);
        rows.push(row);
    }

    Ok(table(columns, rows))
}

/// A JSON array of objects, or newline-delimited objects
fn decode_json(body: &[u8], source: &str) -> Result<Table> {
    let mut records = Vec::new();
    for value in serde_json::Deserializer::from_slice(body).into_iter::<Value>() {
        match value.map_err(|e| DataError::query_failed(e, source))? {
            Value::Array(items) => records.extend(items),
            other => records.push(other),
        }
    }

    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        let Value::Object(map) = record else {
            return Err(DataError::query_failed(
                "expected JSON objects, one per record",
                source,
            ));
        };
        for key in map.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = records
        .into_iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(table(columns, rows))
}

fn decode_parquet(body: Bytes, source: &str) -> Result<Table> {
    let reader =
        SerializedFileReader::new(body).map_err(|e| DataError::query_failed(e, source))?;

    let columns: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema()
        .get_fields()
        .iter()
        .map(|field| field.name().to_string())
        .collect();

    let mut rows = Vec::new();
    let iter = reader
        .get_row_iter(None)
        .map_err(|e| DataError::query_failed(e, source))?;
    for row in iter {
        let row = row.map_err(|e| DataError::query_failed(e, source))?;
        rows.push(
            row.get_column_iter()
                .map(|(_, field)| field.to_json_value())
                .collect(),
        );
    }

    Ok(table(columns, rows))
}

fn table(columns: Vec<String>, rows: Vec<Row>) -> Table {
    let schema = DatasetSchema::infer(&columns, &rows);
    Table::new(schema, rows, 0)
}
