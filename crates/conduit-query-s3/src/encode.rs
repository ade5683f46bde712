//! Table -> object body encoders, the inverse of `decode`.

use bytes::Bytes;
use conduit_query::{DataError, Result, Row, Table};
use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::data_type::{BoolType, ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::format::FileFormat;

/// Encode a whole table; `target` names the object in error messages
pub fn encode(format: FileFormat, table: &Table, target: &str) -> Result<Bytes> {
    match format {
        FileFormat::Csv => encode_csv(table, target),
        FileFormat::Json => encode_json(table, target),
        FileFormat::Parquet => encode_parquet(table, target),
        FileFormat::Orc | FileFormat::Excel => Err(DataError::UnsupportedFormat(format!(
            "no {} encoder available for {}",
            format, target
        ))),
    }
}

/// Text form of one cell: strings verbatim, null empty, anything else as JSON
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn encode_csv(table: &Table, target: &str) -> Result<Bytes> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(table.schema.column_names())
        .map_err(|e| DataError::query_failed(e, target))?;
    for row in &table.rows {
        writer
            .write_record(row.iter().map(cell_text))
            .map_err(|e| DataError::query_failed(e, target))?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| DataError::query_failed(e.error(), target))?;
    Ok(Bytes::from(body))
}

/// A JSON array with one object per row
fn encode_json(table: &Table, target: &str) -> Result<Bytes> {
    let columns = table.schema.column_names();
    let records: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let record: Map<String, Value> = columns
                .iter()
                .zip(row.iter())
                .map(|(column, value)| (column.to_string(), value.clone()))
                .collect();
            Value::Object(record)
        })
        .collect();
    serde_json::to_vec(&records)
        .map(Bytes::from)
        .map_err(|e| DataError::query_failed(e, target))
}

/// Parquet column type chosen from the values a column actually holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Double,
    Utf8,
}

impl ColumnKind {
    fn of(rows: &[Row], idx: usize) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for value in rows.iter().map(|row| row.get(idx).unwrap_or(&Value::Null)) {
            let this = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Boolean,
                Value::Number(n) if n.is_i64() => ColumnKind::Int64,
                Value::Number(_) => ColumnKind::Double,
                _ => return ColumnKind::Utf8,
            };
            kind = Some(match (kind, this) {
                (None, this) => this,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Int64 | ColumnKind::Double), ColumnKind::Int64 | ColumnKind::Double) => {
                    ColumnKind::Double
                }
                _ => return ColumnKind::Utf8,
            });
        }
        kind.unwrap_or(ColumnKind::Utf8)
    }

    fn field(&self, name: &str) -> parquet::errors::Result<Type> {
        let builder = match self {
            ColumnKind::Boolean => Type::primitive_type_builder(name, PhysicalType::BOOLEAN),
            ColumnKind::Int64 => Type::primitive_type_builder(name, PhysicalType::INT64),
            ColumnKind::Double => Type::primitive_type_builder(name, PhysicalType::DOUBLE),
            ColumnKind::Utf8 => Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
                .with_converted_type(ConvertedType::UTF8),
        };
        builder.with_repetition(Repetition::OPTIONAL).build()
    }
}

/// Present values plus definition levels (1 present, 0 null)
fn levels<T, F>(rows: &[Row], idx: usize, convert: F) -> (Vec<T>, Vec<i16>)
where
    F: Fn(&Value) -> Option<T>,
{
    let mut values = Vec::with_capacity(rows.len());
    let mut definition = Vec::with_capacity(rows.len());
    for value in rows.iter().map(|row| row.get(idx).unwrap_or(&Value::Null)) {
        match convert(value) {
            Some(v) => {
                values.push(v);
                definition.push(1);
            }
            None => definition.push(0),
        }
    }
    (values, definition)
}

fn encode_parquet(table: &Table, target: &str) -> Result<Bytes> {
    let fail = |e: parquet::errors::ParquetError| DataError::query_failed(e, target);

    let names = table.schema.column_names();
    let kinds: Vec<ColumnKind> = (0..names.len())
        .map(|idx| ColumnKind::of(&table.rows, idx))
        .collect();
    let fields = names
        .iter()
        .zip(&kinds)
        .map(|(name, kind)| kind.field(name).map(Arc::new))
        .collect::<parquet::errors::Result<Vec<_>>>()
        .map_err(fail)?;
    let schema = Type::group_type_builder("schema")
        .with_fields(fields)
        .build()
        .map_err(fail)?;

    let mut buffer = Vec::new();
    let properties = Arc::new(WriterProperties::builder().build());
    let mut writer =
        SerializedFileWriter::new(&mut buffer, Arc::new(schema), properties).map_err(fail)?;
    let mut row_group = writer.next_row_group().map_err(fail)?;

    let rows = &table.rows;
    for (idx, kind) in kinds.iter().enumerate() {
        let Some(mut column) = row_group.next_column().map_err(fail)? else {
            break;
        };
        let written = match kind {
            ColumnKind::Boolean => {
                let (values, def) = levels(rows, idx, Value::as_bool);
                column.typed::<BoolType>().write_batch(&values, Some(&def), None)
            }
            ColumnKind::Int64 => {
                let (values, def) = levels(rows, idx, Value::as_i64);
                column.typed::<Int64Type>().write_batch(&values, Some(&def), None)
            }
            ColumnKind::Double => {
                let (values, def) = levels(rows, idx, Value::as_f64);
                column.typed::<DoubleType>().write_batch(&values, Some(&def), None)
            }
            ColumnKind::Utf8 => {
                let (values, def) = levels(rows, idx, |v| match v {
                    Value::Null => None,
                    other => Some(ByteArray::from(cell_text(other).into_bytes())),
                });
                column.typed::<ByteArrayType>().write_batch(&values, Some(&def), None)
            }
        };
        written.map_err(fail)?;
        column.close().map_err(fail)?;
    }

    row_group.close().map_err(fail)?;
    writer.close().map_err(fail)?;
    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use conduit_query::{DatasetSchema, FieldDef, FieldType};
    use serde_json::json;

    fn emp() -> Table {
        let schema = DatasetSchema::new(vec![
            FieldDef::new("id", FieldType::Int64),
            FieldDef::new("name", FieldType::String),
            FieldDef::new("score", FieldType::Float64),
            FieldDef::new("active", FieldType::Boolean),
        ]);
        let rows = vec![
            vec![json!(1), json!("ann, jr"), json!(9.5), json!(true)],
            vec![json!(2), Value::Null, json!(7), Value::Null],
        ];
        Table::new(schema, rows, 0)
    }

    #[test]
    fn test_csv_quotes_and_blanks() {
        let body = encode(FileFormat::Csv, &emp(), "s3://b/out.csv").unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "id,name,score,active\n1,\"ann, jr\",9.5,true\n2,,7,\n"
        );
    }

    #[test]
    fn test_json_records() {
        let body = encode(FileFormat::Json, &emp(), "s3://b/out.json").unwrap();
        let records: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "ann, jr");
        assert_eq!(records[1]["active"], Value::Null);
    }

    #[test]
    fn test_parquet_reads_back() {
        let body = encode(FileFormat::Parquet, &emp(), "s3://b/out.parquet").unwrap();
        let table = decode(FileFormat::Parquet, body, "s3://b/out.parquet").unwrap();
        assert_eq!(table.schema.column_names(), vec!["id", "name", "score", "active"]);
        assert_eq!(table.rows[0], vec![json!(1), json!("ann, jr"), json!(9.5), json!(true)]);
        // mixed integers and floats widen to double
        assert_eq!(table.rows[1], vec![json!(2), Value::Null, json!(7.0), Value::Null]);
    }

    #[test]
    fn test_column_kinds() {
        let rows = vec![vec![json!(1), json!("x"), json!({"a": 1})], vec![json!(true), json!(2), Value::Null]];
        assert_eq!(ColumnKind::of(&rows, 0), ColumnKind::Utf8);
        assert_eq!(ColumnKind::of(&rows, 1), ColumnKind::Utf8);
        assert_eq!(ColumnKind::of(&rows, 2), ColumnKind::Utf8);
        assert_eq!(ColumnKind::of(&[vec![Value::Null]], 0), ColumnKind::Utf8);
    }

    #[test]
    fn test_unencodable_formats() {
        assert!(matches!(
            encode(FileFormat::Orc, &emp(), "s3://b/out.orc"),
            Err(DataError::UnsupportedFormat(_))
        ));
    }
}
