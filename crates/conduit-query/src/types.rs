use serde::{Deserialize, Serialize};
use std::fmt;

/// Field data types supported by query results
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// NULL value
    Null,
    /// Boolean true/false
    Boolean,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// UTF-8 string
    String,
    /// Binary data
    Bytes,
    /// ISO 8601 date
    Date,
    /// ISO 8601 timestamp
    Timestamp,
    /// Time of day without a date
    Time,
    /// Exact decimal, carried as its canonical text
    Decimal,
    /// JSON object
    Json,
    /// UUID
    Uuid,
}

impl FieldType {
    /// Best-effort type of a materialized JSON value
    pub fn of_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldType::Null,
            serde_json::Value::Bool(_) => FieldType::Boolean,
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Int64,
            serde_json::Value::Number(_) => FieldType::Float64,
            serde_json::Value::String(_) => FieldType::String,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => FieldType::Json,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Null => write!(f, "null"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Int32 => write!(f, "int32"),
            FieldType::Int64 => write!(f, "int64"),
            FieldType::Float32 => write!(f, "float32"),
            FieldType::Float64 => write!(f, "float64"),
            FieldType::String => write!(f, "string"),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::Date => write!(f, "date"),
            FieldType::Timestamp => write!(f, "timestamp"),
            FieldType::Time => write!(f, "time"),
            FieldType::Decimal => write!(f, "decimal"),
            FieldType::Json => write!(f, "json"),
            FieldType::Uuid => write!(f, "uuid"),
        }
    }
}

/// Definition of a single column in a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether field is nullable
    pub nullable: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }
}

/// Ordered column definitions of a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub fields: Vec<FieldDef>,
}

impl DatasetSchema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Schema inferred from column names and the first non-null value of each column
    pub fn infer(columns: &[String], rows: &[Row]) -> Self {
        let fields = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let field_type = rows
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .find(|v| !v.is_null())
                    .map(FieldType::of_value)
                    .unwrap_or(FieldType::Null);
                FieldDef::new(name.clone(), field_type)
            })
            .collect();
        Self { fields }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A row of data as an ordered tuple of values, aligned with the table schema
pub type Row = Vec<serde_json::Value>;

/// Statistics about one fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStats {
    /// Number of rows returned
    pub row_count: usize,
    /// Execution time in milliseconds
    pub execution_ms: u64,
}

/// Materialized result of a fetch: schema plus ordered rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub schema: DatasetSchema,
    pub rows: Vec<Row>,
    pub stats: QueryStats,
}

impl Table {
    pub fn new(schema: DatasetSchema, rows: Vec<Row>, execution_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            schema,
            rows,
            stats: QueryStats {
                row_count,
                execution_ms,
            },
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.schema.fields.len())
    }

    /// Append another table's rows, aligning columns by name.
    ///
    /// Columns unknown to `self` are added at the end; cells a row does not
    /// carry are filled with null.
    pub fn append(&mut self, other: Table) {
        if self.schema.fields.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }

        for field in &other.schema.fields {
            if self.schema.position(&field.name).is_none() {
                self.schema.fields.push(field.clone());
                for row in &mut self.rows {
                    row.push(serde_json::Value::Null);
                }
            }
        }

        let mapping: Vec<usize> = other
            .schema
            .fields
            .iter()
            .filter_map(|f| self.schema.position(&f.name))
            .collect();
        let width = self.schema.fields.len();

        for row in other.rows {
            let mut aligned = vec![serde_json::Value::Null; width];
            for (value, target) in row.into_iter().zip(mapping.iter()) {
                aligned[*target] = value;
            }
            self.rows.push(aligned);
        }

        self.stats.row_count = self.rows.len();
        self.stats.execution_ms += other.stats.execution_ms;
    }
}

/// A single positional query parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Convert caller-supplied text: integer, then finite float, then boolean, else the text itself.
    ///
    /// Words such as `nan` or `inf` parse as floats but stay text.
    pub fn coerce(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<i64>() {
            return ParamValue::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            if v.is_finite() {
                return ParamValue::Float(v);
            }
        }
        if raw.eq_ignore_ascii_case("true") {
            return ParamValue::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return ParamValue::Bool(false);
        }
        ParamValue::Text(raw.to_string())
    }

    /// Coerce every parameter independently, preserving order
    pub fn coerce_all<I, S>(raw: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter().map(|s| Self::coerce(s.as_ref())).collect()
    }

    /// Typed configuration values are taken as-is; strings are not re-coerced
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ParamValue::Null,
            serde_json::Value::Bool(b) => ParamValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => ParamValue::Text(s.clone()),
            other => ParamValue::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Null => serde_json::Value::Null,
            ParamValue::Bool(b) => serde_json::Value::Bool(*b),
            ParamValue::Int(i) => serde_json::Value::from(*i),
            ParamValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ParamValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Call-time request: optional query text or locator plus optional parameters.
///
/// Absent fields fall back to the reader's construction-time values for this
/// call only; the reader's stored defaults are never modified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub query: Option<String>,
    pub params: Option<Vec<ParamValue>>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_params(mut self, params: Vec<ParamValue>) -> Self {
        self.params = Some(params);
        self
    }

    /// Call-time query if given and non-blank, else the fallback
    pub fn effective_query<'a>(&'a self, fallback: Option<&'a str>) -> Option<&'a str> {
        self.query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .or(fallback.filter(|q| !q.trim().is_empty()))
    }

    /// Call-time parameters if given, else the fallback
    pub fn effective_params<'a>(&'a self, fallback: &'a [ParamValue]) -> &'a [ParamValue] {
        self.params.as_deref().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_param_coercion() {
        assert_eq!(ParamValue::coerce("42"), ParamValue::Int(42));
        assert_eq!(ParamValue::coerce("-7"), ParamValue::Int(-7));
        assert_eq!(ParamValue::coerce("3.14"), ParamValue::Float(3.14));
        assert_eq!(ParamValue::coerce("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::coerce("FALSE"), ParamValue::Bool(false));
        assert_eq!(ParamValue::coerce("abc"), ParamValue::Text("abc".into()));
    }

    #[test]
    fn test_non_finite_words_stay_text() {
        for word in ["nan", "NaN", "inf", "-inf", "Infinity"] {
            assert_eq!(ParamValue::coerce(word), ParamValue::Text(word.into()));
        }
        assert_eq!(ParamValue::coerce("1e3"), ParamValue::Float(1000.0));
    }

    #[test]
    fn test_coerce_all_preserves_order() {
        let params = ParamValue::coerce_all(["parquet", "10", "True"]);
        assert_eq!(
            params,
            vec![
                ParamValue::Text("parquet".into()),
                ParamValue::Int(10),
                ParamValue::Bool(true),
            ]
        );
    }

    #[test]
    fn test_from_json_keeps_strings() {
        assert_eq!(ParamValue::from_json(&json!("10")), ParamValue::Text("10".into()));
        assert_eq!(ParamValue::from_json(&json!(10)), ParamValue::Int(10));
        assert_eq!(ParamValue::from_json(&json!(2.5)), ParamValue::Float(2.5));
        assert_eq!(ParamValue::from_json(&json!(null)), ParamValue::Null);
    }

    #[test]
    fn test_effective_query_prefers_call_time() {
        let stored = Some("SELECT 1");
        let req = QueryRequest::new().with_query("SELECT 2");
        assert_eq!(req.effective_query(stored), Some("SELECT 2"));
        assert_eq!(QueryRequest::new().effective_query(stored), Some("SELECT 1"));
        assert_eq!(QueryRequest::new().with_query("  ").effective_query(None), None);
    }

    #[test]
    fn test_table_append_aligns_by_name() {
        let mut left = Table::new(
            DatasetSchema::infer(&["id".into(), "name".into()], &[vec![json!(1), json!("a")]]),
            vec![vec![json!(1), json!("a")]],
            3,
        );
        let right = Table::new(
            DatasetSchema::infer(&["name".into(), "age".into()], &[vec![json!("b"), json!(30)]]),
            vec![vec![json!("b"), json!(30)]],
            2,
        );
        left.append(right);

        assert_eq!(left.schema.column_names(), vec!["id", "name", "age"]);
        assert_eq!(left.rows[0], vec![json!(1), json!("a"), json!(null)]);
        assert_eq!(left.rows[1], vec![json!(null), json!("b"), json!(30)]);
        assert_eq!(left.shape(), (2, 3));
        assert_eq!(left.stats.execution_ms, 5);
    }

    #[test]
    fn test_schema_inference() {
        let schema = DatasetSchema::infer(
            &["a".into(), "b".into()],
            &[vec![json!(null), json!(1.5)], vec![json!(true), json!(2.0)]],
        );
        assert_eq!(schema.fields[0].field_type, FieldType::Boolean);
        assert_eq!(schema.fields[1].field_type, FieldType::Float64);
    }
}
