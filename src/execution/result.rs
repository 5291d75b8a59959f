use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Column type, from the server type or inferred from returned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    Temporal,
    Json,
    Unknown,
}

impl ColumnType {
    /// Map a PostgreSQL type name as sqlx reports it (`INT4`, `TIMESTAMPTZ`, `TEXT[]`).
    pub fn from_pg_type(name: &str) -> Self {
        if name.ends_with("[]") {
            return ColumnType::Json;
        }
        match name {
            "INT2" | "INT4" | "INT8" | "OID" => ColumnType::Integer,
            "FLOAT4" | "FLOAT8" | "NUMERIC" | "MONEY" => ColumnType::Float,
            "BOOL" => ColumnType::Boolean,
            "DATE" | "TIME" | "TIMETZ" | "TIMESTAMP" | "TIMESTAMPTZ" | "INTERVAL" => ColumnType::Temporal,
            "JSON" | "JSONB" | "RECORD" => ColumnType::Json,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "UUID" | "CITEXT" => ColumnType::Text,
            _ => ColumnType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// One JSON object per row, keys in select-list order.
    pub rows: Vec<Value>,
    pub columns: Vec<ColumnMeta>,
    pub row_count: usize,
    pub elapsed_ms: u64,
    /// More rows were available than the cap allowed.
    pub truncated: bool,
}

impl ExecutionResult {
    /// Build a result from column metadata known up front and JSON row
    /// objects keyed by those column names. Keeps at most `max_rows`.
    pub fn with_columns(columns: Vec<ColumnMeta>, mut rows: Vec<Value>, max_rows: usize, elapsed: Duration) -> Self {
        let truncated = rows.len() > max_rows;
        rows.truncate(max_rows);

        Self {
            row_count: rows.len(),
            rows,
            columns,
            elapsed_ms: elapsed.as_millis() as u64,
            truncated,
        }
    }

    /// Build a result from JSON row objects alone, inferring the columns
    /// from the values. An empty result has no columns.
    pub fn from_json_rows(rows: Vec<Value>, max_rows: usize, elapsed: Duration) -> Self {
        let columns = infer_columns(&rows[..rows.len().min(max_rows)]);
        Self::with_columns(columns, rows, max_rows, elapsed)
    }
}

/// Make output names distinct so rows can be keyed by name. Later duplicates
/// get `_2`, `_3`, ... skipping names the query already uses.
pub fn unique_column_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let names: Vec<String> = names.into_iter().collect();
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();

    names
        .into_iter()
        .map(|name| {
            if seen.insert(name.clone()) {
                return name;
            }
            let mut n = 2;
            loop {
                let candidate = format!("{}_{}", name, n);
                if taken.insert(candidate.clone()) {
                    seen.insert(candidate.clone());
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

fn infer_columns(rows: &[Value]) -> Vec<ColumnMeta> {
    let names: Vec<String> = match rows.first() {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        _ => return Vec::new(),
    };

    names
        .into_iter()
        .map(|name| {
            let column_type = rows
                .iter()
                .filter_map(|row| row.get(&name))
                .filter(|v| !v.is_null())
                .map(value_type)
                .fold(ColumnType::Unknown, merge_types);
            ColumnMeta { name, column_type }
        })
        .collect()
}

fn value_type(value: &Value) -> ColumnType {
    match value {
        Value::Bool(_) => ColumnType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Integer,
        Value::Number(_) => ColumnType::Float,
        Value::String(s) if looks_temporal(s) => ColumnType::Temporal,
        Value::String(_) => ColumnType::Text,
        Value::Array(_) | Value::Object(_) => ColumnType::Json,
        Value::Null => ColumnType::Unknown,
    }
}

fn merge_types(acc: ColumnType, next: ColumnType) -> ColumnType {
    match (acc, next) {
        (ColumnType::Unknown, t) => t,
        (a, b) if a == b => a,
        (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => ColumnType::Float,
        (ColumnType::Temporal, ColumnType::Text) | (ColumnType::Text, ColumnType::Temporal) => ColumnType::Text,
        _ => ColumnType::Json,
    }
}

/// `to_json` renders dates as `YYYY-MM-DD` and timestamps as ISO 8601.
fn looks_temporal(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}
