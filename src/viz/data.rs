//! Data summaries for visualization.
//!
//! Extracts column metadata and sample values from a stored `execute_sql`
//! payload so the spec agent can reason about the data without seeing all of
//! it.

use serde::Serialize;
use serde_json::Value;
use time::macros::format_description;

use crate::db::Row;
use crate::viz::transforms::coerce_time;

/// Rows scanned for the union of column keys.
const KEY_SCAN_ROWS: usize = 50;

/// Values sampled per column for type inference.
const TYPE_SAMPLE_VALUES: usize = 20;

/// Sample values carried into the prompt per column.
const PROMPT_SAMPLE_VALUES: usize = 5;

/// Summary of one result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub sample: Vec<Value>,
}

/// Summary of a stored result payload.
#[derive(Debug, Clone)]
pub struct DataSummary {
    pub columns: Vec<ColumnSummary>,
    pub row_count: usize,
    pub rows: Vec<Row>,
}

/// Extracts column info and samples from an `execute_sql` result payload.
pub fn extract_data_summary(payload: &Value) -> DataSummary {
    let rows = match payload.get("results") {
        Some(Value::Array(items)) => coerce_rows(items),
        _ => Vec::new(),
    };

    let row_count = payload
        .get("row_count")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(rows.len());

    let columns = extract_columns(&rows);
    DataSummary {
        columns,
        row_count,
        rows,
    }
}

/// Infers a column type from sample values:
/// `number`, `string`, `time`, `boolean`, or `null`.
pub fn infer_column_type(values: &[Value]) -> &'static str {
    let cleaned: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    if cleaned.is_empty() {
        return "null";
    }

    if cleaned.iter().all(|v| v.is_boolean()) {
        return "boolean";
    }

    if cleaned.iter().all(|v| v.is_number()) {
        return "number";
    }

    if cleaned.iter().all(|v| is_time_value(v)) {
        return "time";
    }

    "string"
}

fn extract_columns(rows: &[Row]) -> Vec<ColumnSummary> {
    if rows.is_empty() {
        return Vec::new();
    }

    // Union of keys from the first rows, in first-seen order, so sparse
    // columns are not missed.
    let mut keys: Vec<String> = Vec::new();
    for row in rows.iter().take(KEY_SCAN_ROWS) {
        for key in row.keys() {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.clone());
            }
        }
    }

    keys.into_iter()
        .map(|key| {
            let sample_values: Vec<Value> = rows
                .iter()
                .take(TYPE_SAMPLE_VALUES)
                .filter_map(|row| row.get(&key).cloned())
                .collect();
            let column_type = infer_column_type(&sample_values).to_string();
            ColumnSummary {
                name: key,
                column_type,
                sample: sample_values.into_iter().take(PROMPT_SAMPLE_VALUES).collect(),
            }
        })
        .collect()
}

fn coerce_rows(items: &[Value]) -> Vec<Row> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => map.clone(),
            other => {
                let mut row = Row::new();
                row.insert("value".to_string(), other.clone());
                row
            }
        })
        .collect()
}

fn is_time_value(value: &Value) -> bool {
    if coerce_time(value).is_some() {
        return true;
    }
    // Bare times like "12:30:00".
    if let Value::String(s) = value {
        let time_format = format_description!("[hour]:[minute]:[second]");
        return time::Time::parse(s.trim(), &time_format).is_ok();
    }
    false
}
