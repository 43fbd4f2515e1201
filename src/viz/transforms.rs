//! Transform pipeline for visualization data.
//!
//! Sorts push nulls to the end regardless of direction; numeric-looking keys
//! compare numerically and ISO timestamps chronologically, everything else
//! falls back to case-insensitive text.

use serde_json::Value;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::db::Row;
use crate::viz::spec::{FilterConfig, FilterOp, SortDir, SortItem, Transform};

/// Applies the transform pipeline to rows, in order.
pub fn apply_transforms(rows: Vec<Row>, transforms: &[Transform]) -> Vec<Row> {
    let mut result = rows;
    for transform in transforms {
        result = match transform {
            Transform::Sort { sort } => apply_sort(result, sort),
            Transform::Limit { limit } => {
                result.truncate(*limit as usize);
                result
            }
            Transform::Filter { filter } => apply_filter(result, filter),
        };
    }
    result
}

/// Sorts rows by multiple keys. Keys apply in reverse so the first listed
/// sort dominates; within each pass nulls always end up last.
pub fn apply_sort(rows: Vec<Row>, sorts: &[SortItem]) -> Vec<Row> {
    let mut result = rows;
    for sort in sorts.iter().rev() {
        let field = &sort.field;

        result.sort_by(|a, b| sort_key(a.get(field)).cmp(&sort_key(b.get(field))));
        if sort.dir == SortDir::Desc {
            result.reverse();
        }

        let (non_null, null): (Vec<Row>, Vec<Row>) = result
            .into_iter()
            .partition(|row| !matches!(row.get(field), None | Some(Value::Null)));
        result = non_null;
        result.extend(null);
    }
    result
}

/// Keeps rows matching the filter condition.
pub fn apply_filter(rows: Vec<Row>, filter: &FilterConfig) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| {
            let value = row.get(&filter.field).unwrap_or(&Value::Null);
            compare(value, filter.op, &filter.value)
        })
        .collect()
}

/// Rank-ordered sort key: numbers, then times, then lowercase text, then null.
#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Number(f64),
    Time(i128),
    Text(String),
    Null,
}

impl Eq for SortKey {}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Null, Self::Null) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Time(_) => 1,
            Self::Text(_) => 2,
            Self::Null => 3,
        }
    }
}

fn sort_key(value: Option<&Value>) -> SortKey {
    let Some(value) = value else {
        return SortKey::Null;
    };
    if value.is_null() {
        return SortKey::Null;
    }

    if let Some(n) = coerce_number(value) {
        return SortKey::Number(n);
    }
    if let Some(t) = coerce_time(value) {
        return SortKey::Time(t.unix_timestamp_nanos());
    }
    SortKey::Text(value_text(value).to_lowercase())
}

fn compare(value: &Value, op: FilterOp, target: &Value) -> bool {
    match op {
        FilterOp::Eq => equals(value, target),
        FilterOp::Ne => !equals(value, target),
        _ => {
            if let (Some(left), Some(right)) = (coerce_number(value), coerce_number(target)) {
                return compare_ordered(left.total_cmp(&right), op);
            }
            if let (Some(left), Some(right)) = (coerce_time(value), coerce_time(target)) {
                return compare_ordered(left.cmp(&right), op);
            }
            false
        }
    }
}

fn equals(value: &Value, target: &Value) -> bool {
    if value.is_null() || target.is_null() {
        return value.is_null() && target.is_null();
    }

    if let (Some(left), Some(right)) = (coerce_number(value), coerce_number(target)) {
        return left == right;
    }
    if let (Some(left), Some(right)) = (coerce_time(value), coerce_time(target)) {
        return left == right;
    }
    value == target
}

fn compare_ordered(ordering: std::cmp::Ordering, op: FilterOp) -> bool {
    use std::cmp::Ordering::*;
    match op {
        FilterOp::Gt => ordering == Greater,
        FilterOp::Lt => ordering == Less,
        FilterOp::Ge => matches!(ordering, Greater | Equal),
        FilterOp::Le => matches!(ordering, Less | Equal),
        FilterOp::Eq | FilterOp::Ne => false,
    }
}

/// Coerces a JSON value to a number. Booleans are not numbers.
pub(crate) fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Coerces a JSON string to a timestamp. Accepts RFC 3339 (including the `Z`
/// suffix), `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD`, and `YYYY-MM`.
pub(crate) fn coerce_time(value: &Value) -> Option<OffsetDateTime> {
    let Value::String(s) = value else {
        return None;
    };
    let s = s.trim();

    if let Ok(dt) = OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339) {
        return Some(dt);
    }

    let datetime_format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(s, &datetime_format) {
        return Some(dt.assume_utc());
    }

    let datetime_space_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(s, &datetime_space_format) {
        return Some(dt.assume_utc());
    }

    let date_format = format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(s, &date_format) {
        return Some(date.midnight().assume_utc());
    }

    // Year-month shorthand (e.g. "2023-06").
    let month_format = format_description!("[year]-[month]-[day]");
    if s.len() == 7 && s.as_bytes()[4] == b'-' {
        if let Ok(date) = Date::parse(&format!("{s}-01"), &month_format) {
            return Some(date.midnight().assume_utc());
        }
    }

    None
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
