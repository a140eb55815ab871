//! Lenient per-cell coercion and the halving transform.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use crate::domain::{ColumnType, RawRow, Row, Schema};
use crate::inference::{DATETIME_FORMAT, DATE_FORMAT};

/// Coerces every cell of `row` according to `schema`.
///
/// The output keeps the input's columns in the same order. Cells that fail
/// their column's coercion keep their raw text.
pub fn coerce_row(row: &RawRow, schema: &Schema) -> Row {
    row.iter()
        .map(|(column, raw)| {
            let value = match schema.get(column) {
                Some(column_type) => coerce_value(raw, column_type),
                None => Value::String(raw.clone()),
            };
            (column.clone(), value)
        })
        .collect()
}

pub fn coerce_rows(rows: &[RawRow], schema: &Schema) -> Vec<Row> {
    rows.iter().map(|row| coerce_row(row, schema)).collect()
}

pub fn coerce_value(raw: &str, column_type: ColumnType) -> Value {
    let coerced = match column_type {
        ColumnType::Integer => halve_integer(raw),
        ColumnType::Float => halve_float(raw),
        ColumnType::Datetime => reformat_datetime(raw),
        ColumnType::Date => reformat_date(raw),
        ColumnType::String => None,
    };

    coerced.unwrap_or_else(|| Value::String(raw.to_string()))
}

// Only plain digit strings are halved; signs and padding stay raw.
fn halve_integer(raw: &str) -> Option<Value> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: i64 = raw.parse().ok()?;
    Some(Value::from(n / 2))
}

fn halve_float(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let half = trimmed.parse::<f64>().ok()? / 2.0;
    Number::from_f64(half).map(Value::Number)
}

fn reformat_datetime(raw: &str) -> Option<Value> {
    NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FORMAT)
        .ok()
        .map(|dt| Value::String(dt.format(DATETIME_FORMAT).to_string()))
}

fn reformat_date(raw: &str) -> Option<Value> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .ok()
        .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
}
