//! Typing of user-submitted rows before they become a change batch.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use crate::domain::{ColumnType, RawRow, Row, Schema};
use crate::error::{CsvServiceError, Result};
use crate::header::normalize_header;
use crate::inference::{DATETIME_FORMAT, DATE_FORMAT};

/// Validates submitted rows against `schema` and converts them to typed rows.
///
/// Column names are normalized the same way upload headers are, so callers
/// may use either the original or the normalized spelling. Every row must
/// carry exactly the schema's columns; output rows follow schema order.
/// Any invalid cell rejects the whole submission.
pub fn validate_changes(schema: &Schema, rows: &[RawRow]) -> Result<Vec<Row>> {
    if rows.is_empty() {
        return Err(invalid("submission contains no rows".to_string()));
    }

    rows.iter()
        .enumerate()
        .map(|(index, row)| validate_row(schema, index, row))
        .collect()
}

fn validate_row(schema: &Schema, index: usize, row: &RawRow) -> Result<Row> {
    let mut normalized = RawRow::with_capacity(row.len());
    for (column, value) in row {
        let column = normalize_header(column);
        if !schema.contains(&column) {
            return Err(invalid(format!("row {}: unknown column '{}'", index, column)));
        }
        if normalized.insert(column.clone(), value.clone()).is_some() {
            return Err(invalid(format!("row {}: column '{}' given twice", index, column)));
        }
    }

    schema
        .iter()
        .map(|(column, column_type)| {
            let raw = normalized
                .get(column)
                .ok_or_else(|| invalid(format!("row {}: missing column '{}'", index, column)))?;
            let value = type_value(raw, column_type).ok_or_else(|| {
                invalid(format!(
                    "row {}: value '{}' is not a valid {} for column '{}'",
                    index, raw, column_type, column
                ))
            })?;
            Ok((column.to_string(), value))
        })
        .collect()
}

fn type_value(raw: &str, column_type: ColumnType) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::String(String::new()));
    }

    match column_type {
        ColumnType::Integer => trimmed.parse::<i64>().ok().map(Value::from),
        ColumnType::Float => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ColumnType::Datetime => NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
            .ok()
            .map(|dt| Value::String(dt.format(DATETIME_FORMAT).to_string())),
        ColumnType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .ok()
            .map(|d| Value::String(d.format(DATE_FORMAT).to_string())),
        ColumnType::String => Some(Value::String(raw.to_string())),
    }
}

fn invalid(message: String) -> CsvServiceError {
    CsvServiceError::InvalidChange { message }
}
