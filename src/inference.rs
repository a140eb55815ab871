//! Column type inference over raw string rows.

use chrono::{NaiveDate, NaiveDateTime};

use crate::domain::{ColumnType, RawRow, Schema};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Classifies a single non-empty cell.
///
/// Parsers are tried in a fixed order and the first that accepts the value
/// wins, so `"123"` is an integer and never a date.
pub fn classify_value(value: &str) -> ColumnType {
    let value = value.trim();

    if value.parse::<i64>().is_ok() {
        ColumnType::Integer
    } else if value.parse::<f64>().is_ok() {
        ColumnType::Float
    } else if NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).is_ok() {
        ColumnType::Datetime
    } else if NaiveDate::parse_from_str(value, DATE_FORMAT).is_ok() {
        ColumnType::Date
    } else {
        ColumnType::String
    }
}

/// Infers one type per column.
///
/// Blank cells carry no evidence. The first classified cell seeds the column
/// type and any later cell of a different class broadens the column to
/// string for good. Columns without a single non-blank cell are strings.
pub fn infer_schema(columns: &[String], rows: &[RawRow]) -> Schema {
    columns
        .iter()
        .map(|column| {
            let inferred = infer_column(rows.iter().filter_map(|row| row.get(column)));
            (column.clone(), inferred)
        })
        .collect()
}

fn infer_column<'a>(values: impl Iterator<Item = &'a String>) -> ColumnType {
    let mut current: Option<ColumnType> = None;

    for value in values {
        if value.trim().is_empty() {
            continue;
        }

        current = match current {
            None => Some(classify_value(value)),
            Some(ColumnType::String) => break,
            Some(seen) if seen == classify_value(value) => Some(seen),
            Some(_) => Some(ColumnType::String),
        };
    }

    current.unwrap_or(ColumnType::String)
}
