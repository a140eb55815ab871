//! Delimited text in and out.

use csv::{ReaderBuilder, WriterBuilder};
use serde_json::Value;

use crate::domain::{RawRow, Row, Schema};
use crate::error::{CsvServiceError, Result};
use crate::header::{ensure_unique, normalize_headers};

/// A parsed CSV document: raw header cells plus equally sized records.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl CsvTable {
    /// Normalizes the headers and keys every record by them.
    ///
    /// Fails if two headers collapse onto the same identifier.
    pub fn into_normalized_rows(self) -> Result<(Vec<String>, Vec<RawRow>)> {
        let columns = normalize_headers(&self.headers);
        ensure_unique(&columns)?;

        let rows = self
            .records
            .into_iter()
            .map(|record| columns.iter().cloned().zip(record).collect())
            .collect();

        Ok((columns, rows))
    }
}

/// Parses comma separated text with a mandatory header row.
///
/// Records whose field count differs from the header are rejected.
pub fn parse_csv(text: &str) -> Result<CsvTable> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(CsvServiceError::ParseFailure {
            message: "input has no header row".to_string(),
        });
    }

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        records.push(record.iter().map(str::to_string).collect());
    }

    Ok(CsvTable { headers, records })
}

/// Column order used when rendering rows: the schema's, else the first row's.
pub fn output_columns(schema: Option<&Schema>, rows: &[Row]) -> Vec<String> {
    match schema {
        Some(schema) if !schema.is_empty() => schema.column_names().map(str::to_string).collect(),
        _ => rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default(),
    }
}

/// Renders rows as CSV text with `columns` as the header row.
pub fn write_csv(columns: &[String], rows: &[Row]) -> Result<String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(columns.iter().map(|column| cell_text(row.get(column))))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CsvServiceError::InvalidState {
            message: format!("Failed to flush CSV output: {}", e),
        })?;

    String::from_utf8(bytes).map_err(|e| CsvServiceError::InvalidState {
        message: format!("CSV output is not valid UTF-8: {}", e),
    })
}

/// Builds `<stem>_<suffix>.csv` from an uploaded file name.
pub fn output_filename(name: &str, suffix: &str) -> String {
    let trimmed = name.trim();
    let stem = match trimmed.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("csv") => stem,
        _ => trimmed,
    };
    let stem = if stem.is_empty() { "table" } else { stem };
    format!("{}_{}.csv", stem, suffix)
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
