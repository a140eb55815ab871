use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CsvServiceError;

/// A row as read from delimited text: column name to raw cell text.
pub type RawRow = IndexMap<String, String>;

/// A row as stored in table content: column name to JSON value.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Date,
    Datetime,
    String,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
            ColumnType::String => "string",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered mapping of normalized column name to inferred type.
///
/// Iteration order is the original column order of the uploaded table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: IndexMap<String, ColumnType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, column_type: ColumnType) {
        self.columns.insert(column.into(), column_type);
    }

    pub fn get(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, ColumnType)> for Schema {
    fn from_iter<I: IntoIterator<Item = (S, ColumnType)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Unprocessed,
    Processing,
    Processed,
    Failed,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Unprocessed => "unprocessed",
            TableStatus::Processing => "processing",
            TableStatus::Processed => "processed",
            TableStatus::Failed => "failed",
        }
    }

    /// Statuses picked up by the bulk retry scan.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TableStatus::Unprocessed | TableStatus::Failed)
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TableStatus {
    type Err = CsvServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(TableStatus::Unprocessed),
            "processing" => Ok(TableStatus::Processing),
            "processed" => Ok(TableStatus::Processed),
            "failed" => Ok(TableStatus::Failed),
            other => Err(CsvServiceError::InvalidState {
                message: format!("Unknown table status '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processed => "processed",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = CsvServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processed" => Ok(BatchStatus::Processed),
            other => Err(CsvServiceError::InvalidState {
                message: format!("Unknown change batch status '{}'", other),
            }),
        }
    }
}

/// The table a change batch appends to. A reference, not an ownership link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChangeTarget {
    Source(Uuid),
    Derived(Uuid),
}

impl ChangeTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeTarget::Source(_) => "source",
            ChangeTarget::Derived(_) => "derived",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ChangeTarget::Source(id) | ChangeTarget::Derived(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self, CsvServiceError> {
        match kind {
            "source" => Ok(ChangeTarget::Source(id)),
            "derived" => Ok(ChangeTarget::Derived(id)),
            other => Err(CsvServiceError::InvalidState {
                message: format!("Unknown change target kind '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    pub id: Uuid,
    pub name: String,
    /// CSV text exactly as uploaded.
    pub raw_content: String,
    /// Header-normalized, string-valued rows. `None` until first inference.
    pub content: Option<Vec<Row>>,
    pub schema: Option<Schema>,
    pub status: TableStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SourceTable {
    pub fn new(name: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            raw_content: raw_content.into(),
            content: None,
            schema: None,
            status: TableStatus::Unprocessed,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTable {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub content: Vec<Row>,
    pub created_at: DateTime<Utc>,
}

impl DerivedTable {
    pub fn new(parent_id: Uuid, content: Vec<Row>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub id: Uuid,
    pub target: ChangeTarget,
    pub data: Vec<Row>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}

impl ChangeBatch {
    pub fn new(target: ChangeTarget, data: Vec<Row>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            data,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a bulk resubmission scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryReport {
    pub resubmitted: Vec<Uuid>,
    /// Already waiting in the queue, left as they were.
    pub already_queued: Vec<Uuid>,
    pub errors: Vec<(Uuid, String)>,
}

impl RetryReport {
    /// Files the outcome of one enqueue attempt under `id`.
    pub fn record(&mut self, id: Uuid, outcome: &Result<bool, CsvServiceError>) {
        match outcome {
            Ok(true) => self.resubmitted.push(id),
            Ok(false) => self.already_queued.push(id),
            Err(e) => self.errors.push((id, e.to_string())),
        }
    }
}

/// A rendered CSV file ready for download or attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvDownload {
    pub filename: String,
    pub content: String,
}
