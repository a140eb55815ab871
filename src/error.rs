use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CsvServiceError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("Failed to parse CSV: {message}")]
    ParseFailure { message: String },

    #[error("Failed to deliver notification: {message}")]
    DeliveryFailure { message: String },

    #[error("Table {id} is already being processed")]
    AlreadyProcessing { id: Uuid },

    #[error("Invalid change batch: {message}")]
    InvalidChange { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Task queue is full")]
    QueueFull,

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl CsvServiceError {
    pub fn source_table_not_found(id: Uuid) -> Self {
        CsvServiceError::NotFound {
            kind: "Source table",
            id,
        }
    }

    pub fn derived_table_not_found(id: Uuid) -> Self {
        CsvServiceError::NotFound {
            kind: "Derived table",
            id,
        }
    }

    pub fn change_batch_not_found(id: Uuid) -> Self {
        CsvServiceError::NotFound {
            kind: "Change batch",
            id,
        }
    }
}

impl From<csv::Error> for CsvServiceError {
    fn from(err: csv::Error) -> Self {
        CsvServiceError::ParseFailure {
            message: err.to_string(),
        }
    }
}

impl From<diesel::result::Error> for CsvServiceError {
    fn from(err: diesel::result::Error) -> Self {
        CsvServiceError::DatabaseError {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CsvServiceError>;
