pub mod changes;
pub mod codec;
pub mod coercion;
pub mod config;
pub mod database;
pub mod domain;
pub mod engine;
pub mod error;
pub mod header;
pub mod inference;
pub mod merge;
pub mod models;
pub mod notification;
pub mod processor;
pub mod queue;
pub mod schema;
pub mod storage;

pub use config::ServiceConfig;
pub use engine::CsvEngine;
pub use error::CsvServiceError;
