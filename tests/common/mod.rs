#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use uuid::Uuid;

use csv_service::domain::{RawRow, SourceTable, TableStatus};
use csv_service::error::{CsvServiceError, Result};
use csv_service::notification::{Notification, Notifier};
use csv_service::storage::TableStore;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

pub const RECIPIENT: &str = "ops@example.com";

/// Keeps every notification it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Rejects every message like an unreachable relay would.
#[derive(Debug, Default)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _notification: &Notification) -> Result<()> {
        Err(CsvServiceError::DeliveryFailure {
            message: "relay unreachable".to_string(),
        })
    }
}

pub fn raw_row(pairs: &[(&str, &str)]) -> RawRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Polls the store until the table leaves `unprocessed`/`processing`.
pub async fn wait_until_settled(store: &Arc<dyn TableStore>, table_id: Uuid) -> SourceTable {
    for _ in 0..500 {
        if let Some(table) = store.get_source(table_id).await.unwrap() {
            if matches!(table.status, TableStatus::Processed | TableStatus::Failed) {
                return table;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("table {} never settled", table_id);
}
