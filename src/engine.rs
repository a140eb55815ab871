use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::changes::validate_changes;
use crate::codec::{output_columns, output_filename, write_csv};
use crate::config::ServiceConfig;
use crate::database::DatabaseManager;
use crate::domain::{
    BatchStatus, ChangeBatch, ChangeTarget, CsvDownload, DerivedTable, RawRow, RetryReport,
    SourceTable, TableStatus,
};
use crate::error::{CsvServiceError, Result};
use crate::notification::{HttpMailer, LogNotifier, Notifier};
use crate::processor::TableProcessor;
use crate::queue::{Task, TaskQueue};
use crate::storage::TableStore;

/// Entry point for uploads, edits, downloads and retries.
///
/// Mutating operations persist a record and enqueue the follow-up work,
/// returning before that work runs.
pub struct CsvEngine {
    store: Arc<dyn TableStore>,
    processor: Arc<TableProcessor>,
    queue: TaskQueue,
}

impl CsvEngine {
    pub fn new(
        store: Arc<dyn TableStore>,
        notifier: Arc<dyn Notifier>,
        recipient: impl Into<String>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Self {
        let processor = Arc::new(TableProcessor::new(store.clone(), notifier, recipient));
        let queue = TaskQueue::start(processor.clone(), worker_count, queue_capacity);

        Self {
            store,
            processor,
            queue,
        }
    }

    pub async fn from_config(config: &ServiceConfig) -> Result<Self> {
        info!("Initializing CSV engine");

        let store: Arc<dyn TableStore> =
            Arc::new(DatabaseManager::new(&config.database_url).await?);

        let notifier: Arc<dyn Notifier> = match &config.mail_relay_url {
            Some(url) => Arc::new(HttpMailer::new(
                url,
                config.mail_sender.clone(),
                config.mail_relay_token.clone(),
            )?),
            None => {
                warn!("MAIL_RELAY_URL not set, notifications will only be logged");
                Arc::new(LogNotifier)
            }
        };

        let engine = Self::new(
            store,
            notifier,
            config.notification_recipient.clone(),
            config.worker_count,
            config.queue_capacity,
        );

        info!("CSV engine initialized successfully");
        Ok(engine)
    }

    /// Stores an uploaded CSV and queues it for processing.
    ///
    /// Never waits for queue space. If the queue is full or closed the table
    /// stays unprocessed and is picked up by the next retry scan.
    pub async fn upload(&self, name: &str, csv_text: &str) -> Result<Uuid> {
        let table = SourceTable::new(name, csv_text);
        self.store.insert_source(&table).await?;
        info!("Uploaded table {} ({})", table.id, table.name);

        if let Err(e) = self.queue.enqueue(Task::ProcessTable(table.id)) {
            warn!("Could not queue table {} for processing: {}", table.id, e);
        }
        Ok(table.id)
    }

    /// Queues a single table for another processing run.
    pub async fn reprocess(&self, table_id: Uuid) -> Result<()> {
        let table = self.get_table(table_id).await?;
        if table.status == TableStatus::Processing {
            return Err(CsvServiceError::AlreadyProcessing { id: table_id });
        }
        self.queue.enqueue(Task::ProcessTable(table_id))?;
        Ok(())
    }

    pub async fn get_table(&self, table_id: Uuid) -> Result<SourceTable> {
        self.store
            .get_source(table_id)
            .await?
            .ok_or_else(|| CsvServiceError::source_table_not_found(table_id))
    }

    pub async fn list_tables(&self) -> Result<Vec<SourceTable>> {
        self.store.list_sources().await
    }

    /// Derived snapshots of a table in creation order.
    pub async fn list_derived(&self, table_id: Uuid) -> Result<Vec<DerivedTable>> {
        self.get_table(table_id).await?;
        self.store.list_derived(table_id).await
    }

    pub async fn get_derived(&self, derived_id: Uuid) -> Result<DerivedTable> {
        self.store
            .get_derived(derived_id)
            .await?
            .ok_or_else(|| CsvServiceError::derived_table_not_found(derived_id))
    }

    /// Normalized content as CSV, or the original upload if not yet normalized.
    pub async fn download_table(&self, table_id: Uuid) -> Result<CsvDownload> {
        let table = self.get_table(table_id).await?;

        let content = match &table.content {
            Some(rows) => write_csv(&output_columns(table.schema.as_ref(), rows), rows)?,
            None => table.raw_content.clone(),
        };

        Ok(CsvDownload {
            filename: output_filename(&table.name, "normalized"),
            content,
        })
    }

    pub async fn download_derived(&self, derived_id: Uuid) -> Result<CsvDownload> {
        let derived = self.get_derived(derived_id).await?;
        let parent = self.get_table(derived.parent_id).await?;

        let columns = output_columns(parent.schema.as_ref(), &derived.content);
        Ok(CsvDownload {
            filename: output_filename(&parent.name, "derived"),
            content: write_csv(&columns, &derived.content)?,
        })
    }

    /// Deletes a table together with its derived snapshots.
    pub async fn delete_table(&self, table_id: Uuid) -> Result<()> {
        if !self.store.delete_source(table_id).await? {
            return Err(CsvServiceError::source_table_not_found(table_id));
        }
        info!("Deleted table {}", table_id);
        Ok(())
    }

    pub async fn delete_derived(&self, derived_id: Uuid) -> Result<()> {
        if !self.store.delete_derived(derived_id).await? {
            return Err(CsvServiceError::derived_table_not_found(derived_id));
        }
        info!("Deleted derived table {}", derived_id);
        Ok(())
    }

    /// Validates rows against the target's schema, records them as a pending
    /// change batch and queues the merge.
    ///
    /// A batch that cannot be queued stays pending for the next retry scan.
    pub async fn submit_changes(&self, target: ChangeTarget, rows: &[RawRow]) -> Result<Uuid> {
        let schema = self.processor.target_schema(target).await?;
        let data = validate_changes(&schema, rows)?;

        let batch = ChangeBatch::new(target, data);
        self.store.insert_batch(&batch).await?;
        info!(
            "Recorded change batch {} with {} rows for {} table {}",
            batch.id,
            batch.data.len(),
            target.kind(),
            target.id()
        );

        if let Err(e) = self.queue.enqueue(Task::ApplyChanges(batch.id)) {
            warn!("Could not queue change batch {}: {}", batch.id, e);
        }
        Ok(batch.id)
    }

    pub async fn get_change_batch(&self, batch_id: Uuid) -> Result<ChangeBatch> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| CsvServiceError::change_batch_not_found(batch_id))
    }

    pub async fn list_changes(&self) -> Result<Vec<ChangeBatch>> {
        self.store.list_batches().await
    }

    /// Resubmits every unprocessed or failed table.
    ///
    /// Tables still waiting in the queue, e.g. fresh uploads, are skipped so
    /// a backlog does not run them twice. A table that cannot be queued is
    /// reported and the scan moves on.
    pub async fn retry_failed(&self) -> Result<RetryReport> {
        let tables = self
            .store
            .list_sources_with_status(&[TableStatus::Unprocessed, TableStatus::Failed])
            .await?;

        let mut report = RetryReport::default();
        for table in tables {
            let outcome = self.queue.enqueue(Task::ProcessTable(table.id));
            if let Err(e) = &outcome {
                warn!("Failed to resubmit table {}: {}", table.id, e);
            }
            report.record(table.id, &outcome);
        }

        info!(
            "Retry scan resubmitted {} tables ({} already queued, {} errors)",
            report.resubmitted.len(),
            report.already_queued.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Resubmits every change batch still pending.
    pub async fn retry_pending_changes(&self) -> Result<RetryReport> {
        let batches = self
            .store
            .list_batches_with_status(BatchStatus::Pending)
            .await?;

        let mut report = RetryReport::default();
        for batch in batches {
            let outcome = self.queue.enqueue(Task::ApplyChanges(batch.id));
            if let Err(e) = &outcome {
                warn!("Failed to resubmit change batch {}: {}", batch.id, e);
            }
            report.record(batch.id, &outcome);
        }

        info!(
            "Resubmitted {} pending change batches ({} already queued, {} errors)",
            report.resubmitted.len(),
            report.already_queued.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Stops accepting work and waits for in-flight runs.
    pub async fn shutdown(self) {
        info!("Shutting down CSV engine");
        self.queue.shutdown().await;
    }
}
