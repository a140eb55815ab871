use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{output_columns, output_filename, parse_csv, write_csv};
use crate::coercion::coerce_rows;
use crate::domain::{BatchStatus, ChangeTarget, DerivedTable, RawRow, Row, Schema, SourceTable};
use crate::error::{CsvServiceError, Result};
use crate::inference::infer_schema;
use crate::merge::merge_changes;
use crate::notification::{Notification, Notifier};
use crate::storage::TableStore;

/// Runs the processing and change-application sequences against a store.
pub struct TableProcessor {
    store: Arc<dyn TableStore>,
    notifier: Arc<dyn Notifier>,
    recipient: String,
}

impl TableProcessor {
    pub fn new(
        store: Arc<dyn TableStore>,
        notifier: Arc<dyn Notifier>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            recipient: recipient.into(),
        }
    }

    /// Normalizes, infers, coerces and publishes one source table.
    ///
    /// Lookup and in-flight errors are returned without touching the table.
    /// Every later error marks the table failed with the error text as the
    /// reason before it is returned, and no derived table of that run
    /// remains.
    pub async fn process_table(&self, table_id: Uuid) -> Result<DerivedTable> {
        let table = self.store.begin_processing(table_id).await?;
        info!("Processing table {} ({})", table.id, table.name);

        match self.run_processing(&table).await {
            Ok(derived) => {
                info!(
                    "Table {} processed into derived table {} ({} rows)",
                    table.id,
                    derived.id,
                    derived.content.len()
                );
                Ok(derived)
            }
            Err(e) => {
                let reason = e.to_string();
                error!("Processing table {} failed: {}", table.id, reason);

                if let Err(store_err) = self.store.mark_failed(table.id, &reason).await {
                    error!(
                        "Failed to record failure for table {}: {}",
                        table.id, store_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_processing(&self, table: &SourceTable) -> Result<DerivedTable> {
        let (columns, rows) = parse_csv(&table.raw_content)?.into_normalized_rows()?;

        let schema = infer_schema(&columns, &rows);
        info!(
            "Inferred schema for table {}: {}",
            table.id,
            describe_schema(&schema)
        );

        let normalized: Vec<Row> = rows.iter().map(string_row).collect();
        self.store
            .save_normalized(table.id, &schema, &normalized)
            .await?;

        let derived = DerivedTable::new(table.id, coerce_rows(&rows, &schema));
        self.store.insert_derived(&derived).await?;

        // A failed run must not leave its snapshot behind.
        if let Err(e) = self.publish(table, &schema, &derived).await {
            self.discard_snapshot(&derived).await;
            return Err(e);
        }
        Ok(derived)
    }

    async fn publish(
        &self,
        table: &SourceTable,
        schema: &Schema,
        derived: &DerivedTable,
    ) -> Result<()> {
        let notification = self.build_notification(table, schema, derived)?;
        self.notifier.send(&notification).await?;
        self.store.mark_processed(table.id).await
    }

    async fn discard_snapshot(&self, derived: &DerivedTable) {
        match self.store.delete_derived(derived.id).await {
            Ok(_) => debug!(
                "Discarded derived table {} of failed run on table {}",
                derived.id, derived.parent_id
            ),
            Err(e) => error!(
                "Failed to discard derived table {} of table {}: {}",
                derived.id, derived.parent_id, e
            ),
        }
    }

    fn build_notification(
        &self,
        table: &SourceTable,
        schema: &Schema,
        derived: &DerivedTable,
    ) -> Result<Notification> {
        let columns = output_columns(Some(schema), &derived.content);
        let csv_text = write_csv(&columns, &derived.content)?;

        Ok(Notification {
            recipient: self.recipient.clone(),
            subject: format!("Processed CSV: {}", table.name),
            body: format!(
                "The file '{}' was processed: {} rows across {} columns. The processed data is attached.",
                table.name,
                derived.content.len(),
                columns.len()
            ),
            attachment: csv_text.into_bytes(),
            attachment_filename: output_filename(&table.name, "processed"),
        })
    }

    /// Appends a pending change batch to its target's content.
    ///
    /// Returns `Ok(None)` when the batch was already applied. On error the
    /// batch stays pending.
    pub async fn apply_change_batch(&self, batch_id: Uuid) -> Result<Option<DerivedTable>> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| CsvServiceError::change_batch_not_found(batch_id))?;

        if batch.status == BatchStatus::Processed {
            info!("Change batch {} was already applied, skipping", batch_id);
            return Ok(None);
        }

        let result = async {
            let (parent_id, existing) = self.resolve_target(batch.target).await?;
            let merged = merge_changes(&existing, &batch.data);
            let derived = DerivedTable::new(parent_id, merged);
            self.store.commit_merge(batch.id, &derived).await?;
            Ok::<_, CsvServiceError>(derived)
        }
        .await;

        match result {
            Ok(derived) => {
                info!(
                    "Applied change batch {} ({} rows) as derived table {}",
                    batch.id,
                    batch.data.len(),
                    derived.id
                );
                Ok(Some(derived))
            }
            Err(e) => {
                error!("Applying change batch {} failed: {}", batch.id, e);
                Err(e)
            }
        }
    }

    /// Content of a change target and the source table new snapshots belong to.
    async fn resolve_target(&self, target: ChangeTarget) -> Result<(Uuid, Vec<Row>)> {
        match target {
            ChangeTarget::Source(id) => {
                let table = self
                    .store
                    .get_source(id)
                    .await?
                    .ok_or_else(|| CsvServiceError::source_table_not_found(id))?;
                let content = table.content.ok_or_else(|| CsvServiceError::InvalidState {
                    message: format!("Source table {} has not been processed yet", id),
                })?;
                Ok((table.id, content))
            }
            ChangeTarget::Derived(id) => {
                let derived = self
                    .store
                    .get_derived(id)
                    .await?
                    .ok_or_else(|| CsvServiceError::derived_table_not_found(id))?;
                Ok((derived.parent_id, derived.content))
            }
        }
    }

    /// Schema that rows submitted against `target` must satisfy.
    pub async fn target_schema(&self, target: ChangeTarget) -> Result<Schema> {
        let source_id = match target {
            ChangeTarget::Source(id) => id,
            ChangeTarget::Derived(id) => {
                self.store
                    .get_derived(id)
                    .await?
                    .ok_or_else(|| CsvServiceError::derived_table_not_found(id))?
                    .parent_id
            }
        };

        let table = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| CsvServiceError::source_table_not_found(source_id))?;

        table.schema.ok_or_else(|| {
            warn!("Change submitted before table {} was processed", source_id);
            CsvServiceError::InvalidState {
                message: format!("Source table {} has no schema yet", source_id),
            }
        })
    }
}

fn string_row(row: &RawRow) -> Row {
    row.iter()
        .map(|(column, value)| (column.clone(), Value::String(value.clone())))
        .collect()
}

fn describe_schema(schema: &Schema) -> String {
    schema
        .iter()
        .map(|(column, column_type)| format!("{}={}", column, column_type))
        .collect::<Vec<_>>()
        .join(", ")
}
