mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use common::{init_test_logging, raw_row, FailingNotifier, RecordingNotifier, RECIPIENT};
use csv_service::changes::validate_changes;
use csv_service::domain::{
    BatchStatus, ChangeBatch, ChangeTarget, ColumnType, DerivedTable, Row, Schema, SourceTable,
    TableStatus,
};
use csv_service::error::{CsvServiceError, Result};
use csv_service::processor::TableProcessor;
use csv_service::storage::{MemoryStore, TableStore};

fn setup() -> (Arc<dyn TableStore>, Arc<RecordingNotifier>, TableProcessor) {
    init_test_logging();
    let store: Arc<dyn TableStore> = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = TableProcessor::new(store.clone(), notifier.clone(), RECIPIENT);
    (store, notifier, processor)
}

async fn upload(store: &Arc<dyn TableStore>, name: &str, csv_text: &str) -> SourceTable {
    let table = SourceTable::new(name, csv_text);
    store.insert_source(&table).await.unwrap();
    table
}

#[tokio::test]
async fn test_mixed_column_broadens_to_string_and_integers_are_halved() {
    // Given: an upload whose second column mixes a float and an integer
    let (store, notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id,amt\n4,10.0\n5,7").await;

    // When: the table is processed
    let derived = processor.process_table(table.id).await.unwrap();

    // Then: amt broadened to string while id stayed an integer
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    let schema = stored.schema.expect("schema should be saved");
    assert_eq!(schema.get("id"), Some(ColumnType::Integer));
    assert_eq!(schema.get("amt"), Some(ColumnType::String));
    assert_eq!(stored.status, TableStatus::Processed);
    assert_eq!(stored.failure_reason, None);

    // And: the normalized content keeps the original strings
    let content = stored.content.expect("content should be saved");
    assert_eq!(content[0]["id"], json!("4"));
    assert_eq!(content[1]["amt"], json!("7"));

    // And: the derived snapshot halves integers and leaves strings alone
    assert_eq!(derived.parent_id, table.id);
    assert_eq!(derived.content[0]["id"], json!(2));
    assert_eq!(derived.content[1]["id"], json!(2));
    assert_eq!(derived.content[0]["amt"], json!("10.0"));
    assert_eq!(derived.content[1]["amt"], json!("7"));

    // And: one notification carried the processed CSV
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, RECIPIENT);
    assert_eq!(sent[0].attachment_filename, "sales_processed.csv");
    assert_eq!(
        String::from_utf8(sent[0].attachment.clone()).unwrap(),
        "id,amt\n2,10.0\n2,7\n"
    );
}

#[tokio::test]
async fn test_headers_are_normalized_and_all_types_coerced() {
    // Given: messy headers and one column of each type
    let (store, _notifier, processor) = setup();
    let csv_text = "Order ID,Unit Price,Placed At,Ship Date,Note\n\
                    10,3.0,2024-01-05 10:00:00,2024-01-06,first\n\
                    7,5.5,2024-02-01 08:30:00,2024-02-03,second\n";
    let table = upload(&store, "orders.csv", csv_text).await;

    // When
    let derived = processor.process_table(table.id).await.unwrap();

    // Then: schema is keyed by normalized names in header order
    let schema = store.get_source(table.id).await.unwrap().unwrap().schema.unwrap();
    let columns: Vec<&str> = schema.column_names().collect();
    assert_eq!(
        columns,
        vec!["order_id", "unit_price", "placed_at", "ship_date", "note"]
    );
    assert_eq!(schema.get("order_id"), Some(ColumnType::Integer));
    assert_eq!(schema.get("unit_price"), Some(ColumnType::Float));
    assert_eq!(schema.get("placed_at"), Some(ColumnType::Datetime));
    assert_eq!(schema.get("ship_date"), Some(ColumnType::Date));
    assert_eq!(schema.get("note"), Some(ColumnType::String));

    // And: numbers are halved, temporal values pass through
    let first = &derived.content[0];
    assert_eq!(first["order_id"], json!(5));
    assert_eq!(first["unit_price"], json!(1.5));
    assert_eq!(first["placed_at"], json!("2024-01-05 10:00:00"));
    assert_eq!(first["ship_date"], json!("2024-01-06"));
    assert_eq!(first["note"], json!("first"));

    let second = &derived.content[1];
    assert_eq!(second["order_id"], json!(3));
    assert_eq!(second["unit_price"], json!(2.75));
}

#[tokio::test]
async fn test_header_only_upload_yields_string_columns_and_empty_snapshot() {
    // Given
    let (store, notifier, processor) = setup();
    let table = upload(&store, "empty.csv", "A,B\n").await;

    // When
    let derived = processor.process_table(table.id).await.unwrap();

    // Then
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    let schema = stored.schema.unwrap();
    assert_eq!(schema.get("a"), Some(ColumnType::String));
    assert_eq!(schema.get("b"), Some(ColumnType::String));
    assert_eq!(stored.status, TableStatus::Processed);
    assert!(derived.content.is_empty());
    assert_eq!(
        String::from_utf8(notifier.sent()[0].attachment.clone()).unwrap(),
        "a,b\n"
    );
}

#[tokio::test]
async fn test_ragged_upload_fails_without_derived_table() {
    // Given: the second data row is missing a field
    let (store, notifier, processor) = setup();
    let table = upload(&store, "broken.csv", "a,b\n1,2\n3\n").await;

    // When
    let result = processor.process_table(table.id).await;

    // Then: the run fails and the reason is recorded
    assert!(matches!(result, Err(CsvServiceError::ParseFailure { .. })));
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TableStatus::Failed);
    assert!(stored.failure_reason.is_some());
    assert!(stored.schema.is_none());

    // And: nothing was published
    assert!(store.list_derived(table.id).await.unwrap().is_empty());
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_colliding_headers_fail_the_run() {
    // Given
    let (store, _notifier, processor) = setup();
    let table = upload(&store, "dupes.csv", "Total,total!\n1,2\n").await;

    // When
    let result = processor.process_table(table.id).await;

    // Then
    tokio_test::assert_err!(result);
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TableStatus::Failed);
}

#[tokio::test]
async fn test_reprocessing_appends_a_new_snapshot() {
    // Given: a table that was processed once
    let (store, notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id\n8\n").await;
    let first = processor.process_table(table.id).await.unwrap();

    // When: it is processed again
    let second = processor.process_table(table.id).await.unwrap();

    // Then: both snapshots exist in creation order and the first is untouched
    let history = store.list_derived(table.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], first);
    assert_eq!(history[1].id, second.id);
    assert_eq!(second.content[0]["id"], json!(4));
    assert_eq!(notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_delivery_failure_marks_table_failed() {
    // Given: a notifier that always fails
    init_test_logging();
    let store: Arc<dyn TableStore> = Arc::new(MemoryStore::new());
    let processor = TableProcessor::new(store.clone(), Arc::new(FailingNotifier), RECIPIENT);
    let table = upload(&store, "sales.csv", "id\n2\n").await;

    // When
    let result = processor.process_table(table.id).await;

    // Then: the run reports the delivery failure
    assert!(matches!(result, Err(CsvServiceError::DeliveryFailure { .. })));
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TableStatus::Failed);
    assert!(stored
        .failure_reason
        .unwrap()
        .contains("relay unreachable"));

    // And: the failed run leaves no derived table behind
    assert!(store.list_derived(table.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeated_delivery_failures_never_accumulate_snapshots() {
    // Given: a relay that stays down across several runs
    init_test_logging();
    let store: Arc<dyn TableStore> = Arc::new(MemoryStore::new());
    let processor = TableProcessor::new(store.clone(), Arc::new(FailingNotifier), RECIPIENT);
    let table = upload(&store, "sales.csv", "id\n2\n").await;

    // When
    for _ in 0..3 {
        tokio_test::assert_err!(processor.process_table(table.id).await);
    }

    // Then
    assert!(store.list_derived(table.id).await.unwrap().is_empty());
    assert_eq!(
        store.get_source(table.id).await.unwrap().unwrap().status,
        TableStatus::Failed
    );
}

/// Delegates to a `MemoryStore` but cannot record a finished run.
struct UnfinishableStore {
    inner: MemoryStore,
}

#[async_trait]
impl TableStore for UnfinishableStore {
    async fn insert_source(&self, table: &SourceTable) -> Result<()> {
        self.inner.insert_source(table).await
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<SourceTable>> {
        self.inner.get_source(id).await
    }

    async fn list_sources(&self) -> Result<Vec<SourceTable>> {
        self.inner.list_sources().await
    }

    async fn list_sources_with_status(&self, statuses: &[TableStatus]) -> Result<Vec<SourceTable>> {
        self.inner.list_sources_with_status(statuses).await
    }

    async fn begin_processing(&self, id: Uuid) -> Result<SourceTable> {
        self.inner.begin_processing(id).await
    }

    async fn save_normalized(&self, id: Uuid, schema: &Schema, content: &[Row]) -> Result<()> {
        self.inner.save_normalized(id, schema, content).await
    }

    async fn mark_processed(&self, _id: Uuid) -> Result<()> {
        Err(CsvServiceError::DatabaseError {
            message: "connection reset".to_string(),
        })
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        self.inner.mark_failed(id, reason).await
    }

    async fn delete_source(&self, id: Uuid) -> Result<bool> {
        self.inner.delete_source(id).await
    }

    async fn insert_derived(&self, table: &DerivedTable) -> Result<()> {
        self.inner.insert_derived(table).await
    }

    async fn get_derived(&self, id: Uuid) -> Result<Option<DerivedTable>> {
        self.inner.get_derived(id).await
    }

    async fn list_derived(&self, parent_id: Uuid) -> Result<Vec<DerivedTable>> {
        self.inner.list_derived(parent_id).await
    }

    async fn delete_derived(&self, id: Uuid) -> Result<bool> {
        self.inner.delete_derived(id).await
    }

    async fn insert_batch(&self, batch: &ChangeBatch) -> Result<()> {
        self.inner.insert_batch(batch).await
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<ChangeBatch>> {
        self.inner.get_batch(id).await
    }

    async fn list_batches(&self) -> Result<Vec<ChangeBatch>> {
        self.inner.list_batches().await
    }

    async fn list_batches_with_status(&self, status: BatchStatus) -> Result<Vec<ChangeBatch>> {
        self.inner.list_batches_with_status(status).await
    }

    async fn commit_merge(&self, batch_id: Uuid, derived: &DerivedTable) -> Result<()> {
        self.inner.commit_merge(batch_id, derived).await
    }
}

#[tokio::test]
async fn test_status_write_failure_discards_the_snapshot() {
    // Given: the notification goes out but the final status write fails
    init_test_logging();
    let store: Arc<dyn TableStore> = Arc::new(UnfinishableStore {
        inner: MemoryStore::new(),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = TableProcessor::new(store.clone(), notifier.clone(), RECIPIENT);
    let table = upload(&store, "sales.csv", "id\n2\n").await;

    // When
    let result = processor.process_table(table.id).await;

    // Then: the run fails and its snapshot is gone
    assert!(matches!(result, Err(CsvServiceError::DatabaseError { .. })));
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TableStatus::Failed);
    assert!(store.list_derived(table.id).await.unwrap().is_empty());
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_table_recovers_on_next_run() {
    // Given: a table that failed once
    let (store, _notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id\n2\n").await;
    store.mark_failed(table.id, "earlier outage").await.unwrap();

    // When
    processor.process_table(table.id).await.unwrap();

    // Then: the failure reason is cleared
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TableStatus::Processed);
    assert_eq!(stored.failure_reason, None);
}

#[tokio::test]
async fn test_in_flight_table_is_not_processed_twice() {
    // Given: a run already holds the table
    let (store, notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id\n2\n").await;
    store.begin_processing(table.id).await.unwrap();

    // When
    let result = processor.process_table(table.id).await;

    // Then: the second run is refused and leaves the table alone
    assert!(matches!(result, Err(CsvServiceError::AlreadyProcessing { .. })));
    let stored = store.get_source(table.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TableStatus::Processing);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_table_is_not_found() {
    let (_store, _notifier, processor) = setup();
    let result = processor.process_table(Uuid::new_v4()).await;
    assert!(matches!(result, Err(CsvServiceError::NotFound { .. })));
}

#[tokio::test]
async fn test_change_batch_on_source_appends_to_normalized_content() {
    // Given: a processed table and a validated change batch against it
    let (store, _notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id,amt\n4,10.0\n5,7").await;
    processor.process_table(table.id).await.unwrap();

    let target = ChangeTarget::Source(table.id);
    let schema = processor.target_schema(target).await.unwrap();
    let data = validate_changes(&schema, &[raw_row(&[("ID", "9"), ("amt", "x")])]).unwrap();
    let batch = ChangeBatch::new(target, data);
    store.insert_batch(&batch).await.unwrap();

    // When
    let derived = processor
        .apply_change_batch(batch.id)
        .await
        .unwrap()
        .expect("batch should be applied");

    // Then: existing rows come first, the change is appended unhalved
    assert_eq!(derived.parent_id, table.id);
    assert_eq!(derived.content.len(), 3);
    assert_eq!(derived.content[0]["id"], json!("4"));
    assert_eq!(derived.content[2]["id"], json!(9));
    assert_eq!(derived.content[2]["amt"], json!("x"));

    // And: the batch is processed and the snapshot stored
    let stored = store.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Processed);
    assert_eq!(store.get_derived(derived.id).await.unwrap(), Some(derived));
}

#[tokio::test]
async fn test_change_batch_on_derived_links_to_original_parent() {
    // Given: a change batch against a derived snapshot
    let (store, _notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id\n4\n6\n").await;
    let snapshot = processor.process_table(table.id).await.unwrap();

    let target = ChangeTarget::Derived(snapshot.id);
    let schema = processor.target_schema(target).await.unwrap();
    let data = validate_changes(&schema, &[raw_row(&[("id", "11")])]).unwrap();
    let batch = ChangeBatch::new(target, data);
    store.insert_batch(&batch).await.unwrap();

    // When
    let derived = processor.apply_change_batch(batch.id).await.unwrap().unwrap();

    // Then: the new snapshot extends the derived content and belongs to the source
    assert_eq!(derived.parent_id, table.id);
    let ids: Vec<_> = derived.content.iter().map(|row| row["id"].clone()).collect();
    assert_eq!(ids, vec![json!(2), json!(3), json!(11)]);

    // And: the targeted snapshot is unchanged
    let original = store.get_derived(snapshot.id).await.unwrap().unwrap();
    assert_eq!(original.content.len(), 2);
}

#[tokio::test]
async fn test_reapplying_a_processed_batch_is_a_no_op() {
    // Given: an applied batch
    let (store, _notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id\n4\n").await;
    processor.process_table(table.id).await.unwrap();
    let schema = processor
        .target_schema(ChangeTarget::Source(table.id))
        .await
        .unwrap();
    let data = validate_changes(&schema, &[raw_row(&[("id", "1")])]).unwrap();
    let batch = ChangeBatch::new(ChangeTarget::Source(table.id), data);
    store.insert_batch(&batch).await.unwrap();
    processor.apply_change_batch(batch.id).await.unwrap();

    // When
    let again = processor.apply_change_batch(batch.id).await.unwrap();

    // Then: no second snapshot is produced
    assert!(again.is_none());
    assert_eq!(store.list_derived(table.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_batch_with_missing_target_stays_pending() {
    // Given: a batch whose derived target no longer exists
    let (store, _notifier, processor) = setup();
    let batch = ChangeBatch::new(ChangeTarget::Derived(Uuid::new_v4()), vec![]);
    store.insert_batch(&batch).await.unwrap();

    // When
    let result = processor.apply_change_batch(batch.id).await;

    // Then
    assert!(matches!(result, Err(CsvServiceError::NotFound { .. })));
    let stored = store.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Pending);
}

#[tokio::test]
async fn test_changes_require_a_processed_table() {
    // Given: an upload that has not been processed
    let (store, _notifier, processor) = setup();
    let table = upload(&store, "sales.csv", "id\n4\n").await;

    // When
    let result = processor.target_schema(ChangeTarget::Source(table.id)).await;

    // Then
    assert!(matches!(result, Err(CsvServiceError::InvalidState { .. })));
}
