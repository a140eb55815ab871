use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    BatchStatus, ChangeBatch, DerivedTable, Row, Schema, SourceTable, TableStatus,
};
use crate::error::{CsvServiceError, Result};

/// Persistence for source tables, derived snapshots and change batches.
///
/// Each method is individually atomic. `begin_processing` is the per-table
/// in-flight guard and `commit_merge` is the only multi-record write.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn insert_source(&self, table: &SourceTable) -> Result<()>;

    async fn get_source(&self, id: Uuid) -> Result<Option<SourceTable>>;

    /// Newest first.
    async fn list_sources(&self) -> Result<Vec<SourceTable>>;

    async fn list_sources_with_status(&self, statuses: &[TableStatus]) -> Result<Vec<SourceTable>>;

    /// Moves a table into `processing` and clears its failure reason.
    ///
    /// Refused with `AlreadyProcessing` when a run is already in flight.
    async fn begin_processing(&self, id: Uuid) -> Result<SourceTable>;

    async fn save_normalized(&self, id: Uuid, schema: &Schema, content: &[Row]) -> Result<()>;

    async fn mark_processed(&self, id: Uuid) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()>;

    /// Deletes the table and its derived snapshots. Returns false if absent.
    async fn delete_source(&self, id: Uuid) -> Result<bool>;

    async fn insert_derived(&self, table: &DerivedTable) -> Result<()>;

    async fn get_derived(&self, id: Uuid) -> Result<Option<DerivedTable>>;

    /// Oldest first, i.e. history order.
    async fn list_derived(&self, parent_id: Uuid) -> Result<Vec<DerivedTable>>;

    async fn delete_derived(&self, id: Uuid) -> Result<bool>;

    async fn insert_batch(&self, batch: &ChangeBatch) -> Result<()>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<ChangeBatch>>;

    /// Newest first.
    async fn list_batches(&self) -> Result<Vec<ChangeBatch>>;

    async fn list_batches_with_status(&self, status: BatchStatus) -> Result<Vec<ChangeBatch>>;

    /// Stores `derived` and flips the batch to processed in one step.
    ///
    /// Fails with `InvalidState` if the batch is no longer pending.
    async fn commit_merge(&self, batch_id: Uuid, derived: &DerivedTable) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    sources: IndexMap<Uuid, SourceTable>,
    derived: IndexMap<Uuid, DerivedTable>,
    batches: IndexMap<Uuid, ChangeBatch>,
}

impl MemoryState {
    fn source_mut(&mut self, id: Uuid) -> Result<&mut SourceTable> {
        self.sources
            .get_mut(&id)
            .ok_or_else(|| CsvServiceError::source_table_not_found(id))
    }
}

/// Process-local store, used for tests and single-node development runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn insert_source(&self, table: &SourceTable) -> Result<()> {
        let mut state = self.state.write().await;
        state.sources.insert(table.id, table.clone());
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<SourceTable>> {
        Ok(self.state.read().await.sources.get(&id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<SourceTable>> {
        let state = self.state.read().await;
        Ok(state.sources.values().rev().cloned().collect())
    }

    async fn list_sources_with_status(&self, statuses: &[TableStatus]) -> Result<Vec<SourceTable>> {
        let state = self.state.read().await;
        Ok(state
            .sources
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect())
    }

    async fn begin_processing(&self, id: Uuid) -> Result<SourceTable> {
        let mut state = self.state.write().await;
        let table = state.source_mut(id)?;
        if table.status == TableStatus::Processing {
            return Err(CsvServiceError::AlreadyProcessing { id });
        }
        table.status = TableStatus::Processing;
        table.failure_reason = None;
        debug!("Table {} entered processing", id);
        Ok(table.clone())
    }

    async fn save_normalized(&self, id: Uuid, schema: &Schema, content: &[Row]) -> Result<()> {
        let mut state = self.state.write().await;
        let table = state.source_mut(id)?;
        table.schema = Some(schema.clone());
        table.content = Some(content.to_vec());
        Ok(())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let table = state.source_mut(id)?;
        table.status = TableStatus::Processed;
        table.failure_reason = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let table = state.source_mut(id)?;
        table.status = TableStatus::Failed;
        table.failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn delete_source(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.sources.shift_remove(&id).is_none() {
            return Ok(false);
        }
        state.derived.retain(|_, d| d.parent_id != id);
        Ok(true)
    }

    async fn insert_derived(&self, table: &DerivedTable) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.sources.contains_key(&table.parent_id) {
            return Err(CsvServiceError::source_table_not_found(table.parent_id));
        }
        state.derived.insert(table.id, table.clone());
        Ok(())
    }

    async fn get_derived(&self, id: Uuid) -> Result<Option<DerivedTable>> {
        Ok(self.state.read().await.derived.get(&id).cloned())
    }

    async fn list_derived(&self, parent_id: Uuid) -> Result<Vec<DerivedTable>> {
        let state = self.state.read().await;
        Ok(state
            .derived
            .values()
            .filter(|d| d.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn delete_derived(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.derived.shift_remove(&id).is_some())
    }

    async fn insert_batch(&self, batch: &ChangeBatch) -> Result<()> {
        let mut state = self.state.write().await;
        state.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<ChangeBatch>> {
        Ok(self.state.read().await.batches.get(&id).cloned())
    }

    async fn list_batches(&self) -> Result<Vec<ChangeBatch>> {
        let state = self.state.read().await;
        Ok(state.batches.values().rev().cloned().collect())
    }

    async fn list_batches_with_status(&self, status: BatchStatus) -> Result<Vec<ChangeBatch>> {
        let state = self.state.read().await;
        Ok(state
            .batches
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect())
    }

    async fn commit_merge(&self, batch_id: Uuid, derived: &DerivedTable) -> Result<()> {
        let mut state = self.state.write().await;

        if !state.sources.contains_key(&derived.parent_id) {
            return Err(CsvServiceError::source_table_not_found(derived.parent_id));
        }
        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| CsvServiceError::change_batch_not_found(batch_id))?;
        if batch.status != BatchStatus::Pending {
            return Err(CsvServiceError::InvalidState {
                message: format!("Change batch {} was already applied", batch_id),
            });
        }

        batch.status = BatchStatus::Processed;
        state.derived.insert(derived.id, derived.clone());
        Ok(())
    }
}
