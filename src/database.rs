use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool},
        AsyncDieselConnectionManager,
    },
    scoped_futures::ScopedFutureExt,
    AsyncConnection, AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    BatchStatus, ChangeBatch, DerivedTable, Row, Schema, SourceTable, TableStatus,
};
use crate::error::{CsvServiceError, Result};
use crate::models::*;
use crate::schema::*;
use crate::storage::TableStore;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// PostgreSQL-backed [`TableStore`].
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<AsyncPgConnection>,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config)
            .build()
            .map_err(|e| CsvServiceError::ConfigError {
                message: format!("Failed to create database pool: {}", e),
            })?;

        let manager = Self { pool };
        manager.run_migrations(database_url).await?;

        Ok(manager)
    }

    pub async fn run_migrations(&self, database_url: &str) -> Result<()> {
        use diesel::PgConnection;

        // diesel_migrations only drives synchronous connections.
        let database_url = database_url.to_string();
        tokio::task::spawn_blocking(move || {
            let mut connection = PgConnection::establish(&database_url).map_err(|e| {
                CsvServiceError::ConfigError {
                    message: format!("Failed to establish connection for migrations: {}", e),
                }
            })?;

            let applied = connection
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| CsvServiceError::ConfigError {
                    message: format!("Failed to run migrations: {}", e),
                })?;

            info!("Applied {} pending migrations", applied.len());
            Ok(())
        })
        .await
        .map_err(|e| CsvServiceError::ConfigError {
            message: format!("Migration task panicked: {}", e),
        })?
    }

    async fn connection(&self) -> Result<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| CsvServiceError::DatabaseError {
                message: format!("Failed to get database connection: {}", e),
            })
    }

    async fn set_status(
        &self,
        table_id: Uuid,
        new_status: TableStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;

        let updated = diesel::update(source_tables::table.find(table_id))
            .set((
                source_tables::status.eq(new_status.as_str()),
                source_tables::failure_reason.eq(reason),
            ))
            .execute(&mut conn)
            .await?;

        if updated == 0 {
            return Err(CsvServiceError::source_table_not_found(table_id));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for DatabaseManager {
    async fn insert_source(&self, table: &SourceTable) -> Result<()> {
        info!("Adding source table {} ({})", table.id, table.name);
        let mut conn = self.connection().await?;

        diesel::insert_into(source_tables::table)
            .values(NewSourceTable::from_domain(table)?)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_source(&self, table_id: Uuid) -> Result<Option<SourceTable>> {
        let mut conn = self.connection().await?;

        let model = source_tables::table
            .find(table_id)
            .select(SourceTableModel::as_select())
            .get_result(&mut conn)
            .await
            .optional()?;

        model.map(SourceTable::try_from).transpose()
    }

    async fn list_sources(&self) -> Result<Vec<SourceTable>> {
        let mut conn = self.connection().await?;

        let models = source_tables::table
            .order(source_tables::created_at.desc())
            .select(SourceTableModel::as_select())
            .get_results(&mut conn)
            .await?;

        models.into_iter().map(SourceTable::try_from).collect()
    }

    async fn list_sources_with_status(&self, statuses: &[TableStatus]) -> Result<Vec<SourceTable>> {
        let mut conn = self.connection().await?;
        let wanted: Vec<&str> = statuses.iter().map(TableStatus::as_str).collect();

        let models = source_tables::table
            .filter(source_tables::status.eq_any(wanted))
            .order(source_tables::created_at.asc())
            .select(SourceTableModel::as_select())
            .get_results(&mut conn)
            .await?;

        models.into_iter().map(SourceTable::try_from).collect()
    }

    async fn begin_processing(&self, table_id: Uuid) -> Result<SourceTable> {
        let mut conn = self.connection().await?;

        // Conditional update so two workers cannot both win the transition.
        let claimed = diesel::update(
            source_tables::table
                .find(table_id)
                .filter(source_tables::status.ne(TableStatus::Processing.as_str())),
        )
        .set((
            source_tables::status.eq(TableStatus::Processing.as_str()),
            source_tables::failure_reason.eq(None::<String>),
        ))
        .returning(SourceTableModel::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;

        match claimed {
            Some(model) => {
                debug!("Table {} entered processing", table_id);
                SourceTable::try_from(model)
            }
            None => {
                let exists = source_tables::table
                    .find(table_id)
                    .select(source_tables::id)
                    .first::<Uuid>(&mut conn)
                    .await
                    .optional()?
                    .is_some();

                if exists {
                    Err(CsvServiceError::AlreadyProcessing { id: table_id })
                } else {
                    Err(CsvServiceError::source_table_not_found(table_id))
                }
            }
        }
    }

    async fn save_normalized(&self, table_id: Uuid, schema: &Schema, content: &[Row]) -> Result<()> {
        let mut conn = self.connection().await?;
        let schema_json = serde_json::to_value(schema)?;
        let content_json = serde_json::to_value(content)?;

        let updated = diesel::update(source_tables::table.find(table_id))
            .set((
                source_tables::column_types.eq(Some(schema_json)),
                source_tables::content.eq(Some(content_json)),
            ))
            .execute(&mut conn)
            .await?;

        if updated == 0 {
            return Err(CsvServiceError::source_table_not_found(table_id));
        }
        Ok(())
    }

    async fn mark_processed(&self, table_id: Uuid) -> Result<()> {
        self.set_status(table_id, TableStatus::Processed, None).await
    }

    async fn mark_failed(&self, table_id: Uuid, reason: &str) -> Result<()> {
        self.set_status(table_id, TableStatus::Failed, Some(reason))
            .await
    }

    async fn delete_source(&self, table_id: Uuid) -> Result<bool> {
        let mut conn = self.connection().await?;

        // derived_tables rows go with it through ON DELETE CASCADE.
        let deleted = diesel::delete(source_tables::table.find(table_id))
            .execute(&mut conn)
            .await?;

        Ok(deleted > 0)
    }

    async fn insert_derived(&self, table: &DerivedTable) -> Result<()> {
        info!(
            "Adding derived table {} for source table {}",
            table.id, table.parent_id
        );
        let mut conn = self.connection().await?;

        diesel::insert_into(derived_tables::table)
            .values(NewDerivedTable::from_domain(table)?)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_derived(&self, derived_id: Uuid) -> Result<Option<DerivedTable>> {
        let mut conn = self.connection().await?;

        let model = derived_tables::table
            .find(derived_id)
            .select(DerivedTableModel::as_select())
            .get_result(&mut conn)
            .await
            .optional()?;

        model.map(DerivedTable::try_from).transpose()
    }

    async fn list_derived(&self, parent: Uuid) -> Result<Vec<DerivedTable>> {
        let mut conn = self.connection().await?;

        let models = derived_tables::table
            .filter(derived_tables::parent_id.eq(parent))
            .order(derived_tables::created_at.asc())
            .select(DerivedTableModel::as_select())
            .get_results(&mut conn)
            .await?;

        models.into_iter().map(DerivedTable::try_from).collect()
    }

    async fn delete_derived(&self, derived_id: Uuid) -> Result<bool> {
        let mut conn = self.connection().await?;

        let deleted = diesel::delete(derived_tables::table.find(derived_id))
            .execute(&mut conn)
            .await?;

        Ok(deleted > 0)
    }

    async fn insert_batch(&self, batch: &ChangeBatch) -> Result<()> {
        info!(
            "Adding change batch {} targeting {} table {}",
            batch.id,
            batch.target.kind(),
            batch.target.id()
        );
        let mut conn = self.connection().await?;

        diesel::insert_into(change_batches::table)
            .values(NewChangeBatch::from_domain(batch)?)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ChangeBatch>> {
        let mut conn = self.connection().await?;

        let model = change_batches::table
            .find(batch_id)
            .select(ChangeBatchModel::as_select())
            .get_result(&mut conn)
            .await
            .optional()?;

        model.map(ChangeBatch::try_from).transpose()
    }

    async fn list_batches(&self) -> Result<Vec<ChangeBatch>> {
        let mut conn = self.connection().await?;

        let models = change_batches::table
            .order(change_batches::created_at.desc())
            .select(ChangeBatchModel::as_select())
            .get_results(&mut conn)
            .await?;

        models.into_iter().map(ChangeBatch::try_from).collect()
    }

    async fn list_batches_with_status(&self, wanted: BatchStatus) -> Result<Vec<ChangeBatch>> {
        let mut conn = self.connection().await?;

        let models = change_batches::table
            .filter(change_batches::status.eq(wanted.as_str()))
            .order(change_batches::created_at.asc())
            .select(ChangeBatchModel::as_select())
            .get_results(&mut conn)
            .await?;

        models.into_iter().map(ChangeBatch::try_from).collect()
    }

    async fn commit_merge(&self, batch_id: Uuid, derived: &DerivedTable) -> Result<()> {
        info!(
            "Committing change batch {} as derived table {}",
            batch_id, derived.id
        );
        let new_derived = NewDerivedTable::from_domain(derived)?;
        let mut conn = self.connection().await?;

        conn.transaction::<_, CsvServiceError, _>(|conn| {
            async move {
                let flipped = diesel::update(
                    change_batches::table
                        .find(batch_id)
                        .filter(change_batches::status.eq(BatchStatus::Pending.as_str())),
                )
                .set(change_batches::status.eq(BatchStatus::Processed.as_str()))
                .execute(conn)
                .await?;

                if flipped == 0 {
                    return Err(CsvServiceError::InvalidState {
                        message: format!(
                            "Change batch {} is missing or was already applied",
                            batch_id
                        ),
                    });
                }

                diesel::insert_into(derived_tables::table)
                    .values(new_derived)
                    .execute(conn)
                    .await?;

                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}
