use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::{ChangeBatch, ChangeTarget, DerivedTable, Row, Schema, SourceTable};
use crate::error::CsvServiceError;
use crate::schema::{change_batches, derived_tables, source_tables};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = source_tables)]
#[diesel(primary_key(id))]
pub struct SourceTableModel {
    pub id: Uuid,
    pub name: String,
    pub raw_content: String,
    pub content: Option<serde_json::Value>,
    pub column_types: Option<serde_json::Value>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = source_tables)]
pub struct NewSourceTable<'a> {
    pub id: &'a Uuid,
    pub name: &'a str,
    pub raw_content: &'a str,
    pub content: Option<serde_json::Value>,
    pub column_types: Option<serde_json::Value>,
    pub status: &'a str,
    pub failure_reason: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = derived_tables)]
#[diesel(belongs_to(SourceTableModel, foreign_key = parent_id))]
#[diesel(primary_key(id))]
pub struct DerivedTableModel {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = derived_tables)]
pub struct NewDerivedTable<'a> {
    pub id: &'a Uuid,
    pub parent_id: &'a Uuid,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = change_batches)]
#[diesel(primary_key(id))]
pub struct ChangeBatchModel {
    pub id: Uuid,
    pub target_kind: String,
    pub target_id: Uuid,
    pub data: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = change_batches)]
pub struct NewChangeBatch<'a> {
    pub id: &'a Uuid,
    pub target_kind: &'a str,
    pub target_id: Uuid,
    pub data: serde_json::Value,
    pub status: &'a str,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewSourceTable<'a> {
    pub fn from_domain(table: &'a SourceTable) -> Result<Self, CsvServiceError> {
        Ok(Self {
            id: &table.id,
            name: &table.name,
            raw_content: &table.raw_content,
            content: table.content.as_ref().map(serde_json::to_value).transpose()?,
            column_types: table.schema.as_ref().map(serde_json::to_value).transpose()?,
            status: table.status.as_str(),
            failure_reason: table.failure_reason.as_deref(),
            created_at: table.created_at,
        })
    }
}

impl<'a> NewDerivedTable<'a> {
    pub fn from_domain(table: &'a DerivedTable) -> Result<Self, CsvServiceError> {
        Ok(Self {
            id: &table.id,
            parent_id: &table.parent_id,
            content: serde_json::to_value(&table.content)?,
            created_at: table.created_at,
        })
    }
}

impl<'a> NewChangeBatch<'a> {
    pub fn from_domain(batch: &'a ChangeBatch) -> Result<Self, CsvServiceError> {
        Ok(Self {
            id: &batch.id,
            target_kind: batch.target.kind(),
            target_id: batch.target.id(),
            data: serde_json::to_value(&batch.data)?,
            status: batch.status.as_str(),
            created_at: batch.created_at,
        })
    }
}

impl TryFrom<SourceTableModel> for SourceTable {
    type Error = CsvServiceError;

    fn try_from(model: SourceTableModel) -> Result<Self, Self::Error> {
        let content = model
            .content
            .map(serde_json::from_value::<Vec<Row>>)
            .transpose()?;
        let schema = model
            .column_types
            .map(serde_json::from_value::<Schema>)
            .transpose()?;

        Ok(SourceTable {
            id: model.id,
            name: model.name,
            raw_content: model.raw_content,
            content,
            schema,
            status: model.status.parse()?,
            failure_reason: model.failure_reason,
            created_at: model.created_at,
        })
    }
}

impl TryFrom<DerivedTableModel> for DerivedTable {
    type Error = CsvServiceError;

    fn try_from(model: DerivedTableModel) -> Result<Self, Self::Error> {
        Ok(DerivedTable {
            id: model.id,
            parent_id: model.parent_id,
            content: serde_json::from_value(model.content)?,
            created_at: model.created_at,
        })
    }
}

impl TryFrom<ChangeBatchModel> for ChangeBatch {
    type Error = CsvServiceError;

    fn try_from(model: ChangeBatchModel) -> Result<Self, Self::Error> {
        Ok(ChangeBatch {
            id: model.id,
            target: ChangeTarget::from_parts(&model.target_kind, model.target_id)?,
            data: serde_json::from_value(model.data)?,
            status: model.status.parse()?,
            created_at: model.created_at,
        })
    }
}
