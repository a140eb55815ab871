use crate::domain::Row;

/// Appends `changes` after `existing`, returning a fresh snapshot.
///
/// Append-only: no deduplication and no schema check happen here.
pub fn merge_changes(existing: &[Row], changes: &[Row]) -> Vec<Row> {
    let mut merged = Vec::with_capacity(existing.len() + changes.len());
    merged.extend_from_slice(existing);
    merged.extend_from_slice(changes);
    merged
}
