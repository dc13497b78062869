//! Row conversion between `SQLite` and model types.
//!
//! Column order in each `*_COLUMNS` constant must match the index used by the
//! corresponding `*_from_row` function.

use rusqlite::Row;
use rusqlite::types::Type;

use crate::models::{
    ChangeEvent, ChangeRule, ChangeType, DocType, DocumentSnapshot, TrackedDocument,
};

/// Columns selected for [`tracked_from_row`].
pub const TRACKED_COLUMNS: &str = "doc_token, doc_type, notify_target, last_known_user, \
     last_known_modified_time, last_notification_time";

/// Columns selected for [`snapshot_from_row`].
pub const SNAPSHOT_COLUMNS: &str = "id, doc_token, doc_type, revision_number, content_hash, \
     compressed_content, content_size, compression_ratio, modified_by, modified_at, stored_at, \
     is_latest";

/// Columns selected for [`rule_from_row`].
pub const RULE_COLUMNS: &str =
    "id, doc_token, name, condition, action, enabled, created_at, updated_at";

/// Columns selected for [`event_from_row`].
pub const EVENT_COLUMNS: &str = "id, doc_token, previous_modified_user, previous_modified_time, \
     new_modified_user, new_modified_time, change_type, change_detected_at, debounced, \
     notification_sent, metadata";

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn doc_type_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DocType> {
    let text: String = row.get(index)?;
    Ok(DocType::parse(&text).unwrap_or_default())
}

/// Builds a [`TrackedDocument`] from a row selected with [`TRACKED_COLUMNS`].
///
/// # Errors
///
/// Returns a conversion error if a column has an unexpected type.
pub fn tracked_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedDocument> {
    Ok(TrackedDocument {
        doc_token: row.get(0)?,
        doc_type: doc_type_column(row, 1)?,
        notify_target: row.get(2)?,
        last_known_user: row.get(3)?,
        last_known_modified_time: row.get(4)?,
        last_notification_time: row.get(5)?,
    })
}

/// Builds a [`DocumentSnapshot`] from a row selected with [`SNAPSHOT_COLUMNS`].
///
/// # Errors
///
/// Returns a conversion error if a column has an unexpected type.
#[allow(clippy::cast_sign_loss)]
pub fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentSnapshot> {
    Ok(DocumentSnapshot {
        id: row.get(0)?,
        doc_token: row.get(1)?,
        doc_type: doc_type_column(row, 2)?,
        revision_number: row.get(3)?,
        content_hash: row.get(4)?,
        compressed_content: row.get(5)?,
        content_size: row.get::<_, i64>(6)? as u64,
        compression_ratio: row.get(7)?,
        modified_by: row.get(8)?,
        modified_at: row.get(9)?,
        stored_at: row.get(10)?,
        is_latest: row.get(11)?,
    })
}

/// Builds a [`ChangeRule`] from a row selected with [`RULE_COLUMNS`].
///
/// # Errors
///
/// Returns a conversion error if the stored condition or action JSON no
/// longer parses.
pub fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeRule> {
    Ok(ChangeRule {
        id: row.get(0)?,
        doc_token: row.get(1)?,
        name: row.get(2)?,
        condition: json_column(row, 3)?,
        action: json_column(row, 4)?,
        enabled: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Builds a [`ChangeEvent`] from a row selected with [`EVENT_COLUMNS`].
///
/// # Errors
///
/// Returns a conversion error if a column has an unexpected type.
pub fn event_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeEvent> {
    let change_type: String = row.get(6)?;
    Ok(ChangeEvent {
        id: row.get(0)?,
        doc_token: row.get(1)?,
        previous_modified_user: row.get(2)?,
        previous_modified_time: row.get(3)?,
        new_modified_user: row.get(4)?,
        new_modified_time: row.get(5)?,
        change_type: ChangeType::parse(&change_type).unwrap_or(ChangeType::None),
        change_detected_at: row.get(7)?,
        debounced: row.get(8)?,
        notification_sent: row.get(9)?,
        metadata: json_column(row, 10)?,
    })
}
