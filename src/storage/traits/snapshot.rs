//! Snapshot persistence.

use super::StoreHealth;
use crate::Result;
use crate::models::DocumentSnapshot;

/// Storage for compressed document snapshots.
pub trait SnapshotStore: StoreHealth {
    /// Stores `snapshot` as the document's latest.
    ///
    /// Clearing the previous latest flag and the insert happen atomically.
    /// Returns `false` without writing if `(doc_token, revision_number)` exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the transaction fails.
    fn insert_snapshot(&self, owner_id: &str, snapshot: &DocumentSnapshot) -> Result<bool>;

    /// Gets one revision.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn get_snapshot(
        &self,
        owner_id: &str,
        doc_token: &str,
        revision_number: i64,
    ) -> Result<Option<DocumentSnapshot>>;

    /// Gets the snapshot flagged latest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn latest_snapshot(&self, owner_id: &str, doc_token: &str) -> Result<Option<DocumentSnapshot>>;

    /// Lists snapshots newest revision first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn list_snapshots(
        &self,
        owner_id: &str,
        doc_token: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>>;

    /// Highest stored revision, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn max_revision(&self, owner_id: &str, doc_token: &str) -> Result<Option<i64>>;

    /// Tokens of every document with at least one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn snapshot_doc_tokens(&self, owner_id: &str) -> Result<Vec<String>>;

    /// Deletes snapshots by ID. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the delete fails.
    fn delete_snapshots(&self, owner_id: &str, ids: &[String]) -> Result<usize>;
}
