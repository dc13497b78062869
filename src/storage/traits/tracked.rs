//! Tracked document persistence.

use super::StoreHealth;
use crate::Result;
use crate::models::TrackedDocument;

/// Write-through store for the poller's registry.
pub trait TrackedDocumentStore: StoreHealth {
    /// Inserts or replaces a tracked document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the write fails.
    fn upsert_tracked(&self, owner_id: &str, doc: &TrackedDocument) -> Result<()>;

    /// Removes a tracked document. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the delete fails.
    fn remove_tracked(&self, owner_id: &str, doc_token: &str) -> Result<bool>;

    /// Lists tracked documents ordered by token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn list_tracked(&self, owner_id: &str) -> Result<Vec<TrackedDocument>>;
}
