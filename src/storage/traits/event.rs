//! Change event audit log.

use super::StoreHealth;
use crate::Result;
use crate::models::ChangeEvent;

/// Append-only log of confirmed changes.
pub trait ChangeEventStore: StoreHealth {
    /// Appends an event.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the insert fails.
    fn insert_event(&self, owner_id: &str, event: &ChangeEvent) -> Result<()>;

    /// Lists events newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn recent_events(
        &self,
        owner_id: &str,
        doc_token: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>>;
}
