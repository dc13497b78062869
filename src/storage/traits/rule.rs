//! Rule persistence.

use super::StoreHealth;
use crate::Result;
use crate::models::ChangeRule;

/// CRUD storage for change rules.
pub trait RuleStore: StoreHealth {
    /// Inserts a new rule.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the insert fails.
    fn insert_rule(&self, owner_id: &str, rule: &ChangeRule) -> Result<()>;

    /// Gets a rule by ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn get_rule(&self, owner_id: &str, rule_id: &str) -> Result<Option<ChangeRule>>;

    /// Replaces a rule. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the update fails.
    fn update_rule(&self, owner_id: &str, rule: &ChangeRule) -> Result<bool>;

    /// Deletes a rule. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the delete fails.
    fn delete_rule(&self, owner_id: &str, rule_id: &str) -> Result<bool>;

    /// Lists rules in creation order, optionally for one document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the query fails.
    fn list_rules(&self, owner_id: &str, doc_token: Option<&str>) -> Result<Vec<ChangeRule>>;
}
