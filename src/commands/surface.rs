//! Operations exposed to a chat or admin front end.

use std::sync::Arc;

use crate::models::{
    ChangeEvent, ChangeRule, DocType, DocumentSnapshot, RawAction, RawCondition, RuleUpdate,
    SnapshotStats, TrackedDocument,
};
use crate::services::{
    DocPoller, DocSnapshotService, PollerHealth, PollerMetrics, RuleQueueStats, RulesIntegration,
};
use crate::storage::ChangeEventStore;
use crate::{Error, Result};

/// Default number of snapshots or events returned by listing commands.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Facade over the poller, rules, snapshots, and change log of one owner.
///
/// Every query about a specific document fails with [`Error::NotTracked`]
/// when the document is not in the registry.
#[derive(Clone)]
pub struct CommandSurface {
    poller: DocPoller,
    rules: Arc<RulesIntegration>,
    snapshots: Arc<DocSnapshotService>,
    events: Arc<dyn ChangeEventStore>,
}

impl CommandSurface {
    /// Creates a surface over an existing poller.
    #[must_use]
    pub fn new(poller: DocPoller, events: Arc<dyn ChangeEventStore>) -> Self {
        Self {
            rules: poller.rules(),
            snapshots: poller.snapshots(),
            poller,
            events,
        }
    }

    fn require_tracked(&self, doc_token: &str) -> Result<TrackedDocument> {
        self.poller
            .get_tracked(doc_token)
            .ok_or_else(|| Error::NotTracked(doc_token.to_string()))
    }

    /// Starts tracking a document. `doc_type` is a type name such as `docx`.
    ///
    /// Returns the tracked entry and whether it was newly added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty token or unknown type.
    pub fn track(
        &self,
        doc_token: &str,
        doc_type: &str,
        notify_target: &str,
    ) -> Result<(TrackedDocument, bool)> {
        let doc_type = DocType::parse(doc_type)
            .ok_or_else(|| Error::InvalidInput(format!("unknown document type: {doc_type}")))?;
        let added = self
            .poller
            .start_tracking_doc(doc_token, doc_type, notify_target)?;
        let doc = self.require_tracked(doc_token.trim())?;
        Ok((doc, added))
    }

    /// Stops tracking a document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token.
    pub fn untrack(&self, doc_token: &str) -> Result<()> {
        if self.poller.stop_tracking_doc(doc_token) {
            Ok(())
        } else {
            Err(Error::NotTracked(doc_token.to_string()))
        }
    }

    /// Lists tracked documents ordered by token.
    #[must_use]
    pub fn list_tracked(&self) -> Vec<TrackedDocument> {
        self.poller.list_tracked()
    }

    /// Returns one tracked document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token.
    pub fn status(&self, doc_token: &str) -> Result<TrackedDocument> {
        self.require_tracked(doc_token)
    }

    /// Poller metrics.
    #[must_use]
    pub fn metrics(&self) -> PollerMetrics {
        self.poller.metrics()
    }

    /// Poller health.
    #[must_use]
    pub fn health(&self) -> PollerHealth {
        self.poller.health()
    }

    /// Rule queue statistics.
    #[must_use]
    pub fn queue_stats(&self) -> RuleQueueStats {
        self.rules.get_rule_queue_stats()
    }

    /// Adds a rule from raw `{type, value}` / `{type, target, template}` input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token and
    /// [`Error::InvalidRule`] with the specific reason for invalid input.
    pub fn add_rule(
        &self,
        doc_token: &str,
        name: &str,
        condition: RawCondition,
        action: RawAction,
    ) -> Result<ChangeRule> {
        self.require_tracked(doc_token)?;
        self.rules
            .engine()
            .create_rule_from_raw(doc_token, name, condition, action)
    }

    /// Lists one document's rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token, or a store error.
    pub fn list_rules(&self, doc_token: &str) -> Result<Vec<ChangeRule>> {
        self.require_tracked(doc_token)?;
        self.rules.engine().get_rules_for_doc(doc_token)
    }

    /// Lists every rule of the owner.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn list_all_rules(&self) -> Result<Vec<ChangeRule>> {
        self.rules.engine().get_all_rules()
    }

    /// Applies a partial update to a rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown rule ID and
    /// [`Error::InvalidRule`] for an invalid condition or action.
    pub fn update_rule(&self, rule_id: &str, update: RuleUpdate) -> Result<ChangeRule> {
        self.rules
            .engine()
            .update_rule(rule_id, update)?
            .ok_or_else(|| Error::InvalidInput(format!("rule {rule_id} not found")))
    }

    /// Enables or disables a rule.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_rule`].
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<ChangeRule> {
        self.update_rule(
            rule_id,
            RuleUpdate {
                enabled: Some(enabled),
                ..RuleUpdate::default()
            },
        )
    }

    /// Deletes a rule. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn delete_rule(&self, rule_id: &str) -> Result<bool> {
        self.rules.engine().delete_rule(rule_id)
    }

    /// Lists up to `limit` snapshots of a document, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token, or a store error.
    pub fn snapshot_history(&self, doc_token: &str, limit: usize) -> Result<Vec<DocumentSnapshot>> {
        self.require_tracked(doc_token)?;
        self.snapshots.get_snapshot_history(doc_token, limit)
    }

    /// Snapshot statistics for a document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token, or a store error.
    pub fn snapshot_stats(&self, doc_token: &str) -> Result<SnapshotStats> {
        self.require_tracked(doc_token)?;
        self.snapshots.get_snapshot_stats(doc_token)
    }

    /// Decompressed content of one revision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token, or a store or
    /// decode error.
    pub fn snapshot_content(&self, doc_token: &str, revision: i64) -> Result<Option<String>> {
        self.require_tracked(doc_token)?;
        self.snapshots.get_snapshot_content(doc_token, revision)
    }

    /// Recent change events, newest first, optionally for one document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token, or a store error.
    pub fn recent_changes(&self, doc_token: Option<&str>, limit: usize) -> Result<Vec<ChangeEvent>> {
        if let Some(token) = doc_token {
            self.require_tracked(token)?;
        }
        self.events
            .recent_events(self.poller.owner_id(), doc_token, limit)
    }

    /// Applies snapshot retention to one document or all of them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracked`] for an unknown token, or a store error.
    pub fn prune(&self, doc_token: Option<&str>) -> Result<usize> {
        if let Some(token) = doc_token {
            self.require_tracked(token)?;
        }
        self.snapshots.prune_old_snapshots(doc_token)
    }
}

impl std::fmt::Debug for CommandSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSurface")
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::commands::{App, Backends};
    use crate::config::DocwatchConfig;
    use crate::connectors::{MemoryDocumentSource, RecordingSink};
    use crate::storage::MemoryStore;

    fn surface() -> (App, Arc<MemoryDocumentSource>) {
        let source = Arc::new(MemoryDocumentSource::new());
        let sink = Arc::new(RecordingSink::new());
        let backends = Backends {
            metadata: source.clone(),
            content: source.clone(),
            notify: sink.clone(),
            webhook: sink.clone(),
            task: sink,
            clock: Arc::new(ManualClock::new(1_000_000)),
        };
        let config = DocwatchConfig::from_toml("[snapshots]\nmin_compression_ratio = 0.0\n").unwrap();
        let app = App::assemble(config, Arc::new(MemoryStore::new()), backends).unwrap();
        (app, source)
    }

    fn notify_rule() -> (RawCondition, RawAction) {
        (
            RawCondition::new("any", None),
            RawAction::new("notify", Some("chat-9".to_string())),
        )
    }

    #[test]
    fn test_track_rejects_unknown_type() {
        let (app, _) = surface();
        let err = app.surface().track("doc1", "spreadsheet-ish", "chat").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(app.surface().list_tracked().is_empty());
    }

    #[test]
    fn test_track_twice_reports_existing() {
        let (app, _) = surface();
        let (doc, added) = app.surface().track("doc1", "docx", "chat").unwrap();
        assert!(added);
        assert_eq!(doc.doc_token, "doc1");

        let (_, added) = app.surface().track("doc1", "sheet", "other").unwrap();
        assert!(!added);
        assert_eq!(app.surface().status("doc1").unwrap().doc_type, DocType::Docx);
    }

    #[test]
    fn test_untracked_queries_fail() {
        let (app, _) = surface();
        let surface = app.surface();

        assert!(matches!(surface.untrack("ghost"), Err(Error::NotTracked(_))));
        assert!(matches!(surface.status("ghost"), Err(Error::NotTracked(_))));
        assert!(matches!(surface.list_rules("ghost"), Err(Error::NotTracked(_))));
        assert!(matches!(
            surface.snapshot_history("ghost", DEFAULT_LIST_LIMIT),
            Err(Error::NotTracked(_))
        ));
        assert!(matches!(surface.snapshot_stats("ghost"), Err(Error::NotTracked(_))));
        assert!(matches!(
            surface.recent_changes(Some("ghost"), 5),
            Err(Error::NotTracked(_))
        ));
        assert!(matches!(surface.prune(Some("ghost")), Err(Error::NotTracked(_))));

        let (condition, action) = notify_rule();
        assert!(matches!(
            surface.add_rule("ghost", "r", condition, action),
            Err(Error::NotTracked(_))
        ));
    }

    #[test]
    fn test_rule_lifecycle() {
        let (app, _) = surface();
        let surface = app.surface();
        surface.track("doc1", "docx", "chat").unwrap();

        let (condition, action) = notify_rule();
        let rule = surface.add_rule("doc1", "everything", condition, action).unwrap();
        assert!(rule.enabled);
        assert_eq!(surface.list_rules("doc1").unwrap().len(), 1);
        assert_eq!(surface.list_all_rules().unwrap().len(), 1);

        let disabled = surface.set_rule_enabled(&rule.id, false).unwrap();
        assert!(!disabled.enabled);

        assert!(surface.delete_rule(&rule.id).unwrap());
        assert!(!surface.delete_rule(&rule.id).unwrap());
        assert!(matches!(
            surface.set_rule_enabled(&rule.id, true),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_add_rule_reports_reason() {
        let (app, _) = surface();
        app.surface().track("doc1", "docx", "chat").unwrap();

        let err = app
            .surface()
            .add_rule(
                "doc1",
                "broken",
                RawCondition::new("any", None),
                RawAction::new("notify", None),
            )
            .unwrap_err();
        assert!(err.to_string().contains("notify action requires a target"));
    }

    #[tokio::test]
    async fn test_history_and_changes_after_poll() {
        let (app, source) = surface();
        let surface = app.surface();
        surface.track("doc1", "docx", "chat").unwrap();
        source.set_state("doc1", "U1", 1_000);
        source.set_content("doc1", "first\n");

        app.poll_once().await;

        let history = surface.snapshot_history("doc1", DEFAULT_LIST_LIMIT).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            surface.snapshot_content("doc1", history[0].revision_number).unwrap().as_deref(),
            Some("first\n")
        );
        assert_eq!(surface.snapshot_stats("doc1").unwrap().snapshot_count, 1);

        let changes = surface.recent_changes(None, DEFAULT_LIST_LIMIT).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].doc_token, "doc1");
        assert_eq!(surface.metrics().docs_tracked, 1);
        assert_eq!(surface.prune(None).unwrap(), 0);
    }
}
