//! In-memory store for tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::sync::acquire_lock;
use super::traits::{ChangeEventStore, RuleStore, SnapshotStore, StoreHealth, TrackedDocumentStore};
use crate::Result;
use crate::models::{ChangeEvent, ChangeRule, DocumentSnapshot, TrackedDocument};

#[derive(Debug, Default)]
struct OwnerData {
    tracked: BTreeMap<String, TrackedDocument>,
    snapshots: Vec<DocumentSnapshot>,
    rules: Vec<ChangeRule>,
    events: Vec<ChangeEvent>,
}

/// Mutex-guarded maps implementing every storage trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    owners: Mutex<HashMap<String, OwnerData>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_owner<T>(&self, owner_id: &str, f: impl FnOnce(&mut OwnerData) -> T) -> T {
        let mut owners = acquire_lock(&self.owners);
        f(owners.entry(owner_id.to_string()).or_default())
    }
}

impl StoreHealth for MemoryStore {
    fn health_check(&self) -> bool {
        true
    }
}

impl TrackedDocumentStore for MemoryStore {
    fn upsert_tracked(&self, owner_id: &str, doc: &TrackedDocument) -> Result<()> {
        self.with_owner(owner_id, |data| {
            data.tracked.insert(doc.doc_token.clone(), doc.clone());
        });
        Ok(())
    }

    fn remove_tracked(&self, owner_id: &str, doc_token: &str) -> Result<bool> {
        Ok(self.with_owner(owner_id, |data| data.tracked.remove(doc_token).is_some()))
    }

    fn list_tracked(&self, owner_id: &str) -> Result<Vec<TrackedDocument>> {
        Ok(self.with_owner(owner_id, |data| data.tracked.values().cloned().collect()))
    }
}

impl SnapshotStore for MemoryStore {
    fn insert_snapshot(&self, owner_id: &str, snapshot: &DocumentSnapshot) -> Result<bool> {
        Ok(self.with_owner(owner_id, |data| {
            let duplicate = data.snapshots.iter().any(|s| {
                s.doc_token == snapshot.doc_token && s.revision_number == snapshot.revision_number
            });
            if duplicate {
                return false;
            }
            for existing in data
                .snapshots
                .iter_mut()
                .filter(|s| s.doc_token == snapshot.doc_token)
            {
                existing.is_latest = false;
            }
            data.snapshots.push(DocumentSnapshot {
                is_latest: true,
                ..snapshot.clone()
            });
            true
        }))
    }

    fn get_snapshot(
        &self,
        owner_id: &str,
        doc_token: &str,
        revision_number: i64,
    ) -> Result<Option<DocumentSnapshot>> {
        Ok(self.with_owner(owner_id, |data| {
            data.snapshots
                .iter()
                .find(|s| s.doc_token == doc_token && s.revision_number == revision_number)
                .cloned()
        }))
    }

    fn latest_snapshot(&self, owner_id: &str, doc_token: &str) -> Result<Option<DocumentSnapshot>> {
        Ok(self.with_owner(owner_id, |data| {
            data.snapshots
                .iter()
                .find(|s| s.doc_token == doc_token && s.is_latest)
                .cloned()
        }))
    }

    fn list_snapshots(
        &self,
        owner_id: &str,
        doc_token: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>> {
        Ok(self.with_owner(owner_id, |data| {
            let mut snapshots: Vec<_> = data
                .snapshots
                .iter()
                .filter(|s| s.doc_token == doc_token)
                .cloned()
                .collect();
            snapshots.sort_by(|a, b| b.revision_number.cmp(&a.revision_number));
            if let Some(limit) = limit {
                snapshots.truncate(limit);
            }
            snapshots
        }))
    }

    fn max_revision(&self, owner_id: &str, doc_token: &str) -> Result<Option<i64>> {
        Ok(self.with_owner(owner_id, |data| {
            data.snapshots
                .iter()
                .filter(|s| s.doc_token == doc_token)
                .map(|s| s.revision_number)
                .max()
        }))
    }

    fn snapshot_doc_tokens(&self, owner_id: &str) -> Result<Vec<String>> {
        Ok(self.with_owner(owner_id, |data| {
            let mut tokens: Vec<_> = data.snapshots.iter().map(|s| s.doc_token.clone()).collect();
            tokens.sort();
            tokens.dedup();
            tokens
        }))
    }

    fn delete_snapshots(&self, owner_id: &str, ids: &[String]) -> Result<usize> {
        Ok(self.with_owner(owner_id, |data| {
            let before = data.snapshots.len();
            data.snapshots.retain(|s| !ids.contains(&s.id));
            before - data.snapshots.len()
        }))
    }
}

impl RuleStore for MemoryStore {
    fn insert_rule(&self, owner_id: &str, rule: &ChangeRule) -> Result<()> {
        self.with_owner(owner_id, |data| data.rules.push(rule.clone()));
        Ok(())
    }

    fn get_rule(&self, owner_id: &str, rule_id: &str) -> Result<Option<ChangeRule>> {
        Ok(self.with_owner(owner_id, |data| {
            data.rules.iter().find(|r| r.id == rule_id).cloned()
        }))
    }

    fn update_rule(&self, owner_id: &str, rule: &ChangeRule) -> Result<bool> {
        Ok(self.with_owner(owner_id, |data| {
            data.rules
                .iter_mut()
                .find(|r| r.id == rule.id)
                .map(|existing| *existing = rule.clone())
                .is_some()
        }))
    }

    fn delete_rule(&self, owner_id: &str, rule_id: &str) -> Result<bool> {
        Ok(self.with_owner(owner_id, |data| {
            let before = data.rules.len();
            data.rules.retain(|r| r.id != rule_id);
            before != data.rules.len()
        }))
    }

    fn list_rules(&self, owner_id: &str, doc_token: Option<&str>) -> Result<Vec<ChangeRule>> {
        Ok(self.with_owner(owner_id, |data| {
            data.rules
                .iter()
                .filter(|r| doc_token.is_none_or(|t| r.doc_token == t))
                .cloned()
                .collect()
        }))
    }
}

impl ChangeEventStore for MemoryStore {
    fn insert_event(&self, owner_id: &str, event: &ChangeEvent) -> Result<()> {
        self.with_owner(owner_id, |data| data.events.push(event.clone()));
        Ok(())
    }

    fn recent_events(
        &self,
        owner_id: &str,
        doc_token: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>> {
        Ok(self.with_owner(owner_id, |data| {
            let mut events: Vec<_> = data
                .events
                .iter()
                .filter(|e| doc_token.is_none_or(|t| e.doc_token == t))
                .cloned()
                .collect();
            events.sort_by(|a, b| {
                b.change_detected_at
                    .cmp(&a.change_detected_at)
                    .then_with(|| b.id.cmp(&a.id))
            });
            events.truncate(limit);
            events
        }))
    }
}
