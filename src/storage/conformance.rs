//! Behavior shared by every store backend, exercised from each backend's tests.

use super::traits::{ChangeEventStore, RuleStore, SnapshotStore, TrackedDocumentStore};
use crate::models::{
    ChangeEvent, ChangeRule, ChangeType, DocType, DocumentSnapshot, RuleAction, RuleCondition,
    TrackedDocument,
};

const OWNER: &str = "owner-1";

pub fn snapshot(doc_token: &str, revision: i64, stored_at: i64) -> DocumentSnapshot {
    DocumentSnapshot {
        id: format!("{doc_token}-{revision}"),
        doc_token: doc_token.to_string(),
        doc_type: DocType::Docx,
        revision_number: revision,
        content_hash: format!("hash-{revision}"),
        compressed_content: vec![1, 2, 3, 4],
        content_size: 12,
        compression_ratio: 3.0,
        modified_by: "u1".to_string(),
        modified_at: stored_at,
        stored_at,
        is_latest: true,
    }
}

pub fn rule(id: &str, doc_token: &str, created_at: i64) -> ChangeRule {
    ChangeRule {
        id: id.to_string(),
        doc_token: doc_token.to_string(),
        name: format!("rule {id}"),
        condition: RuleCondition::ModifiedByUser("U2".to_string()),
        action: RuleAction::Notify {
            target: "C1".to_string(),
        },
        enabled: true,
        created_at,
        updated_at: created_at,
    }
}

pub fn tracked_documents<S: TrackedDocumentStore>(store: &S) {
    let mut doc = TrackedDocument::new("doc-b", DocType::Sheet, "chat");
    store.upsert_tracked(OWNER, &doc).unwrap();
    store
        .upsert_tracked(OWNER, &TrackedDocument::new("doc-a", DocType::Docx, "chat"))
        .unwrap();

    doc.last_known_user = Some("u1".to_string());
    doc.last_known_modified_time = Some(1000);
    doc.last_notification_time = Some(2000);
    store.upsert_tracked(OWNER, &doc).unwrap();

    let listed = store.list_tracked(OWNER).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].doc_token, "doc-a");
    assert_eq!(listed[1], doc);

    assert!(store.remove_tracked(OWNER, "doc-a").unwrap());
    assert!(!store.remove_tracked(OWNER, "doc-a").unwrap());
    assert_eq!(store.list_tracked(OWNER).unwrap().len(), 1);
    assert!(store.health_check());
}

pub fn snapshots<S: SnapshotStore>(store: &S) {
    assert!(store.insert_snapshot(OWNER, &snapshot("doc", 1, 100)).unwrap());
    assert!(store.insert_snapshot(OWNER, &snapshot("doc", 2, 200)).unwrap());
    assert!(store.insert_snapshot(OWNER, &snapshot("other", 1, 150)).unwrap());

    // duplicate revision is refused and leaves the latest flag alone
    let mut dup = snapshot("doc", 1, 300);
    dup.id = "dup".to_string();
    assert!(!store.insert_snapshot(OWNER, &dup).unwrap());

    let latest = store.latest_snapshot(OWNER, "doc").unwrap().unwrap();
    assert_eq!(latest.revision_number, 2);
    let first = store.get_snapshot(OWNER, "doc", 1).unwrap().unwrap();
    assert!(!first.is_latest);
    assert_eq!(first.compressed_content, vec![1, 2, 3, 4]);

    let history = store.list_snapshots(OWNER, "doc", None).unwrap();
    let revisions: Vec<_> = history.iter().map(|s| s.revision_number).collect();
    assert_eq!(revisions, vec![2, 1]);
    assert_eq!(history.iter().filter(|s| s.is_latest).count(), 1);
    assert_eq!(store.list_snapshots(OWNER, "doc", Some(1)).unwrap().len(), 1);

    assert_eq!(store.max_revision(OWNER, "doc").unwrap(), Some(2));
    assert_eq!(store.max_revision(OWNER, "missing").unwrap(), None);
    assert_eq!(
        store.snapshot_doc_tokens(OWNER).unwrap(),
        vec!["doc".to_string(), "other".to_string()]
    );

    let removed = store
        .delete_snapshots(OWNER, &["doc-1".to_string(), "nope".to_string()])
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.get_snapshot(OWNER, "doc", 1).unwrap().is_none());
}

pub fn rules<S: RuleStore>(store: &S) {
    store.insert_rule(OWNER, &rule("r1", "doc", 10)).unwrap();
    store.insert_rule(OWNER, &rule("r2", "doc", 20)).unwrap();
    store.insert_rule(OWNER, &rule("r3", "other", 30)).unwrap();

    assert_eq!(store.list_rules(OWNER, None).unwrap().len(), 3);
    let for_doc = store.list_rules(OWNER, Some("doc")).unwrap();
    let ids: Vec<_> = for_doc.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);

    let mut updated = rule("r1", "doc", 10);
    updated.enabled = false;
    updated.condition = RuleCondition::ChangeType(ChangeType::TimeUpdated);
    updated.updated_at = 99;
    assert!(store.update_rule(OWNER, &updated).unwrap());
    assert_eq!(store.get_rule(OWNER, "r1").unwrap().unwrap(), updated);
    assert!(!store.update_rule(OWNER, &rule("missing", "doc", 0)).unwrap());

    assert!(store.delete_rule(OWNER, "r2").unwrap());
    assert!(!store.delete_rule(OWNER, "r2").unwrap());
    assert!(store.get_rule(OWNER, "r2").unwrap().is_none());
}

pub fn events<S: ChangeEventStore>(store: &S) {
    for (i, token) in ["doc", "doc", "other"].iter().enumerate() {
        let at = i64::try_from(i).unwrap() * 1000;
        let event = ChangeEvent::new(*token, ChangeType::TimeUpdated, at)
            .with_new_user("u1")
            .with_metadata("index", serde_json::json!(i));
        store.insert_event(OWNER, &event).unwrap();
    }

    let all = store.recent_events(OWNER, None, 10).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].doc_token, "other");
    assert_eq!(all[0].metadata["index"], 2);

    let for_doc = store.recent_events(OWNER, Some("doc"), 1).unwrap();
    assert_eq!(for_doc.len(), 1);
    assert_eq!(for_doc[0].change_detected_at, 1000);
    assert_eq!(for_doc[0].new_modified_user.as_deref(), Some("u1"));
}

pub fn owner_isolation<S>(store: &S)
where
    S: TrackedDocumentStore + SnapshotStore + RuleStore + ChangeEventStore,
{
    store
        .upsert_tracked("alice", &TrackedDocument::new("doc", DocType::Docx, "c"))
        .unwrap();
    store.insert_snapshot("alice", &snapshot("doc", 1, 1)).unwrap();
    store.insert_rule("alice", &rule("r1", "doc", 1)).unwrap();
    store
        .insert_event("alice", &ChangeEvent::new("doc", ChangeType::NewDocument, 1))
        .unwrap();

    assert!(store.list_tracked("bob").unwrap().is_empty());
    assert!(store.latest_snapshot("bob", "doc").unwrap().is_none());
    assert!(store.get_rule("bob", "r1").unwrap().is_none());
    assert!(store.recent_events("bob", None, 10).unwrap().is_empty());

    // same revision under another owner is not a duplicate
    let mut bobs = snapshot("doc", 1, 1);
    bobs.id = "bob-doc-1".to_string();
    assert!(store.insert_snapshot("bob", &bobs).unwrap());
    assert_eq!(
        store.latest_snapshot("alice", "doc").unwrap().unwrap().id,
        "doc-1"
    );
}
