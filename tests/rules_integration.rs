//! Rules configured in TOML, evaluated through the queued integration, and
//! persisted in a `SQLite` file.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;

use docwatch::commands::{App, Backends};
use docwatch::config::DocwatchConfig;
use docwatch::connectors::{MemoryDocumentSource, RecordingSink};
use docwatch::models::{RuleAction, RuleCondition};
use docwatch::storage::SqliteStore;
use docwatch::{Error, ManualClock};

const CONFIG: &str = r#"
owner_id = "ops"

[snapshots]
min_compression_ratio = 0.0

[rules_engine]
utc_offset_minutes = 0

[[documents]]
token = "D"
notify_target = ""

[[rules]]
doc_token = "D"
name = "digest everything"
condition = { type = "any" }
action = { type = "aggregate", target = "digest" }

[[rules]]
doc_token = "D"
name = "review handovers"
condition = { type = "change_type", value = "user_changed" }
action = { type = "create_task", target = "board", template = "Review {title} after {user}" }

[[rules]]
doc_token = "D"
condition = { type = "modified_by_user", value = "U2" }
action = { type = "notify", target = "C2" }
"#;

struct Harness {
    app: App,
    source: Arc<MemoryDocumentSource>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

fn open(db: &Path, clock: Arc<ManualClock>) -> Harness {
    let source = Arc::new(MemoryDocumentSource::new());
    let sink = Arc::new(RecordingSink::new());
    let backends = Backends {
        metadata: source.clone(),
        content: source.clone(),
        notify: sink.clone(),
        webhook: sink.clone(),
        task: sink.clone(),
        clock: clock.clone(),
    };
    let store = Arc::new(SqliteStore::new(db).unwrap());
    let config = DocwatchConfig::from_toml(CONFIG).unwrap();
    let app = App::assemble(config, store, backends).unwrap();
    Harness {
        app,
        source,
        sink,
        clock,
    }
}

fn sent_to(sink: &RecordingSink, target: &str) -> Vec<String> {
    sink.notifications()
        .into_iter()
        .filter(|(t, _)| t == target)
        .map(|(_, message)| message)
        .collect()
}

#[tokio::test]
async fn test_configured_rules_run_through_queue() {
    let dir = tempfile::tempdir().unwrap();
    let h = open(&dir.path().join("docwatch.db"), Arc::new(ManualClock::new(1_000_000)));
    assert!(h.app.poller().rules().options().async_mode);

    let seeded = h.app.seed().unwrap();
    assert_eq!(seeded.documents_added, 1);
    assert_eq!(seeded.rules_added, 3);

    h.source.set_state("D", "U1", 1_000);
    h.source.set_content("D", "draft\n");
    h.app.poll_once().await;

    assert_eq!(
        sent_to(&h.sink, "digest"),
        vec!["1 document change:\n- D: new_document by U1".to_string()]
    );
    assert!(h.sink.tasks().is_empty());
    assert!(sent_to(&h.sink, "C2").is_empty());

    h.clock.advance(60_000);
    h.source.set_state("D", "U2", 2_000);
    h.source.set_content("D", "draft\nreviewed\n");
    h.app.poll_once().await;

    let tasks = h.sink.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Review D after U2");
    assert_eq!(tasks[0].target.as_deref(), Some("board"));
    assert_eq!(sent_to(&h.sink, "C2").len(), 1);
    assert_eq!(sent_to(&h.sink, "digest").len(), 2);

    let stats = h.app.surface().queue_stats();
    assert_eq!(stats.depth, 0);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn test_rules_and_tracking_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("docwatch.db");
    let clock = Arc::new(ManualClock::new(1_000_000));

    {
        let h = open(&db, Arc::clone(&clock));
        h.app.seed().unwrap();
        h.source.set_state("D", "U1", 1_000);
        h.app.poll_once().await;
    }

    let h = open(&db, clock);
    let tracked = h.app.surface().status("D").unwrap();
    assert_eq!(tracked.last_known_user.as_deref(), Some("U1"));

    let rules = h.app.surface().list_rules("D").unwrap();
    assert_eq!(rules.len(), 3);
    assert!(rules.iter().any(|r| r.condition == RuleCondition::ModifiedByUser("U2".to_string())));

    // Reseeding finds every rule already present, the unnamed one included.
    let seeded = h.app.seed().unwrap();
    assert_eq!(seeded.rules_added, 0);
    assert_eq!(seeded.rules_skipped, 3);

    // Same metadata as before the restart is not a change.
    h.source.set_state("D", "U1", 1_000);
    assert_eq!(h.app.poll_once().await.unchanged, 1);
}

#[tokio::test]
async fn test_rule_updates_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let h = open(&dir.path().join("docwatch.db"), Arc::new(ManualClock::new(1_000_000)));
    h.app.seed().unwrap();
    let surface = h.app.surface();
    let rule = surface.list_rules("D").unwrap().remove(0);

    let err = surface
        .update_rule(
            &rule.id,
            docwatch::models::RuleUpdate {
                action: Some(RuleAction::Webhook {
                    target: "ftp://example.com".to_string(),
                }),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRule(_)));
    assert!(err.user_message().contains("http(s) URL"));

    let renamed = surface
        .update_rule(
            &rule.id,
            docwatch::models::RuleUpdate {
                name: Some("renamed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.name, "renamed");
    assert_eq!(renamed.condition, rule.condition);
}
