//! End-to-end poller scenario: track, baseline, change, debounce.
//!
//! Runs the full pipeline against the in-memory source and store, with a
//! manually driven clock so debounce decisions are deterministic.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use docwatch::commands::{App, Backends};
use docwatch::config::DocwatchConfig;
use docwatch::connectors::{MemoryDocumentSource, RecordingSink};
use docwatch::models::{ChangeType, RawAction, RawCondition};
use docwatch::storage::MemoryStore;
use docwatch::ManualClock;

const START_MS: i64 = 1_700_000_000_000;

struct Harness {
    app: App,
    source: Arc<MemoryDocumentSource>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let source = Arc::new(MemoryDocumentSource::new());
    let sink = Arc::new(RecordingSink::new());
    let clock = Arc::new(ManualClock::new(START_MS));
    let backends = Backends {
        metadata: source.clone(),
        content: source.clone(),
        notify: sink.clone(),
        webhook: sink.clone(),
        task: sink.clone(),
        clock: clock.clone(),
    };
    let config = DocwatchConfig::from_toml(
        r"
owner_id = 'team-a'

[poller]
debounce_window_ms = 5000

[rules_engine]
async_mode = false

[snapshots]
min_compression_ratio = 0.0
",
    )
    .unwrap();
    let app = App::assemble(config, Arc::new(MemoryStore::new()), backends).unwrap();
    Harness {
        app,
        source,
        sink,
        clock,
    }
}

#[tokio::test]
async fn test_track_change_debounce_scenario() {
    let h = harness();
    let surface = h.app.surface();
    surface.track("D", "docx", "C1").unwrap();
    let rule = surface
        .add_rule(
            "D",
            "U2 edits",
            RawCondition::new("modified_by_user", Some("U2".into())),
            RawAction::new("notify", Some("C1".to_string())),
        )
        .unwrap();

    // Poll 1: first observation establishes the baseline.
    h.source.set_state("D", "U1", 1_000);
    h.source.set_content("D", "# Plan\n\nship it\n");
    let report = h.app.poll_once().await;
    assert_eq!(report.changed, 1);
    assert_eq!(report.events[0].change_type, ChangeType::NewDocument);
    let tracked = surface.status("D").unwrap();
    assert_eq!(tracked.last_known_user.as_deref(), Some("U1"));
    assert_eq!(tracked.last_notification_time, Some(START_MS));
    assert!(h.sink.notifications().is_empty());

    // Poll 2: identical metadata.
    let report = h.app.poll_once().await;
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.changed, 0);

    // Poll 3: a different user, exactly one window later.
    h.clock.advance(5_000);
    h.source.set_state("D", "U2", 2_000);
    h.source.set_content("D", "# Plan\n\nship it\nthen celebrate\n");
    let report = h.app.poll_once().await;
    assert_eq!(report.changed, 1);
    let event = report.events[0].clone();
    assert_eq!(event.change_type, ChangeType::UserChanged);
    assert!(!event.debounced);
    assert!(event.notification_sent);
    assert_eq!(event.metadata["revision"], 2);
    assert_eq!(surface.snapshot_history("D", 10).unwrap().len(), 2);

    // Default card plus the matching rule's notification.
    let to_c1 = h
        .sink
        .notifications()
        .into_iter()
        .filter(|(target, _)| target == "C1")
        .count();
    assert_eq!(to_c1, 2);

    // Poll 4: another edit inside the window is debounced with no side effects.
    h.clock.advance(1);
    h.source.set_state("D", "U3", 2_001);
    let sent_before = h.sink.notifications().len();
    let report = h.app.poll_once().await;
    assert_eq!(report.debounced, 1);
    assert_eq!(report.changed, 0);
    assert!(report.events.is_empty());
    assert_eq!(h.sink.notifications().len(), sent_before);
    assert_eq!(surface.snapshot_history("D", 10).unwrap().len(), 2);
    assert_eq!(
        surface.status("D").unwrap().last_known_user.as_deref(),
        Some("U2")
    );

    // The rule matches the poll-3 event and not a change by U3.
    let engine = h.app.poller().rules().engine();
    let results = engine.evaluate_change_against_rules(&event).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].rule_id, rule.id);
    assert!(results[0].condition_matched);
    assert!(results[0].action_executed);

    let by_u3 = event.clone().with_new_user("U3");
    let results = engine.evaluate_change_against_rules(&by_u3).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].condition_matched);
    assert!(!results[0].action_executed);
}

#[tokio::test]
async fn test_debounced_change_is_delivered_after_window() {
    let h = harness();
    h.app.surface().track("D", "docx", "C1").unwrap();
    h.source.set_state("D", "U1", 1_000);
    h.source.set_content("D", "one\n");
    h.app.poll_once().await;

    h.clock.advance(100);
    h.source.set_state("D", "U1", 1_500);
    assert_eq!(h.app.poll_once().await.debounced, 1);

    h.clock.advance(5_000);
    let report = h.app.poll_once().await;
    assert_eq!(report.changed, 1);
    assert_eq!(report.events[0].change_type, ChangeType::TimeUpdated);
    assert_eq!(h.sink.notifications().len(), 1);
}

#[tokio::test]
async fn test_recent_changes_are_logged_newest_first() {
    let h = harness();
    let surface = h.app.surface();
    surface.track("A", "docx", "").unwrap();
    surface.track("B", "docx", "").unwrap();
    h.source.set_state("A", "U1", 1_000);
    h.source.set_state("B", "U1", 1_000);
    h.app.poll_once().await;

    h.clock.advance(10_000);
    h.source.set_state("B", "U2", 2_000);
    h.app.poll_once().await;

    let all = surface.recent_changes(None, 10).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].doc_token, "B");
    assert_eq!(all[0].change_type, ChangeType::UserChanged);

    let only_a = surface.recent_changes(Some("A"), 10).unwrap();
    assert_eq!(only_a.len(), 1);
    // An empty target suppresses the default card.
    assert!(h.sink.notifications().is_empty());
}

#[tokio::test]
async fn test_untrack_then_missing_source() {
    let h = harness();
    let surface = h.app.surface();
    surface.track("gone", "docx", "C1").unwrap();

    let report = h.app.poll_once().await;
    assert_eq!(report.missing, 1);
    let metrics = surface.metrics();
    assert_eq!(metrics.missing_in_last_hour, 1);
    assert_eq!(metrics.errors_in_last_hour, 0);

    surface.untrack("gone").unwrap();
    assert!(surface.untrack("gone").is_err());
    assert_eq!(h.app.poll_once().await.polled, 0);
}
