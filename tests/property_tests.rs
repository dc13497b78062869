//! Property-based tests for change detection and diffing.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Unchanged metadata is never a change
//! - A document without a baseline is always a new document
//! - Debounce holds strictly inside the window
//! - Diffing content against itself yields nothing
//! - Pure insertions and deletions account for the line count delta
//! - Edit scripts cover both inputs exactly once

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use docwatch::compute_diff;
use docwatch::diff::{DEFAULT_MAX_EDIT_DISTANCE, Edit, edit_script};
use docwatch::models::{ChangeType, DocMetadata, DocType, TrackedDocument};
use docwatch::services::classify;
use proptest::prelude::*;

fn metadata(user: &str, time: i64) -> DocMetadata {
    DocMetadata {
        doc_token: "doc".to_string(),
        title: "Doc".to_string(),
        owner_id: String::new(),
        created_time: 0,
        last_modified_user: user.to_string(),
        last_modified_time: time,
        doc_type: DocType::Docx,
    }
}

fn tracked(user: &str, time: i64, notified: Option<i64>) -> TrackedDocument {
    TrackedDocument {
        last_known_user: Some(user.to_string()),
        last_known_modified_time: Some(time),
        last_notification_time: notified,
        ..TrackedDocument::new("doc", DocType::Docx, "chat")
    }
}

fn lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z ]{0,12}", 0..40)
}

fn join(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

proptest! {
    /// Property: same user and same time is never a change.
    #[test]
    fn prop_identical_metadata_is_unchanged(
        user in "[a-z0-9_]{1,12}",
        time in 0i64..10_000_000,
        now in 0i64..10_000_000,
        notified in proptest::option::of(0i64..10_000_000),
    ) {
        let result = classify(&metadata(&user, time), Some(&tracked(&user, time, notified)), 5_000, now);
        prop_assert!(!result.has_changed);
        prop_assert_eq!(result.change_type, ChangeType::None);
        prop_assert!(!result.debounced);
    }

    /// Property: without a baseline every observation is a new document.
    #[test]
    fn prop_no_baseline_is_new_document(
        user in ".{0,16}",
        time in any::<i64>(),
        now in any::<i64>(),
    ) {
        let result = classify(&metadata(&user, time), None, 5_000, now);
        prop_assert!(result.has_changed);
        prop_assert_eq!(result.change_type, ChangeType::NewDocument);
        prop_assert!(!result.debounced);
    }

    /// Property: a change is debounced iff it is strictly inside the window.
    #[test]
    fn prop_debounce_iff_inside_window(
        last in 0i64..1_000_000_000,
        elapsed in 0i64..20_000,
        window in 1i64..10_000,
    ) {
        let previous = tracked("alice", 1_000, Some(last));
        let result = classify(&metadata("bob", 1_000), Some(&previous), window, last + elapsed);
        prop_assert!(result.has_changed);
        prop_assert_eq!(result.debounced, elapsed < window);
    }

    /// Property: diffing content against itself reports no changes.
    #[test]
    fn prop_self_diff_is_empty(content in lines()) {
        let text = join(&content);
        let diff = compute_diff(&text, &text, 1, 2);
        prop_assert_eq!(diff.summary.total_changes, 0);
        prop_assert!(diff.summary.percent_changed.abs() < f64::EPSILON);
        prop_assert!(diff.line_diffs.is_empty());
    }

    /// Property: pure insertions add exactly the inserted line count.
    #[test]
    fn prop_pure_insertion_counts(
        base in lines(),
        inserted in prop::collection::vec("[A-Z]{1,8}", 1..20),
        at in any::<prop::sample::Index>(),
    ) {
        let position = at.index(base.len() + 1);
        let mut current = base.clone();
        current.splice(position..position, inserted.iter().cloned());

        let diff = compute_diff(&join(&base), &join(&current), 1, 2);
        prop_assert_eq!(diff.summary.modified_lines, 0);
        prop_assert_eq!(diff.summary.removed_lines, 0);
        prop_assert_eq!(diff.summary.added_lines, inserted.len());

        // The reverse is a pure deletion.
        let reverse = compute_diff(&join(&current), &join(&base), 2, 3);
        prop_assert_eq!(reverse.summary.modified_lines, 0);
        prop_assert_eq!(
            reverse.summary.added_lines as i64 - reverse.summary.removed_lines as i64,
            base.len() as i64 - current.len() as i64
        );
    }

    /// Property: an edit script visits every element of both inputs once.
    #[test]
    fn prop_edit_script_covers_inputs(old in lines(), new in lines()) {
        let edits = edit_script(&old, &new, DEFAULT_MAX_EDIT_DISTANCE);
        let mut old_seen = 0;
        let mut new_seen = 0;
        for edit in &edits {
            match *edit {
                Edit::Equal { old: o, new: n } => {
                    prop_assert_eq!(&old[o], &new[n]);
                    old_seen += 1;
                    new_seen += 1;
                },
                Edit::Delete { .. } => old_seen += 1,
                Edit::Insert { .. } => new_seen += 1,
            }
        }
        prop_assert_eq!(old_seen, old.len());
        prop_assert_eq!(new_seen, new.len());
    }
}
