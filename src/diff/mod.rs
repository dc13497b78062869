//! Semantic diff engine.
//!
//! [`compute_diff`] is a pure function producing line-level and block-level
//! differences between two revisions of a document. Presentation lives in
//! [`format_diff_for_card`] so the algorithm stays rendering-agnostic.
//!
//! Within each hunk (a maximal run of non-equal edits) deletions and
//! insertions are paired in order into `modified` entries; the remainder
//! stays `removed`/`added`. Pairing never changes `added - removed`, so for
//! any diff that difference equals the net change in line count.

mod blocks;
mod myers;

pub use blocks::segment;
pub use myers::{DEFAULT_MAX_EDIT_DISTANCE, Edit, diff as edit_script};

use std::fmt::Write as _;
use std::time::Instant;

use tracing::instrument;

use crate::duration_to_millis;
use crate::models::{BlockDiff, DiffKind, DiffResult, DiffSummary, LineDiff};

/// Maximum line entries listed by [`format_diff_for_card`].
pub const CARD_MAX_LINES: usize = 10;

/// Maximum characters per line shown by [`format_diff_for_card`].
const CARD_LINE_WIDTH: usize = 80;

/// A hunk of consecutive non-equal edits, split by direction.
struct Hunk {
    deleted: Vec<usize>,
    inserted: Vec<usize>,
}

fn hunks(edits: &[Edit]) -> Vec<Hunk> {
    let mut out = Vec::new();
    let mut current = Hunk {
        deleted: Vec::new(),
        inserted: Vec::new(),
    };
    for edit in edits {
        match *edit {
            Edit::Delete { old } => current.deleted.push(old),
            Edit::Insert { new } => current.inserted.push(new),
            Edit::Equal { .. } => {
                if !current.deleted.is_empty() || !current.inserted.is_empty() {
                    out.push(std::mem::replace(
                        &mut current,
                        Hunk {
                            deleted: Vec::new(),
                            inserted: Vec::new(),
                        },
                    ));
                }
            },
        }
    }
    if !current.deleted.is_empty() || !current.inserted.is_empty() {
        out.push(current);
    }
    out
}

/// A paired entry: indices into the old/new sequences.
enum Paired {
    Modified(usize, usize),
    Removed(usize),
    Added(usize),
}

fn pair(hunk: &Hunk) -> impl Iterator<Item = Paired> + '_ {
    let pairs = hunk.deleted.len().min(hunk.inserted.len());
    let modified = hunk
        .deleted
        .iter()
        .zip(&hunk.inserted)
        .map(|(&o, &n)| Paired::Modified(o, n));
    let removed = hunk.deleted[pairs..].iter().map(|&o| Paired::Removed(o));
    let added = hunk.inserted[pairs..].iter().map(|&n| Paired::Added(n));
    modified.chain(removed).chain(added)
}

/// Computes the line- and block-level diff between two contents.
///
/// Lines are split with [`str::lines`], so `\n` and `\r\n` endings are both
/// accepted and a trailing newline does not add an empty line.
#[must_use]
#[instrument(
    name = "docwatch.diff.compute",
    skip(previous_content, current_content),
    fields(previous_len = previous_content.len(), current_len = current_content.len())
)]
pub fn compute_diff(
    previous_content: &str,
    current_content: &str,
    previous_revision: i64,
    new_revision: i64,
) -> DiffResult {
    let start = Instant::now();

    let old_lines: Vec<&str> = previous_content.lines().collect();
    let new_lines: Vec<&str> = current_content.lines().collect();
    let line_edits = myers::diff(&old_lines, &new_lines, DEFAULT_MAX_EDIT_DISTANCE);

    let mut summary = DiffSummary::default();
    let mut line_diffs = Vec::new();
    for hunk in hunks(&line_edits) {
        for entry in pair(&hunk) {
            let diff = match entry {
                Paired::Modified(o, n) => {
                    summary.modified_lines += 1;
                    LineDiff {
                        kind: DiffKind::Modified,
                        old_line: Some(o + 1),
                        new_line: Some(n + 1),
                        old_text: Some(old_lines[o].to_string()),
                        new_text: Some(new_lines[n].to_string()),
                    }
                },
                Paired::Removed(o) => {
                    summary.removed_lines += 1;
                    LineDiff {
                        kind: DiffKind::Removed,
                        old_line: Some(o + 1),
                        new_line: None,
                        old_text: Some(old_lines[o].to_string()),
                        new_text: None,
                    }
                },
                Paired::Added(n) => {
                    summary.added_lines += 1;
                    LineDiff {
                        kind: DiffKind::Added,
                        old_line: None,
                        new_line: Some(n + 1),
                        old_text: None,
                        new_text: Some(new_lines[n].to_string()),
                    }
                },
            };
            line_diffs.push(diff);
        }
    }

    let old_blocks = segment(previous_content);
    let new_blocks = segment(current_content);
    let old_keys: Vec<_> = old_blocks.iter().map(|b| (b.kind, b.text.as_str())).collect();
    let new_keys: Vec<_> = new_blocks.iter().map(|b| (b.kind, b.text.as_str())).collect();
    let block_edits = myers::diff(&old_keys, &new_keys, DEFAULT_MAX_EDIT_DISTANCE);

    let mut block_diffs = Vec::new();
    for hunk in hunks(&block_edits) {
        for entry in pair(&hunk) {
            let diff = match entry {
                Paired::Modified(o, n) => {
                    summary.modified_blocks += 1;
                    BlockDiff {
                        kind: DiffKind::Modified,
                        block_kind: new_blocks[n].kind,
                        old_text: Some(old_blocks[o].text.clone()),
                        new_text: Some(new_blocks[n].text.clone()),
                    }
                },
                Paired::Removed(o) => {
                    summary.removed_blocks += 1;
                    BlockDiff {
                        kind: DiffKind::Removed,
                        block_kind: old_blocks[o].kind,
                        old_text: Some(old_blocks[o].text.clone()),
                        new_text: None,
                    }
                },
                Paired::Added(n) => {
                    summary.added_blocks += 1;
                    BlockDiff {
                        kind: DiffKind::Added,
                        block_kind: new_blocks[n].kind,
                        old_text: None,
                        new_text: Some(new_blocks[n].text.clone()),
                    }
                },
            };
            block_diffs.push(diff);
        }
    }

    summary.total_changes = summary.added_lines + summary.removed_lines + summary.modified_lines;
    summary.percent_changed = percent_changed(
        summary.total_changes,
        old_lines.len().max(new_lines.len()),
    );
    summary.text = summary_text(&summary);

    DiffResult {
        previous_revision,
        new_revision,
        line_diffs,
        block_diffs,
        summary,
        compute_time_ms: duration_to_millis(start.elapsed()),
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent_changed(total_changes: usize, max_lines: usize) -> f64 {
    if total_changes == 0 || max_lines == 0 {
        return 0.0;
    }
    let percent = (total_changes as f64 / max_lines as f64 * 100.0).min(100.0);
    (percent * 100.0).round() / 100.0
}

fn summary_text(summary: &DiffSummary) -> String {
    if summary.total_changes == 0 {
        return "No changes".to_string();
    }
    format!(
        "+{} -{} ~{} lines ({:.1}% changed)",
        summary.added_lines, summary.removed_lines, summary.modified_lines, summary.percent_changed
    )
}

fn clip(text: &str) -> String {
    if text.chars().count() <= CARD_LINE_WIDTH {
        return text.to_string();
    }
    let clipped: String = text.chars().take(CARD_LINE_WIDTH - 3).collect();
    format!("{clipped}...")
}

/// Renders a plain-text summary of a diff for a notification card.
#[must_use]
pub fn format_diff_for_card(diff: &DiffResult) -> String {
    let mut out = format!(
        "Revision {} -> {}: {}",
        diff.previous_revision, diff.new_revision, diff.summary.text
    );
    if diff.is_empty() {
        return out;
    }

    let s = &diff.summary;
    if s.added_blocks + s.removed_blocks + s.modified_blocks > 0 {
        let _ = write!(
            out,
            "\nBlocks: {} added, {} removed, {} modified",
            s.added_blocks, s.removed_blocks, s.modified_blocks
        );
    }

    for line in diff.line_diffs.iter().take(CARD_MAX_LINES) {
        let _ = match line.kind {
            DiffKind::Added => write!(
                out,
                "\n+ {}",
                clip(line.new_text.as_deref().unwrap_or_default())
            ),
            DiffKind::Removed => write!(
                out,
                "\n- {}",
                clip(line.old_text.as_deref().unwrap_or_default())
            ),
            DiffKind::Modified => write!(
                out,
                "\n~ {} => {}",
                clip(line.old_text.as_deref().unwrap_or_default()),
                clip(line.new_text.as_deref().unwrap_or_default())
            ),
        };
    }
    if diff.line_diffs.len() > CARD_MAX_LINES {
        let _ = write!(
            out,
            "\n... and {} more",
            diff.line_diffs.len() - CARD_MAX_LINES
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockKind;

    #[test]
    fn test_identical_content_has_no_changes() {
        let diff = compute_diff("a\nb\nc", "a\nb\nc", 1, 2);
        assert_eq!(diff.summary.total_changes, 0);
        assert!(diff.summary.percent_changed.abs() < f64::EPSILON);
        assert!(diff.line_diffs.is_empty());
        assert!(diff.block_diffs.is_empty());
        assert_eq!(diff.summary.text, "No changes");
    }

    #[test]
    fn test_empty_documents() {
        let diff = compute_diff("", "", 0, 1);
        assert!(diff.is_empty());

        let diff = compute_diff("", "one\ntwo", 0, 1);
        assert_eq!(diff.summary.added_lines, 2);
        assert!((diff.summary.percent_changed - 100.0).abs() < f64::EPSILON);

        let diff = compute_diff("one\ntwo", "", 1, 2);
        assert_eq!(diff.summary.removed_lines, 2);
    }

    #[test]
    fn test_pure_insertion() {
        let diff = compute_diff("a\nb\nc\nd", "a\nb\nx\ny\nc\nd", 1, 2);
        assert_eq!(diff.summary.added_lines, 2);
        assert_eq!(diff.summary.removed_lines, 0);
        assert_eq!(diff.summary.modified_lines, 0);
        assert!((diff.summary.percent_changed - 33.33).abs() < 0.01);
        assert_eq!(diff.line_diffs[0].new_line, Some(3));
    }

    #[test]
    fn test_modification_is_paired() {
        let diff = compute_diff("title\nold body\nfooter", "title\nnew body\nfooter", 1, 2);
        assert_eq!(diff.summary.modified_lines, 1);
        assert_eq!(diff.summary.added_lines, 0);
        assert_eq!(diff.summary.removed_lines, 0);
        let line = &diff.line_diffs[0];
        assert_eq!(line.kind, DiffKind::Modified);
        assert_eq!(line.old_text.as_deref(), Some("old body"));
        assert_eq!(line.new_text.as_deref(), Some("new body"));
    }

    #[test]
    fn test_unicode_lines_counted_once() {
        let diff = compute_diff("héllo\n世界\n🎉", "héllo\n世界\n🎉\nnouveau", 1, 2);
        assert_eq!(diff.summary.added_lines, 1);
        assert_eq!(diff.line_diffs[0].new_line, Some(4));
    }

    #[test]
    fn test_crlf_and_trailing_newline() {
        let diff = compute_diff("a\r\nb\r\n", "a\nb", 1, 2);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_large_document() {
        let old: String = (0..5_000).map(|i| format!("line {i}\n")).collect();
        let mut new = old.clone();
        new.push_str("appended\n");
        let diff = compute_diff(&old, &new, 1, 2);
        assert_eq!(diff.summary.added_lines, 1);
        assert_eq!(diff.summary.total_changes, 1);
    }

    #[test]
    fn test_block_diff_detects_heading_change() {
        let diff = compute_diff("# Old\n\nbody", "# New\n\nbody\n\n- item", 1, 2);
        assert_eq!(diff.summary.modified_blocks, 1);
        assert_eq!(diff.summary.added_blocks, 1);
        assert_eq!(diff.block_diffs[0].block_kind, BlockKind::Heading);
        assert_eq!(diff.block_diffs[1].block_kind, BlockKind::List);
    }

    #[test]
    fn test_format_card() {
        let diff = compute_diff("a\nb", "a\nc\nd", 3, 4);
        let card = format_diff_for_card(&diff);
        assert!(card.starts_with("Revision 3 -> 4: "));
        assert!(card.contains("~ b => c"));
        assert!(card.contains("+ d"));

        let unchanged = format_diff_for_card(&compute_diff("x", "x", 1, 2));
        assert_eq!(unchanged, "Revision 1 -> 2: No changes");
    }

    #[test]
    fn test_format_card_truncates() {
        let old = "";
        let new: String = (0..15).map(|i| format!("l{i}\n")).collect();
        let card = format_diff_for_card(&compute_diff(old, &new, 1, 2));
        assert!(card.contains("... and 5 more"));
    }
}
