//! Structured diff output.

use serde::{Deserialize, Serialize};

/// Kind of a single diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// Present only in the new content.
    Added,
    /// Present only in the old content.
    Removed,
    /// Replaced in place.
    Modified,
}

/// One changed line. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    /// Change kind.
    pub kind: DiffKind,
    /// Line number in the old content.
    pub old_line: Option<usize>,
    /// Line number in the new content.
    pub new_line: Option<usize>,
    /// Old text.
    pub old_text: Option<String>,
    /// New text.
    pub new_text: Option<String>,
}

/// Structural unit of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// ATX heading.
    Heading,
    /// Run of non-blank, non-list lines.
    Paragraph,
    /// Run of list items.
    List,
}

/// A segmented block of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block kind.
    pub kind: BlockKind,
    /// Block text (lines joined with `\n`).
    pub text: String,
    /// 1-based first line of the block.
    pub start_line: usize,
}

/// One changed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDiff {
    /// Change kind.
    pub kind: DiffKind,
    /// Block kind (of the new block for additions/modifications).
    pub block_kind: BlockKind,
    /// Old block text.
    pub old_text: Option<String>,
    /// New block text.
    pub new_text: Option<String>,
}

/// Totals over a diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Lines added.
    pub added_lines: usize,
    /// Lines removed.
    pub removed_lines: usize,
    /// Lines modified in place.
    pub modified_lines: usize,
    /// `added + removed + modified`.
    pub total_changes: usize,
    /// Total changes over `max(old lines, new lines)`, as a percentage.
    pub percent_changed: f64,
    /// Blocks added.
    pub added_blocks: usize,
    /// Blocks removed.
    pub removed_blocks: usize,
    /// Blocks modified.
    pub modified_blocks: usize,
    /// One-line human summary.
    pub text: String,
}

/// Line- and block-level diff between two revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Revision of the old content.
    pub previous_revision: i64,
    /// Revision of the new content.
    pub new_revision: i64,
    /// Line-level entries in document order.
    pub line_diffs: Vec<LineDiff>,
    /// Block-level entries in document order.
    pub block_diffs: Vec<BlockDiff>,
    /// Totals.
    pub summary: DiffSummary,
    /// Wall time spent computing.
    pub compute_time_ms: u64,
}

impl DiffResult {
    /// Returns true when nothing changed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.summary.total_changes == 0
    }
}
