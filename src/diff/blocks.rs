//! Block segmentation.
//!
//! Content is split into headings, list blocks, and paragraphs. Blank lines
//! separate blocks; consecutive list items form one list block.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Block, BlockKind};

/// ATX heading: `#` to `######` followed by whitespace.
static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+\S").unwrap_or_else(|_| unreachable!()));

/// Bullet (`-`, `*`, `+`) or ordered (`1.`, `1)`) list item.
static LIST_ITEM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d{1,9}[.)])\s+\S").unwrap_or_else(|_| unreachable!())
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum LineClass {
    Blank,
    Heading,
    ListItem,
    Text,
}

fn classify(line: &str) -> LineClass {
    if line.trim().is_empty() {
        LineClass::Blank
    } else if HEADING_PATTERN.is_match(line) {
        LineClass::Heading
    } else if LIST_ITEM_PATTERN.is_match(line) {
        LineClass::ListItem
    } else {
        LineClass::Text
    }
}

struct Pending {
    kind: BlockKind,
    lines: Vec<String>,
    start_line: usize,
}

impl Pending {
    fn finish(self) -> Block {
        Block {
            kind: self.kind,
            text: self.lines.join("\n"),
            start_line: self.start_line,
        }
    }
}

/// Segments content into typed blocks.
#[must_use]
pub fn segment(content: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut pending: Option<Pending> = None;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        let class = classify(line);

        let continues = match (&pending, class) {
            (Some(p), LineClass::ListItem) => p.kind == BlockKind::List,
            (Some(p), LineClass::Text) => p.kind != BlockKind::Heading,
            _ => false,
        };
        if continues {
            if let Some(p) = pending.as_mut() {
                p.lines.push(line.trim_end().to_string());
            }
            continue;
        }

        if let Some(p) = pending.take() {
            blocks.push(p.finish());
        }

        let kind = match class {
            LineClass::Blank => continue,
            LineClass::Heading => BlockKind::Heading,
            LineClass::ListItem => BlockKind::List,
            LineClass::Text => BlockKind::Paragraph,
        };
        pending = Some(Pending {
            kind,
            lines: vec![line.trim_end().to_string()],
            start_line: line_no,
        });
    }

    if let Some(p) = pending {
        blocks.push(p.finish());
    }
    blocks
}
