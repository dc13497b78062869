//! Document identity, source metadata, and tracked state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of hosted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Legacy rich-text document.
    Doc,
    /// Rich-text document.
    #[default]
    Docx,
    /// Spreadsheet.
    Sheet,
    /// Multi-dimensional table.
    Bitable,
    /// Knowledge-base page.
    Wiki,
    /// Mind map.
    Mindnote,
    /// Uploaded binary file.
    File,
    /// Presentation.
    Slides,
}

impl DocType {
    /// Returns all document types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Doc,
            Self::Docx,
            Self::Sheet,
            Self::Bitable,
            Self::Wiki,
            Self::Mindnote,
            Self::File,
            Self::Slides,
        ]
    }

    /// Types whose content is text and can be snapshotted and diffed.
    #[must_use]
    pub const fn text_types() -> &'static [Self] {
        &[Self::Doc, Self::Docx, Self::Sheet, Self::Wiki]
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Sheet => "sheet",
            Self::Bitable => "bitable",
            Self::Wiki => "wiki",
            Self::Mindnote => "mindnote",
            Self::File => "file",
            Self::Slides => "slides",
        }
    }

    /// Parses a document type, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::InvalidInput(format!("unknown doc type: {s}")))
    }
}

/// Metadata reported by the document source on each poll.
///
/// Never persisted as-is; only compared against [`TrackedDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetadata {
    /// Document token.
    pub doc_token: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Owner identifier at the source.
    #[serde(default)]
    pub owner_id: String,
    /// Creation time (ms since epoch).
    #[serde(default)]
    pub created_time: i64,
    /// User who last modified the document.
    pub last_modified_user: String,
    /// Last modification time (ms since epoch).
    pub last_modified_time: i64,
    /// Document type.
    pub doc_type: DocType,
}

/// The poller's record of a watched document.
///
/// `last_known_*` stay `None` until the first successful poll establishes a baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedDocument {
    /// Document token (registry key).
    pub doc_token: String,
    /// Document type.
    pub doc_type: DocType,
    /// Chat or channel that receives default notifications.
    pub notify_target: String,
    /// Last modifying user seen.
    pub last_known_user: Option<String>,
    /// Last modification time seen (ms since epoch).
    pub last_known_modified_time: Option<i64>,
    /// When a notification was last emitted for this document.
    pub last_notification_time: Option<i64>,
}

impl TrackedDocument {
    /// Creates a tracked document without a baseline.
    #[must_use]
    pub fn new(
        doc_token: impl Into<String>,
        doc_type: DocType,
        notify_target: impl Into<String>,
    ) -> Self {
        Self {
            doc_token: doc_token.into(),
            doc_type,
            notify_target: notify_target.into(),
            last_known_user: None,
            last_known_modified_time: None,
            last_notification_time: None,
        }
    }

    /// Returns true once a poll has recorded the document's state.
    #[must_use]
    pub const fn has_baseline(&self) -> bool {
        self.last_known_modified_time.is_some()
    }
}
