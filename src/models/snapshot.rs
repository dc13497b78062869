//! Stored content snapshots.

use serde::{Deserialize, Serialize};

use super::DocType;

/// A compressed copy of a document's content at one revision.
///
/// At most one snapshot exists per `(doc_token, revision_number)`, and at most
/// one snapshot per document carries `is_latest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Unique snapshot ID.
    pub id: String,
    /// Document token.
    pub doc_token: String,
    /// Document type at capture time.
    pub doc_type: DocType,
    /// Monotonic revision number within the document.
    pub revision_number: i64,
    /// Lowercase hex SHA-256 of the raw content.
    pub content_hash: String,
    /// zstd-compressed content.
    #[serde(skip_serializing, default)]
    pub compressed_content: Vec<u8>,
    /// Raw content size in bytes.
    pub content_size: u64,
    /// `content_size / compressed size`.
    pub compression_ratio: f64,
    /// User who made this revision.
    pub modified_by: String,
    /// Source modification time (ms since epoch).
    pub modified_at: i64,
    /// When the snapshot was stored (ms since epoch).
    pub stored_at: i64,
    /// Whether this is the newest snapshot for the document.
    pub is_latest: bool,
}

impl DocumentSnapshot {
    /// Compressed size in bytes.
    #[must_use]
    pub fn compressed_size(&self) -> u64 {
        self.compressed_content.len() as u64
    }
}

/// Aggregate statistics over a document's snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Document token.
    pub doc_token: String,
    /// Number of stored snapshots.
    pub snapshot_count: usize,
    /// Mean compression ratio (0 when empty).
    pub average_compression_ratio: f64,
    /// Sum of raw sizes.
    pub total_content_size: u64,
    /// Sum of compressed sizes.
    pub total_compressed_size: u64,
    /// Oldest `stored_at`.
    pub oldest_stored_at: Option<i64>,
    /// Newest `stored_at`.
    pub newest_stored_at: Option<i64>,
    /// Revision of the latest snapshot.
    pub latest_revision: Option<i64>,
}

impl SnapshotStats {
    /// Computes statistics from a set of snapshots.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_snapshots(doc_token: &str, snapshots: &[DocumentSnapshot]) -> Self {
        let count = snapshots.len();
        let ratio_sum: f64 = snapshots.iter().map(|s| s.compression_ratio).sum();
        Self {
            doc_token: doc_token.to_string(),
            snapshot_count: count,
            average_compression_ratio: if count == 0 {
                0.0
            } else {
                ratio_sum / count as f64
            },
            total_content_size: snapshots.iter().map(|s| s.content_size).sum(),
            total_compressed_size: snapshots.iter().map(DocumentSnapshot::compressed_size).sum(),
            oldest_stored_at: snapshots.iter().map(|s| s.stored_at).min(),
            newest_stored_at: snapshots.iter().map(|s| s.stored_at).max(),
            latest_revision: snapshots
                .iter()
                .find(|s| s.is_latest)
                .map(|s| s.revision_number),
        }
    }
}
