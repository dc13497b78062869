//! Compressed content snapshots with storage policy and retention.
//!
//! A snapshot is only stored when it is worth keeping:
//!
//! | Check | Outcome when failed |
//! |-------|---------------------|
//! | document type is text | skipped (`unsupported_type`) |
//! | `content_size <= max_doc_size_bytes` | skipped (`too_large`) |
//! | `compression_ratio >= min_compression_ratio` | skipped (`low_compression`) |
//! | revision not already stored | skipped (`duplicate_revision`) |
//!
//! Skips return `Ok(None)`; only store or codec failures are errors.
//!
//! # Retention
//!
//! [`DocSnapshotService::prune_old_snapshots`] never removes a document's
//! latest snapshot. Older snapshots go when they exceed the retention age or
//! fall outside the newest `max_snapshots_per_doc`.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::models::{DocType, DocumentSnapshot, SnapshotStats};
use crate::storage::SnapshotStore;
use crate::{Error, Result};

/// Default maximum content size (10 MiB).
pub const DEFAULT_MAX_DOC_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Default minimum compression ratio.
pub const DEFAULT_MIN_COMPRESSION_RATIO: f64 = 1.1;

/// Default retention age in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Default number of snapshots kept per document.
pub const DEFAULT_MAX_SNAPSHOTS_PER_DOC: usize = 50;

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const MS_PER_DAY: i64 = 86_400_000;

/// Storage and retention policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPolicy {
    /// Content larger than this is not stored.
    pub max_doc_size_bytes: u64,
    /// Content compressing worse than this is not stored.
    pub min_compression_ratio: f64,
    /// Snapshots older than this are pruned. `0` disables age pruning.
    pub retention_days: u32,
    /// Snapshots beyond this count per document are pruned.
    pub max_snapshots_per_doc: usize,
    /// zstd level.
    pub compression_level: i32,
    /// Document types eligible for snapshots.
    pub supported_types: Vec<DocType>,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            max_doc_size_bytes: DEFAULT_MAX_DOC_SIZE_BYTES,
            min_compression_ratio: DEFAULT_MIN_COMPRESSION_RATIO,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_snapshots_per_doc: DEFAULT_MAX_SNAPSHOTS_PER_DOC,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            supported_types: DocType::text_types().to_vec(),
        }
    }
}

impl SnapshotPolicy {
    /// Sets the maximum content size.
    #[must_use]
    pub const fn with_max_doc_size_bytes(mut self, bytes: u64) -> Self {
        self.max_doc_size_bytes = bytes;
        self
    }

    /// Sets the minimum compression ratio.
    #[must_use]
    pub const fn with_min_compression_ratio(mut self, ratio: f64) -> Self {
        self.min_compression_ratio = ratio;
        self
    }

    /// Sets the retention age.
    #[must_use]
    pub const fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Sets the per-document snapshot cap.
    #[must_use]
    pub const fn with_max_snapshots_per_doc(mut self, max: usize) -> Self {
        self.max_snapshots_per_doc = max;
        self
    }
}

/// Per-snapshot attributes supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Revision number to store under.
    pub revision_number: i64,
    /// User who made the revision.
    pub modified_by: String,
    /// Source modification time (ms since epoch).
    pub modified_at: i64,
    /// Document type.
    pub doc_type: DocType,
}

/// Why a snapshot was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Document type is not snapshotted.
    UnsupportedType,
    /// Content exceeds the size cap.
    TooLarge,
    /// Compression did not reach the minimum ratio.
    LowCompression,
    /// The revision already exists.
    DuplicateRevision,
}

impl SkipReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedType => "unsupported_type",
            Self::TooLarge => "too_large",
            Self::LowCompression => "low_compression",
            Self::DuplicateRevision => "duplicate_revision",
        }
    }
}

/// Lowercase hex SHA-256 of `content`.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Snapshot service bound to one owner.
pub struct DocSnapshotService {
    store: Arc<dyn SnapshotStore>,
    owner_id: String,
    policy: SnapshotPolicy,
    clock: Arc<dyn Clock>,
}

impl DocSnapshotService {
    /// Creates a snapshot service.
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        owner_id: impl Into<String>,
        policy: SnapshotPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
            policy,
            clock,
        }
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    fn skip(doc_token: &str, reason: SkipReason, detail: &str) -> Option<DocumentSnapshot> {
        debug!(doc_token, reason = reason.as_str(), detail, "Snapshot skipped");
        metrics::counter!("docwatch_snapshots_skipped_total", "reason" => reason.as_str())
            .increment(1);
        None
    }

    /// Compresses and stores `content` as the document's latest snapshot.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the policy rejects the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if compression or the store fails.
    #[instrument(
        name = "docwatch.snapshot.create",
        skip(self, content, options),
        fields(revision = options.revision_number, content_size = content.len())
    )]
    #[allow(clippy::cast_precision_loss)]
    pub fn create_snapshot(
        &self,
        doc_token: &str,
        content: &str,
        options: SnapshotOptions,
    ) -> Result<Option<DocumentSnapshot>> {
        if !self.policy.supported_types.contains(&options.doc_type) {
            return Ok(Self::skip(
                doc_token,
                SkipReason::UnsupportedType,
                options.doc_type.as_str(),
            ));
        }

        let content_size = content.len() as u64;
        if content_size > self.policy.max_doc_size_bytes {
            return Ok(Self::skip(
                doc_token,
                SkipReason::TooLarge,
                &format!("{content_size} > {}", self.policy.max_doc_size_bytes),
            ));
        }

        let compressed = zstd::bulk::compress(content.as_bytes(), self.policy.compression_level)
            .map_err(|e| Error::failed("compress_snapshot", e))?;
        let compression_ratio = if compressed.is_empty() {
            0.0
        } else {
            content_size as f64 / compressed.len() as f64
        };
        if compression_ratio < self.policy.min_compression_ratio {
            return Ok(Self::skip(
                doc_token,
                SkipReason::LowCompression,
                &format!(
                    "{compression_ratio:.2} < {:.2}",
                    self.policy.min_compression_ratio
                ),
            ));
        }

        let snapshot = DocumentSnapshot {
            id: uuid::Uuid::now_v7().to_string(),
            doc_token: doc_token.to_string(),
            doc_type: options.doc_type,
            revision_number: options.revision_number,
            content_hash: content_hash(content),
            compressed_content: compressed,
            content_size,
            compression_ratio,
            modified_by: options.modified_by,
            modified_at: options.modified_at,
            stored_at: self.clock.now_ms(),
            is_latest: true,
        };

        if !self.store.insert_snapshot(&self.owner_id, &snapshot)? {
            return Ok(Self::skip(
                doc_token,
                SkipReason::DuplicateRevision,
                &options.revision_number.to_string(),
            ));
        }

        metrics::counter!("docwatch_snapshots_created_total").increment(1);
        debug!(
            doc_token,
            revision = snapshot.revision_number,
            compression_ratio,
            "Snapshot stored"
        );
        Ok(Some(snapshot))
    }

    /// Gets one revision's snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_snapshot(
        &self,
        doc_token: &str,
        revision_number: i64,
    ) -> Result<Option<DocumentSnapshot>> {
        self.store
            .get_snapshot(&self.owner_id, doc_token, revision_number)
    }

    /// Gets and decompresses one revision's content.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the content does not decode.
    pub fn get_snapshot_content(
        &self,
        doc_token: &str,
        revision_number: i64,
    ) -> Result<Option<String>> {
        self.get_snapshot(doc_token, revision_number)?
            .map(|s| decompress(&s))
            .transpose()
    }

    /// Gets the latest snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn latest_snapshot(&self, doc_token: &str) -> Result<Option<DocumentSnapshot>> {
        self.store.latest_snapshot(&self.owner_id, doc_token)
    }

    /// Gets the latest snapshot's revision and decompressed content.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the content does not decode.
    pub fn latest_content(&self, doc_token: &str) -> Result<Option<(i64, String)>> {
        self.latest_snapshot(doc_token)?
            .map(|s| decompress(&s).map(|content| (s.revision_number, content)))
            .transpose()
    }

    /// Returns the revision number the next snapshot should use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn next_revision(&self, doc_token: &str) -> Result<i64> {
        Ok(self
            .store
            .max_revision(&self.owner_id, doc_token)?
            .map_or(1, |max| max + 1))
    }

    /// Lists up to `limit` snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_snapshot_history(
        &self,
        doc_token: &str,
        limit: usize,
    ) -> Result<Vec<DocumentSnapshot>> {
        self.store
            .list_snapshots(&self.owner_id, doc_token, Some(limit))
    }

    /// Computes statistics over all of a document's snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_snapshot_stats(&self, doc_token: &str) -> Result<SnapshotStats> {
        let snapshots = self.store.list_snapshots(&self.owner_id, doc_token, None)?;
        Ok(SnapshotStats::from_snapshots(doc_token, &snapshots))
    }

    /// Applies retention to one document or, with `None`, to every document.
    ///
    /// Returns the number of snapshots removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(name = "docwatch.snapshot.prune", skip(self))]
    pub fn prune_old_snapshots(&self, doc_token: Option<&str>) -> Result<usize> {
        let tokens = match doc_token {
            Some(token) => vec![token.to_string()],
            None => self.store.snapshot_doc_tokens(&self.owner_id)?,
        };
        let cutoff = (self.policy.retention_days > 0).then(|| {
            self.clock
                .now_ms()
                .saturating_sub(i64::from(self.policy.retention_days) * MS_PER_DAY)
        });

        let mut removed = 0;
        for token in &tokens {
            let snapshots = self.store.list_snapshots(&self.owner_id, token, None)?;
            let expired: Vec<String> = snapshots
                .iter()
                .enumerate()
                .filter(|(index, s)| {
                    !s.is_latest
                        && (*index >= self.policy.max_snapshots_per_doc
                            || cutoff.is_some_and(|c| s.stored_at < c))
                })
                .map(|(_, s)| s.id.clone())
                .collect();
            if expired.is_empty() {
                continue;
            }
            let count = self.store.delete_snapshots(&self.owner_id, &expired)?;
            debug!(doc_token = %token, count, "Pruned snapshots");
            removed += count;
        }

        metrics::counter!("docwatch_snapshots_pruned_total").increment(removed as u64);
        info!(
            documents = tokens.len(),
            removed, "Snapshot retention pass complete"
        );
        Ok(removed)
    }

    /// Probes the backing store.
    #[must_use]
    pub fn health_check(&self) -> bool {
        let healthy = self.store.health_check();
        if !healthy {
            warn!("Snapshot store health check failed");
        }
        healthy
    }
}

impl std::fmt::Debug for DocSnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocSnapshotService")
            .field("owner_id", &self.owner_id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn decompress(snapshot: &DocumentSnapshot) -> Result<String> {
    let bytes = zstd::stream::decode_all(snapshot.compressed_content.as_slice())
        .map_err(|e| Error::failed("decompress_snapshot", e))?;
    String::from_utf8(bytes).map_err(|e| Error::failed("decode_snapshot_utf8", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    const DAY: i64 = MS_PER_DAY;

    fn service(policy: SnapshotPolicy) -> (DocSnapshotService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(100 * DAY));
        let svc = DocSnapshotService::new(
            Arc::new(MemoryStore::new()),
            "owner",
            policy,
            clock.clone(),
        );
        (svc, clock)
    }

    fn options(revision: i64) -> SnapshotOptions {
        SnapshotOptions {
            revision_number: revision,
            modified_by: "u1".to_string(),
            modified_at: 1000,
            doc_type: DocType::Docx,
        }
    }

    fn compressible(tag: &str) -> String {
        format!("{tag}\n").repeat(200)
    }

    #[test]
    fn test_compression_ratio_gate() {
        let (svc, _) = service(SnapshotPolicy::default());

        let random_looking = "x7Qp2Lm9Zr";
        assert!(
            svc.create_snapshot("doc", random_looking, options(1))
                .unwrap()
                .is_none()
        );

        let repeated = "the quick brown fox ".repeat(100);
        let stored = svc.create_snapshot("doc", &repeated, options(1)).unwrap().unwrap();
        assert!(stored.compression_ratio >= DEFAULT_MIN_COMPRESSION_RATIO);
        assert_eq!(stored.content_size, repeated.len() as u64);
        assert_eq!(stored.content_hash, content_hash(&repeated));
        assert_eq!(stored.content_hash.len(), 64);
    }

    #[test]
    fn test_unsupported_type_and_size_limit() {
        let (svc, _) = service(SnapshotPolicy::default().with_max_doc_size_bytes(100));
        let mut opts = options(1);
        opts.doc_type = DocType::Bitable;
        assert!(svc.create_snapshot("doc", &compressible("a"), opts).unwrap().is_none());

        assert!(
            svc.create_snapshot("doc", &compressible("a"), options(1))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_latest_flag_and_content_roundtrip() {
        let (svc, _) = service(SnapshotPolicy::default());
        svc.create_snapshot("doc", &compressible("one"), options(1)).unwrap();
        svc.create_snapshot("doc", &compressible("two"), options(2)).unwrap();

        let latest = svc.latest_snapshot("doc").unwrap().unwrap();
        assert_eq!(latest.revision_number, 2);
        assert!(!svc.get_snapshot("doc", 1).unwrap().unwrap().is_latest);

        assert_eq!(
            svc.get_snapshot_content("doc", 1).unwrap().unwrap(),
            compressible("one")
        );
        let (revision, content) = svc.latest_content("doc").unwrap().unwrap();
        assert_eq!(revision, 2);
        assert_eq!(content, compressible("two"));
        assert!(svc.get_snapshot_content("doc", 9).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_revision_is_skipped() {
        let (svc, _) = service(SnapshotPolicy::default());
        assert!(svc.create_snapshot("doc", &compressible("a"), options(1)).unwrap().is_some());
        assert!(svc.create_snapshot("doc", &compressible("b"), options(1)).unwrap().is_none());
        assert_eq!(svc.get_snapshot_stats("doc").unwrap().snapshot_count, 1);
    }

    #[test]
    fn test_next_revision() {
        let (svc, _) = service(SnapshotPolicy::default());
        assert_eq!(svc.next_revision("doc").unwrap(), 1);
        svc.create_snapshot("doc", &compressible("a"), options(4)).unwrap();
        assert_eq!(svc.next_revision("doc").unwrap(), 5);
    }

    #[test]
    fn test_history_and_stats() {
        let (svc, clock) = service(SnapshotPolicy::default());
        for rev in 1..=3 {
            svc.create_snapshot("doc", &compressible(&rev.to_string()), options(rev))
                .unwrap();
            clock.advance(1000);
        }

        let history = svc.get_snapshot_history("doc", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision_number, 3);

        let stats = svc.get_snapshot_stats("doc").unwrap();
        assert_eq!(stats.snapshot_count, 3);
        assert_eq!(stats.latest_revision, Some(3));
        assert_eq!(stats.newest_stored_at.unwrap() - stats.oldest_stored_at.unwrap(), 2000);
        assert!(stats.average_compression_ratio > 1.1);
    }

    #[test]
    fn test_prune_by_count_keeps_latest() {
        let (svc, _) = service(SnapshotPolicy::default().with_max_snapshots_per_doc(2));
        for rev in 1..=5 {
            svc.create_snapshot("doc", &compressible(&rev.to_string()), options(rev))
                .unwrap();
        }
        assert_eq!(svc.prune_old_snapshots(Some("doc")).unwrap(), 3);
        let revisions: Vec<_> = svc
            .get_snapshot_history("doc", 10)
            .unwrap()
            .iter()
            .map(|s| s.revision_number)
            .collect();
        assert_eq!(revisions, vec![5, 4]);
    }

    #[test]
    fn test_prune_by_age_across_documents() {
        let (svc, clock) = service(SnapshotPolicy::default().with_retention_days(30));
        svc.create_snapshot("a", &compressible("a1"), options(1)).unwrap();
        svc.create_snapshot("b", &compressible("b1"), options(1)).unwrap();
        svc.create_snapshot("a", &compressible("a2"), options(2)).unwrap();

        clock.advance(31 * DAY);
        // "a" rev 1 is old and not latest; "b" rev 1 is old but latest
        assert_eq!(svc.prune_old_snapshots(None).unwrap(), 1);
        assert!(svc.get_snapshot("a", 1).unwrap().is_none());
        assert!(svc.get_snapshot("b", 1).unwrap().is_some());
    }

    #[test]
    fn test_health_check() {
        let (svc, _) = service(SnapshotPolicy::default());
        assert!(svc.health_check());
    }
}
