//! Document poller.
//!
//! Owns the registry of tracked documents and runs poll cycles over it. Each
//! cycle fetches metadata for every document with bounded concurrency, asks
//! the [`ChangeDetector`] for a verdict, and for genuine changes runs the
//! snapshot, diff, and rules pipeline.
//!
//! # Per-document pipeline
//!
//! | Step | Failure handling |
//! |------|------------------|
//! | Fetch metadata (timeout, retry with backoff) | Counted as failed, state untouched |
//! | Detect | Pure |
//! | Debounced change | Counted, state untouched |
//! | Write back registry entry | Discarded if the entry was removed mid-poll |
//! | Fetch content, snapshot, diff | Logged, event still emitted |
//! | Default notification | Logged, `notification_sent = false` |
//! | Record event, evaluate rules | Logged |

mod stats;

pub use stats::{HealthStatus, PollStats, PollStatus, PollerHealth, PollerMetrics};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use super::detector::{ChangeDetector, DEFAULT_DEBOUNCE_WINDOW_MS, DetectorOptions};
use super::rules_queue::RulesIntegration;
use super::snapshot::{DocSnapshotService, SnapshotOptions};
use crate::clock::Clock;
use crate::connectors::{ContentFetcher, MetadataFetcher, NotifySink};
use crate::diff::{compute_diff, format_diff_for_card};
use crate::models::{
    ChangeDetectionResult, ChangeEvent, ChangeType, DiffResult, DocMetadata, DocType,
    TrackedDocument,
};
use crate::sync::acquire_lock;
use crate::storage::{ChangeEventStore, TrackedDocumentStore};
use crate::{Error, Result, duration_to_millis};

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;

/// Default number of documents fetched at once.
pub const DEFAULT_MAX_CONCURRENT_POLLS: usize = 5;

/// Default deadline for one metadata or content fetch.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Default retries after the first failed fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Window for [`PollerMetrics`].
pub const STATS_WINDOW_MS: i64 = 3_600_000;

/// Success rate below which the poller reports itself degraded.
pub const DEFAULT_MIN_SUCCESS_RATE: f64 = 0.8;

/// Failed polls per window at which the poller reports itself degraded.
pub const DEFAULT_MAX_ERRORS_PER_HOUR: usize = 10;

/// Poller options.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerOptions {
    /// Time between cycles of the background loop.
    pub interval_ms: u64,
    /// Maximum documents fetched at once.
    pub max_concurrent_polls: usize,
    /// Deadline for one fetch attempt.
    pub fetch_timeout_ms: u64,
    /// Retries after the first failed fetch.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay_ms: u64,
    /// Minimum time between notifications for one document.
    pub debounce_window_ms: i64,
    /// Health threshold for the success rate.
    pub min_success_rate: f64,
    /// Health threshold for failed polls per window.
    pub max_errors_per_hour: usize,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_polls: DEFAULT_MAX_CONCURRENT_POLLS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
            max_errors_per_hour: DEFAULT_MAX_ERRORS_PER_HOUR,
        }
    }
}

impl PollerOptions {
    /// Sets the loop interval.
    #[must_use]
    pub const fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Sets the concurrency bound.
    #[must_use]
    pub const fn with_max_concurrent_polls(mut self, max: usize) -> Self {
        self.max_concurrent_polls = max;
        self
    }

    /// Sets the per-fetch deadline.
    #[must_use]
    pub const fn with_fetch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fetch_timeout_ms = timeout_ms;
        self
    }

    /// Sets the retry budget and base backoff.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Sets the debounce window.
    #[must_use]
    pub const fn with_debounce_window_ms(mut self, window_ms: i64) -> Self {
        self.debounce_window_ms = window_ms;
        self
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1 << exponent))
    }
}

/// Collaborators of the poller.
#[derive(Clone)]
pub struct PollerDeps {
    /// Metadata source.
    pub metadata: Arc<dyn MetadataFetcher>,
    /// Content source.
    pub content: Arc<dyn ContentFetcher>,
    /// Sink for default notifications.
    pub notify: Arc<dyn NotifySink>,
    /// Snapshot service for content history.
    pub snapshots: Arc<DocSnapshotService>,
    /// Rules hand-off.
    pub rules: Arc<RulesIntegration>,
    /// Write-through store for the registry.
    pub tracked_store: Arc<dyn TrackedDocumentStore>,
    /// Change event audit log.
    pub event_store: Arc<dyn ChangeEventStore>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PollerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerDeps")
            .field("snapshots", &self.snapshots)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollCycleReport {
    /// Documents polled.
    pub polled: usize,
    /// Documents whose metadata did not change.
    pub unchanged: usize,
    /// Genuine changes that ran the pipeline.
    pub changed: usize,
    /// Changes suppressed by the debounce window.
    pub debounced: usize,
    /// Documents whose fetch failed after retries.
    pub failed: usize,
    /// Documents the source reported as missing.
    pub missing: usize,
    /// Changes discarded because the document was untracked mid-poll.
    pub stale: usize,
    /// Wall time of the cycle.
    pub duration_ms: u64,
    /// Events emitted, ordered by document token.
    pub events: Vec<ChangeEvent>,
}

impl PollCycleReport {
    fn record(&mut self, outcome: DocOutcome) {
        self.polled += 1;
        match outcome {
            DocOutcome::Unchanged => self.unchanged += 1,
            DocOutcome::Changed(event) => {
                self.changed += 1;
                self.events.push(*event);
            },
            DocOutcome::Debounced => self.debounced += 1,
            DocOutcome::Failed => self.failed += 1,
            DocOutcome::Missing => self.missing += 1,
            DocOutcome::Stale => self.stale += 1,
        }
    }
}

#[derive(Debug)]
enum DocOutcome {
    Unchanged,
    Changed(Box<ChangeEvent>),
    Debounced,
    Failed,
    Missing,
    Stale,
}

/// Watches a set of documents for one owner.
///
/// Cheap to clone; clones share the registry and the poll loop.
#[derive(Clone)]
pub struct DocPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    owner_id: String,
    options: PollerOptions,
    registry: DashMap<String, TrackedDocument>,
    detector: ChangeDetector,
    deps: PollerDeps,
    semaphore: Arc<Semaphore>,
    stats: Mutex<PollStats>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    cycle: tokio::sync::Mutex<()>,
}

impl DocPoller {
    /// Creates a poller with an empty registry.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, options: PollerOptions, deps: PollerDeps) -> Self {
        let detector = ChangeDetector::new(
            DetectorOptions::default().with_debounce_window_ms(options.debounce_window_ms),
            Arc::clone(&deps.clock),
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(PollerInner {
                owner_id: owner_id.into(),
                semaphore: Arc::new(Semaphore::new(options.max_concurrent_polls.max(1))),
                options,
                registry: DashMap::new(),
                detector,
                deps,
                stats: Mutex::new(PollStats::new(STATS_WINDOW_MS)),
                running: AtomicBool::new(false),
                shutdown,
                loop_handle: Mutex::new(None),
                cycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &PollerOptions {
        &self.inner.options
    }

    /// Returns the owner this poller watches for.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.inner.owner_id
    }

    /// Returns the snapshot service.
    #[must_use]
    pub fn snapshots(&self) -> Arc<DocSnapshotService> {
        Arc::clone(&self.inner.deps.snapshots)
    }

    /// Returns the rules hand-off.
    #[must_use]
    pub fn rules(&self) -> Arc<RulesIntegration> {
        Arc::clone(&self.inner.deps.rules)
    }

    /// Returns whether the background loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Starts watching a document. Tracking an already tracked token is a no-op.
    ///
    /// Returns whether the document was newly tracked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty token.
    pub fn start_tracking_doc(
        &self,
        doc_token: &str,
        doc_type: DocType,
        notify_target: &str,
    ) -> Result<bool> {
        let doc_token = doc_token.trim();
        if doc_token.is_empty() {
            return Err(Error::InvalidInput("doc_token must not be empty".to_string()));
        }

        let doc = TrackedDocument::new(doc_token, doc_type, notify_target);
        match self.inner.registry.entry(doc_token.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!(doc_token, "Document already tracked");
                return Ok(false);
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let entry = slot.insert(doc);
                self.inner.persist(entry.value());
            },
        }

        info!(doc_token, doc_type = %doc_type, "Tracking document");
        Ok(true)
    }

    /// Stops watching a document. Returns whether it was tracked.
    pub fn stop_tracking_doc(&self, doc_token: &str) -> bool {
        let removed = self.inner.registry.remove(doc_token).is_some();
        if removed {
            if let Err(e) = self
                .inner
                .deps
                .tracked_store
                .remove_tracked(&self.inner.owner_id, doc_token)
            {
                warn!(doc_token, error = %e, "Failed to remove tracked document from store");
            }
            info!(doc_token, "Stopped tracking document");
        }
        removed
    }

    /// Returns a tracked document.
    #[must_use]
    pub fn get_tracked(&self, doc_token: &str) -> Option<TrackedDocument> {
        self.inner.registry.get(doc_token).map(|e| e.value().clone())
    }

    /// Lists tracked documents ordered by token.
    #[must_use]
    pub fn list_tracked(&self) -> Vec<TrackedDocument> {
        self.inner.snapshot_registry()
    }

    /// Loads persisted documents into the registry, keeping entries already present.
    ///
    /// Returns how many were added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the store cannot be read.
    pub fn restore(&self) -> Result<usize> {
        let stored = self
            .inner
            .deps
            .tracked_store
            .list_tracked(&self.inner.owner_id)?;
        let mut added = 0;
        for doc in stored {
            if let dashmap::mapref::entry::Entry::Vacant(slot) =
                self.inner.registry.entry(doc.doc_token.clone())
            {
                slot.insert(doc);
                added += 1;
            }
        }
        info!(restored = added, "Restored tracked documents");
        Ok(added)
    }

    /// Clears the registry and statistics. Persisted documents are kept.
    pub fn reset(&self) {
        self.inner.registry.clear();
        acquire_lock(&self.inner.stats).clear();
    }

    /// Runs one poll cycle over every tracked document.
    ///
    /// Cycles never overlap; a second caller waits for the first to finish.
    #[instrument(name = "docwatch.poller.cycle", skip(self), fields(docs = tracing::field::Empty))]
    pub async fn poll_once(&self) -> PollCycleReport {
        let _cycle = self.inner.cycle.lock().await;
        let start = Instant::now();
        let docs = self.inner.snapshot_registry();
        tracing::Span::current().record("docs", docs.len());

        let mut tasks = JoinSet::new();
        for doc in docs {
            let inner = Arc::clone(&self.inner);
            tasks.spawn(async move {
                let Ok(_permit) = Arc::clone(&inner.semaphore).acquire_owned().await else {
                    return DocOutcome::Failed;
                };
                inner.poll_document(doc).await
            });
        }

        let mut report = PollCycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    warn!(error = %e, "Poll task aborted");
                    report.record(DocOutcome::Failed);
                },
            }
        }
        report.events.sort_by(|a, b| a.doc_token.cmp(&b.doc_token));

        report.duration_ms = duration_to_millis(start.elapsed());
        acquire_lock(&self.inner.stats)
            .record_cycle(self.inner.deps.clock.now_ms(), report.duration_ms);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("docwatch_poll_cycle_duration_ms").record(report.duration_ms as f64);

        info!(
            polled = report.polled,
            changed = report.changed,
            debounced = report.debounced,
            failed = report.failed,
            missing = report.missing,
            duration_ms = report.duration_ms,
            "Poll cycle complete"
        );
        report
    }

    /// Starts the background loop. Returns `false` if it was already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] outside a Tokio runtime.
    pub fn start(&self) -> Result<bool> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::failed("start_poller", e))?;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        self.inner.shutdown.send_replace(false);
        let mut shutdown = self.inner.shutdown.subscribe();
        let interval = Duration::from_millis(self.inner.options.interval_ms.max(1));
        let poller = self.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        poller.poll_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Poll loop stopped");
        });
        *acquire_lock(&self.inner.loop_handle) = Some(handle);

        info!(
            interval_ms = self.inner.options.interval_ms,
            docs = self.inner.registry.len(),
            "Poll loop started"
        );
        Ok(true)
    }

    /// Stops the loop after its current cycle, then drains the rule queue.
    ///
    /// Returns whether both finished within `timeout` each.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown.send_replace(true);
        let handle = acquire_lock(&self.inner.loop_handle).take();
        let mut stopped = true;
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Poll loop did not stop in time, aborting");
                abort.abort();
                stopped = false;
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);

        let drained = self.inner.deps.rules.shutdown(timeout).await;
        stopped && drained
    }

    /// Poll statistics over the last hour.
    #[must_use]
    pub fn metrics(&self) -> PollerMetrics {
        let now = self.inner.deps.clock.now_ms();
        acquire_lock(&self.inner.stats).snapshot(now, self.inner.registry.len(), self.is_running())
    }

    /// Health verdict derived from [`DocPoller::metrics`].
    #[must_use]
    pub fn health(&self) -> PollerHealth {
        PollerHealth::evaluate(
            self.metrics(),
            self.inner.options.min_success_rate,
            self.inner.options.max_errors_per_hour,
        )
    }
}

impl std::fmt::Debug for DocPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocPoller")
            .field("owner_id", &self.inner.owner_id)
            .field("docs_tracked", &self.inner.registry.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PollerInner {
    fn snapshot_registry(&self) -> Vec<TrackedDocument> {
        let mut docs: Vec<TrackedDocument> =
            self.registry.iter().map(|e| e.value().clone()).collect();
        docs.sort_by(|a, b| a.doc_token.cmp(&b.doc_token));
        docs
    }

    fn persist(&self, doc: &TrackedDocument) {
        if let Err(e) = self.deps.tracked_store.upsert_tracked(&self.owner_id, doc) {
            warn!(doc_token = %doc.doc_token, error = %e, "Failed to persist tracked document");
        }
    }

    fn record_poll(&self, status: PollStatus) {
        acquire_lock(&self.stats).record_poll(self.deps.clock.now_ms(), status);
        metrics::counter!("docwatch_polls_total", "status" => status.as_str()).increment(1);
    }

    async fn poll_document(&self, tracked: TrackedDocument) -> DocOutcome {
        let metadata = match self.fetch_with_retry(&tracked).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                self.record_poll(PollStatus::Missing);
                debug!(doc_token = %tracked.doc_token, "Document missing at source");
                return DocOutcome::Missing;
            },
            Err(e) => {
                self.record_poll(PollStatus::Failed);
                warn!(doc_token = %tracked.doc_token, error = %e, "Metadata fetch failed");
                return DocOutcome::Failed;
            },
        };
        self.record_poll(PollStatus::Success);

        let result = self.detector.detect(&metadata, Some(&tracked));
        if !result.has_changed {
            return DocOutcome::Unchanged;
        }
        metrics::counter!(
            "docwatch_changes_detected_total",
            "change_type" => result.change_type.as_str()
        )
        .increment(1);
        if result.debounced {
            metrics::counter!("docwatch_changes_debounced_total").increment(1);
            debug!(doc_token = %tracked.doc_token, "Change debounced");
            return DocOutcome::Debounced;
        }

        let updated = self.detector.create_updated_tracked_state(&tracked, &metadata);
        let Some(updated) = self.write_back(updated) else {
            metrics::counter!("docwatch_stale_writes_discarded_total").increment(1);
            debug!(doc_token = %tracked.doc_token, "Document untracked mid-poll, discarding");
            return DocOutcome::Stale;
        };

        let event = self.run_pipeline(&updated, &metadata, &result).await;
        DocOutcome::Changed(Box::new(event))
    }

    /// Applies the new tracked state unless the entry was removed mid-poll.
    ///
    /// Keeps the current entry's type and target, which may have been changed
    /// by a re-track. The store write happens under the entry guard so a
    /// concurrent stop, which must take the same shard lock, removes the row
    /// after it.
    fn write_back(&self, mut updated: TrackedDocument) -> Option<TrackedDocument> {
        let mut entry = self.registry.get_mut(&updated.doc_token)?;
        updated.doc_type = entry.doc_type;
        updated.notify_target.clone_from(&entry.notify_target);
        *entry = updated.clone();
        self.persist(&updated);
        drop(entry);
        Some(updated)
    }

    async fn fetch_with_retry(&self, doc: &TrackedDocument) -> Result<Option<DocMetadata>> {
        let timeout = Duration::from_millis(self.options.fetch_timeout_ms);
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(
                timeout,
                self.deps.metadata.fetch_metadata(&doc.doc_token, doc.doc_type),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout {
                    operation: "fetch_metadata".to_string(),
                    elapsed_ms: self.options.fetch_timeout_ms,
                }),
            };

            match outcome {
                Ok(metadata) => return Ok(metadata),
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    attempt += 1;
                    let delay = self.options.retry_delay(attempt);
                    metrics::counter!("docwatch_poll_retries_total").increment(1);
                    debug!(
                        doc_token = %doc.doc_token,
                        attempt,
                        delay_ms = duration_to_millis(delay),
                        error = %e,
                        "Retrying metadata fetch"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_content(&self, doc_token: &str) -> Option<String> {
        let timeout = Duration::from_millis(self.options.fetch_timeout_ms);
        match tokio::time::timeout(timeout, self.deps.content.fetch_content(doc_token)).await {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                warn!(doc_token, error = %e, "Content fetch failed");
                None
            },
            Err(_) => {
                warn!(doc_token, timeout_ms = self.options.fetch_timeout_ms, "Content fetch timed out");
                None
            },
        }
    }

    /// Stores a snapshot of the current content and diffs it against the previous one.
    fn capture(&self, metadata: &DocMetadata, content: &str) -> (Option<i64>, Option<DiffResult>) {
        let token = metadata.doc_token.as_str();
        let snapshots = &self.deps.snapshots;

        let previous = snapshots.latest_content(token).unwrap_or_else(|e| {
            warn!(doc_token = token, error = %e, "Failed to load previous snapshot");
            None
        });
        let revision = match snapshots.next_revision(token) {
            Ok(revision) => revision,
            Err(e) => {
                warn!(doc_token = token, error = %e, "Failed to allocate revision");
                return (None, None);
            },
        };

        let stored = snapshots
            .create_snapshot(
                token,
                content,
                SnapshotOptions {
                    revision_number: revision,
                    modified_by: metadata.last_modified_user.clone(),
                    modified_at: metadata.last_modified_time,
                    doc_type: metadata.doc_type,
                },
            )
            .unwrap_or_else(|e| {
                warn!(doc_token = token, error = %e, "Snapshot failed");
                None
            });

        let diff = previous.map(|(previous_revision, previous_content)| {
            compute_diff(&previous_content, content, previous_revision, revision)
        });
        (stored.map(|s| s.revision_number), diff)
    }

    async fn run_pipeline(
        &self,
        tracked: &TrackedDocument,
        metadata: &DocMetadata,
        result: &ChangeDetectionResult,
    ) -> ChangeEvent {
        let mut event = ChangeEvent::from_detection(metadata, result);

        let mut diff = None;
        if let Some(content) = self.fetch_content(&metadata.doc_token).await {
            let (revision, computed) = self.capture(metadata, &content);
            if let Some(revision) = revision {
                event = event.with_metadata("revision", revision.into());
            }
            if let Some(computed) = &computed {
                event = event
                    .with_metadata("diff_summary", computed.summary.text.clone().into())
                    .with_metadata("percent_changed", computed.summary.percent_changed.into());
            }
            diff = computed;
        }

        if should_notify(result.change_type) && !tracked.notify_target.is_empty() {
            let message = notification_message(metadata, result, diff.as_ref());
            match self.deps.notify.notify(&tracked.notify_target, &message).await {
                Ok(message_id) => {
                    event.notification_sent = true;
                    acquire_lock(&self.stats).record_notification(self.deps.clock.now_ms());
                    debug!(doc_token = %event.doc_token, message_id = %message_id, "Notification sent");
                },
                Err(e) => {
                    warn!(doc_token = %event.doc_token, error = %e, "Notification failed");
                },
            }
        }

        if let Err(e) = self.deps.event_store.insert_event(&self.owner_id, &event) {
            warn!(doc_token = %event.doc_token, error = %e, "Failed to record change event");
        }

        let results = self.deps.rules.evaluate_change_rules(event.clone()).await;
        if !results.is_empty() {
            debug!(
                doc_token = %event.doc_token,
                rules = results.len(),
                failed = results.iter().filter(|r| r.error.is_some()).count(),
                "Rules evaluated"
            );
        }

        info!(
            doc_token = %event.doc_token,
            change_type = %event.change_type,
            notification_sent = event.notification_sent,
            "Change processed"
        );
        event
    }
}

/// A new document only establishes a baseline; it gets no default notification.
const fn should_notify(change_type: ChangeType) -> bool {
    matches!(change_type, ChangeType::TimeUpdated | ChangeType::UserChanged)
}

fn notification_message(
    metadata: &DocMetadata,
    result: &ChangeDetectionResult,
    diff: Option<&DiffResult>,
) -> String {
    let title = if metadata.title.is_empty() {
        metadata.doc_token.as_str()
    } else {
        metadata.title.as_str()
    };
    let header = format!(
        "{title} ({}) {} by {}",
        metadata.doc_token, result.change_type, result.current_user
    );
    match diff {
        Some(diff) => format!("{header}\n{}", format_diff_for_card(diff)),
        None => header,
    }
}
