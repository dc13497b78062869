//! Business logic services.
//!
//! Services orchestrate connectors and storage backends:
//!
//! - [`ChangeDetector`]: pure classification of metadata deltas
//! - [`DocSnapshotService`]: compressed content history with retention
//! - [`RulesEngine`]: rule CRUD and action execution
//! - [`RulesIntegration`]: sync or queued hand-off from the poller to the engine
//! - [`DocPoller`]: registry, poll cycles, and the per-change pipeline

mod detector;
mod poller;
mod rules;
mod rules_queue;
mod snapshot;

pub use detector::{
    ChangeDetector, DEFAULT_DEBOUNCE_WINDOW_MS, DEFAULT_MIN_NOTIFY_INTERVAL_MS, DetectorOptions,
    classify,
};
pub use poller::{
    DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_POLLS, DEFAULT_MAX_ERRORS_PER_HOUR,
    DEFAULT_MAX_RETRIES, DEFAULT_MIN_SUCCESS_RATE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RETRY_BASE_DELAY_MS, DocPoller, HealthStatus, PollCycleReport, PollStats, PollStatus,
    PollerDeps, PollerHealth, PollerMetrics, PollerOptions,
};
pub use rules::{DEFAULT_TASK_TEMPLATE, RulesEngine};
pub use rules_queue::{
    DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_SYNC_TIMEOUT_MS, RuleQueueOptions,
    RuleQueueStats, RulesIntegration,
};
pub use snapshot::{
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_MAX_DOC_SIZE_BYTES, DEFAULT_MAX_SNAPSHOTS_PER_DOC,
    DEFAULT_MIN_COMPRESSION_RATIO, DEFAULT_RETENTION_DAYS, DocSnapshotService, SkipReason,
    SnapshotOptions, SnapshotPolicy, content_hash,
};
