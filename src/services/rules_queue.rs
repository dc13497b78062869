//! Queueing façade in front of the rules engine.
//!
//! In async mode the poller hands change events to a bounded channel and
//! returns immediately; one background worker drains it in batches. A full
//! queue drops the event with a warning, since polling must never wait on
//! rule delivery. [`RulesIntegration::drain_rule_queue`] is the shutdown and
//! test barrier: it waits for the queue to empty or for its timeout.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::rules::RulesEngine;
use crate::models::{ChangeEvent, RuleExecutionResult};
use crate::sync::acquire_lock;
use crate::{Error, Result};

/// Default bounded queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of events evaluated per worker batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default deadline for synchronous evaluation.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;

/// How change events reach the rules engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleQueueOptions {
    /// `false` skips rule evaluation entirely.
    pub enabled: bool,
    /// Queue events for the background worker instead of evaluating inline.
    pub async_mode: bool,
    /// Deadline for one synchronous evaluation.
    pub timeout_ms: u64,
    /// Maximum events the worker takes per batch.
    pub batch_size: usize,
    /// Queue capacity in async mode.
    pub capacity: usize,
}

impl Default for RuleQueueOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            async_mode: true,
            timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl RuleQueueOptions {
    /// Enables or disables evaluation.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Selects queued or inline evaluation.
    #[must_use]
    pub const fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    /// Sets the synchronous evaluation deadline.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the worker batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Snapshot of the queue's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleQueueStats {
    /// Events queued or being evaluated.
    pub depth: usize,
    /// Whether events are queued rather than evaluated inline.
    pub async_mode: bool,
    /// Whether rule evaluation is enabled.
    pub enabled: bool,
    /// Events evaluated by the worker.
    pub processed: u64,
    /// Events dropped because the queue was full or closed.
    pub dropped: u64,
}

struct QueuedChange {
    engine: Arc<RulesEngine>,
    change: ChangeEvent,
}

#[derive(Default)]
struct QueueState {
    depth: AtomicUsize,
    processed: AtomicU64,
    dropped: AtomicU64,
    idle: Notify,
}

impl QueueState {
    fn finish_one(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let remaining = self.depth.fetch_sub(1, Ordering::SeqCst) - 1;
        record_depth(remaining);
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// Routes change events to the rules engine inline or through a queue.
pub struct RulesIntegration {
    engine: Mutex<Arc<RulesEngine>>,
    options: RuleQueueOptions,
    sender: Mutex<Option<mpsc::Sender<QueuedChange>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<QueueState>,
}

impl RulesIntegration {
    /// Creates the integration and, in async mode, spawns its worker.
    ///
    /// Async mode needs a Tokio runtime; without one the integration falls
    /// back to inline evaluation.
    #[must_use]
    pub fn new(engine: RulesEngine, options: RuleQueueOptions) -> Self {
        let state = Arc::new(QueueState::default());
        let mut options = options;
        let mut sender = None;
        let mut worker = None;

        if options.enabled && options.async_mode {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let (tx, rx) = mpsc::channel(options.capacity.max(1));
                worker = Some(runtime.spawn(run_worker(
                    rx,
                    Arc::clone(&state),
                    options.batch_size.max(1),
                )));
                sender = Some(tx);
            } else {
                warn!("No async runtime available, evaluating rules inline");
                options.async_mode = false;
            }
        }

        Self {
            engine: Mutex::new(Arc::new(engine)),
            options,
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
            state,
        }
    }

    /// Returns the effective options.
    #[must_use]
    pub const fn options(&self) -> &RuleQueueOptions {
        &self.options
    }

    /// Returns the engine currently in scope.
    #[must_use]
    pub fn engine(&self) -> Arc<RulesEngine> {
        Arc::clone(&acquire_lock(&self.engine))
    }

    /// Binds every subsequent evaluation to `user_id`'s rules.
    ///
    /// Events already queued keep the scope they were queued under.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty user ID.
    pub fn initialize_rules_system(&self, user_id: &str) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id must not be empty".to_string()));
        }
        let mut engine = acquire_lock(&self.engine);
        *engine = Arc::new(engine.for_owner(user_id));
        info!(user_id, "Rules system initialized");
        Ok(())
    }

    /// Evaluates or enqueues rules for a change.
    ///
    /// Returns the results in sync mode. Disabled, async, and timed-out
    /// evaluations return an empty list; nothing here ever fails the caller.
    pub async fn evaluate_change_rules(&self, change: ChangeEvent) -> Vec<RuleExecutionResult> {
        if !self.options.enabled {
            return Vec::new();
        }
        let engine = self.engine();

        if self.options.async_mode {
            self.enqueue(QueuedChange { engine, change });
            return Vec::new();
        }

        let timeout = Duration::from_millis(self.options.timeout_ms);
        match tokio::time::timeout(timeout, engine.evaluate_change_against_rules(&change)).await
        {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    doc_token = %change.doc_token,
                    timeout_ms = self.options.timeout_ms,
                    "Rule evaluation timed out"
                );
                Vec::new()
            },
        }
    }

    fn enqueue(&self, item: QueuedChange) {
        let doc_token = item.change.doc_token.clone();
        // Count before sending so the worker can never observe a negative depth.
        let depth = self.state.depth.fetch_add(1, Ordering::SeqCst) + 1;

        let sent = match acquire_lock(&self.sender).as_ref() {
            Some(sender) => sender.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            }),
            None => Err("closed"),
        };

        match sent {
            Ok(()) => {
                record_depth(depth);
                debug!(doc_token = %doc_token, depth, "Change queued for rule evaluation");
            },
            Err(reason) => {
                let remaining = self.state.depth.fetch_sub(1, Ordering::SeqCst) - 1;
                if remaining == 0 {
                    self.state.idle.notify_waiters();
                }
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("docwatch_rule_queue_dropped_total", "reason" => reason)
                    .increment(1);
                warn!(doc_token = %doc_token, reason, "Rule queue rejected change, dropping it");
            },
        }
    }

    /// Current queue statistics.
    #[must_use]
    pub fn get_rule_queue_stats(&self) -> RuleQueueStats {
        RuleQueueStats {
            depth: self.state.depth.load(Ordering::SeqCst),
            async_mode: self.options.async_mode,
            enabled: self.options.enabled,
            processed: self.state.processed.load(Ordering::Relaxed),
            dropped: self.state.dropped.load(Ordering::Relaxed),
        }
    }

    /// Waits until the queue is empty or `timeout` elapses.
    ///
    /// Returns whether the queue emptied. Immediate in sync mode.
    pub async fn drain_rule_queue(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.depth.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let depth = self.state.depth.load(Ordering::SeqCst);
                if depth > 0 {
                    warn!(depth, "Rule queue drain timed out");
                }
                return depth == 0;
            }
        }
    }

    /// Drains the queue, then stops the worker.
    ///
    /// Later events are dropped. Returns whether the queue emptied in time;
    /// if not, the worker is aborted with the backlog unprocessed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let drained = self.drain_rule_queue(timeout).await;
        acquire_lock(&self.sender).take();
        let worker = acquire_lock(&self.worker).take();
        if let Some(worker) = worker {
            if drained {
                let _ = worker.await;
            } else {
                worker.abort();
            }
        }
        drained
    }
}

impl std::fmt::Debug for RulesIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesIntegration")
            .field("options", &self.options)
            .field("stats", &self.get_rule_queue_stats())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<QueuedChange>,
    state: Arc<QueueState>,
    batch_size: usize,
) {
    let mut batch = Vec::with_capacity(batch_size);
    while receiver.recv_many(&mut batch, batch_size).await > 0 {
        debug!(batch = batch.len(), "Evaluating queued changes");
        for item in batch.drain(..) {
            let results = item
                .engine
                .evaluate_change_against_rules(&item.change)
                .await;
            let failed = results.iter().filter(|r| r.error.is_some()).count();
            if failed > 0 {
                warn!(
                    doc_token = %item.change.doc_token,
                    failed,
                    "Queued rule evaluation had failing actions"
                );
            }
            state.finish_one();
        }
    }
    debug!("Rule queue worker stopped");
}

#[allow(clippy::cast_precision_loss)]
fn record_depth(depth: usize) {
    metrics::gauge!("docwatch_rule_queue_depth").set(depth as f64);
}
