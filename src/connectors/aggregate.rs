//! Batched change summaries for `aggregate` rule actions.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{AggregateSink, NotifySink};
use crate::Result;
use crate::models::ChangeEvent;
use crate::sync::acquire_lock;

/// Maximum change lines in one summary message.
pub const SUMMARY_MAX_LINES: usize = 20;

/// Per-target buffer of change events, flushed as one summary per target.
pub struct AggregationBuffer {
    notify: Arc<dyn NotifySink>,
    pending: Mutex<BTreeMap<String, Vec<ChangeEvent>>>,
}

impl AggregationBuffer {
    /// Creates an empty buffer that flushes through `notify`.
    #[must_use]
    pub fn new(notify: Arc<dyn NotifySink>) -> Self {
        Self {
            notify,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of buffered events across all targets.
    #[must_use]
    pub fn pending(&self) -> usize {
        acquire_lock(&self.pending).values().map(Vec::len).sum()
    }

    /// Sends one summary per target and returns how many were delivered.
    ///
    /// Events for a target whose summary fails stay buffered for the next flush.
    pub async fn flush(&self) -> usize {
        let batches = std::mem::take(&mut *acquire_lock(&self.pending));
        let mut sent = 0;

        for (target, events) in batches {
            let message = format_summary(&events);
            match self.notify.notify(&target, &message).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    tracing::warn!(target_chat = %target, error = %e, "Aggregate summary failed");
                    let mut pending = acquire_lock(&self.pending);
                    let slot = pending.entry(target).or_default();
                    let newer = std::mem::replace(slot, events);
                    slot.extend(newer);
                },
            }
        }

        if sent > 0 {
            tracing::debug!(summaries = sent, "Flushed aggregate summaries");
        }
        sent
    }

    /// Flushes every `interval` until `shutdown` flips to true, then flushes once more.
    pub fn spawn_periodic_flush(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        buffer.flush().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            buffer.flush().await;
        })
    }
}

impl std::fmt::Debug for AggregationBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationBuffer")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AggregateSink for AggregationBuffer {
    async fn add(&self, target: &str, event: &ChangeEvent) -> Result<()> {
        acquire_lock(&self.pending)
            .entry(target.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }
}

/// Renders a plain-text summary of buffered changes.
#[must_use]
pub fn format_summary(events: &[ChangeEvent]) -> String {
    let mut out = format!(
        "{} document change{}:",
        events.len(),
        if events.len() == 1 { "" } else { "s" }
    );
    for event in events.iter().take(SUMMARY_MAX_LINES) {
        let name = event.title().filter(|t| !t.is_empty()).unwrap_or(event.doc_token.as_str());
        let user = event.new_modified_user.as_deref().unwrap_or("unknown");
        let _ = write!(out, "\n- {name}: {} by {user}", event.change_type);
    }
    if events.len() > SUMMARY_MAX_LINES {
        let _ = write!(out, "\n... and {} more", events.len() - SUMMARY_MAX_LINES);
    }
    out
}
