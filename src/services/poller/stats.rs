//! Rolling-window poll statistics and the health verdict derived from them.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Outcome of one document poll, as counted by [`PollStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Metadata was fetched.
    Success,
    /// Retries were exhausted or the fetch timed out.
    Failed,
    /// The source reported the document as gone or forbidden.
    Missing,
}

impl PollStatus {
    /// Returns the status as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Missing => "missing",
        }
    }
}

/// Timestamps of recent polls and notifications within a sliding window.
///
/// Time is supplied by the caller in milliseconds so the window follows the
/// poller's injected clock.
#[derive(Debug)]
pub struct PollStats {
    window_ms: i64,
    polls: VecDeque<(i64, PollStatus)>,
    notifications: VecDeque<i64>,
    last_poll_duration_ms: u64,
    last_poll_at: Option<i64>,
}

impl PollStats {
    /// Creates empty stats over `window_ms`.
    #[must_use]
    pub const fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            polls: VecDeque::new(),
            notifications: VecDeque::new(),
            last_poll_duration_ms: 0,
            last_poll_at: None,
        }
    }

    /// Records one document poll.
    pub fn record_poll(&mut self, now_ms: i64, status: PollStatus) {
        self.evict_expired(now_ms);
        self.polls.push_back((now_ms, status));
    }

    /// Records one delivered notification.
    pub fn record_notification(&mut self, now_ms: i64) {
        self.evict_expired(now_ms);
        self.notifications.push_back(now_ms);
    }

    /// Records the end of a poll cycle.
    pub const fn record_cycle(&mut self, now_ms: i64, duration_ms: u64) {
        self.last_poll_duration_ms = duration_ms;
        self.last_poll_at = Some(now_ms);
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.polls.clear();
        self.notifications.clear();
        self.last_poll_duration_ms = 0;
        self.last_poll_at = None;
    }

    /// Removes entries older than the window.
    pub fn evict_expired(&mut self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.polls.front().is_some_and(|(at, _)| *at <= cutoff) {
            self.polls.pop_front();
        }
        while self.notifications.front().is_some_and(|at| *at <= cutoff) {
            self.notifications.pop_front();
        }
    }

    fn count(&self, status: PollStatus) -> usize {
        self.polls.iter().filter(|(_, s)| *s == status).count()
    }

    /// Builds a snapshot of the window at `now_ms`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&mut self, now_ms: i64, docs_tracked: usize, running: bool) -> PollerMetrics {
        self.evict_expired(now_ms);
        let polls = self.polls.len();
        let successes = self.count(PollStatus::Success);
        let success_rate = if polls == 0 {
            1.0
        } else {
            successes as f64 / polls as f64
        };

        PollerMetrics {
            docs_tracked,
            running,
            success_rate,
            last_poll_duration_ms: self.last_poll_duration_ms,
            last_poll_at: self.last_poll_at,
            polls_in_last_hour: polls,
            errors_in_last_hour: self.count(PollStatus::Failed),
            missing_in_last_hour: self.count(PollStatus::Missing),
            notifications_in_last_hour: self.notifications.len(),
        }
    }
}

/// Poller metrics over the stats window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerMetrics {
    /// Documents in the registry.
    pub docs_tracked: usize,
    /// Whether the poll loop is running.
    pub running: bool,
    /// Successful polls divided by all polls; `1.0` with no polls.
    pub success_rate: f64,
    /// Duration of the last completed cycle.
    pub last_poll_duration_ms: u64,
    /// When the last cycle completed (ms since epoch).
    pub last_poll_at: Option<i64>,
    /// Document polls in the window.
    pub polls_in_last_hour: usize,
    /// Polls that exhausted their retries.
    pub errors_in_last_hour: usize,
    /// Polls where the source reported the document as missing.
    pub missing_in_last_hour: usize,
    /// Default notifications delivered.
    pub notifications_in_last_hour: usize,
}

/// Health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Polling works.
    Healthy,
    /// Polls fail often enough to need attention.
    Degraded,
}

/// Health verdict with its reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerHealth {
    /// Verdict.
    pub status: HealthStatus,
    /// Human-readable reason.
    pub reason: String,
    /// Metrics the verdict was derived from.
    pub metrics: PollerMetrics,
}

impl PollerHealth {
    /// Derives a verdict from `metrics`.
    ///
    /// Degraded when the success rate drops below `min_success_rate` or the
    /// window holds at least `max_errors` failed polls.
    #[must_use]
    pub fn evaluate(metrics: PollerMetrics, min_success_rate: f64, max_errors: usize) -> Self {
        let (status, reason) = if metrics.polls_in_last_hour == 0 {
            (HealthStatus::Healthy, "no polls in the last hour".to_string())
        } else if metrics.success_rate < min_success_rate {
            (
                HealthStatus::Degraded,
                format!(
                    "success rate {:.1}% is below {:.1}%",
                    metrics.success_rate * 100.0,
                    min_success_rate * 100.0
                ),
            )
        } else if metrics.errors_in_last_hour >= max_errors {
            (
                HealthStatus::Degraded,
                format!("{} failed polls in the last hour", metrics.errors_in_last_hour),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!(
                    "success rate {:.1}% over {} polls",
                    metrics.success_rate * 100.0,
                    metrics.polls_in_last_hour
                ),
            )
        };

        Self {
            status,
            reason,
            metrics,
        }
    }

    /// Returns true when healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
