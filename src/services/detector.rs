//! Change classification and debounce.
//!
//! The detector compares freshly fetched [`DocMetadata`] against the poller's
//! [`TrackedDocument`] and decides whether anything changed and whether the
//! change falls inside the debounce window.
//!
//! # Rules
//!
//! | Previous state | Condition | Result |
//! |----------------|-----------|--------|
//! | none / no baseline | - | `new_document`, never debounced |
//! | present | user differs | `user_changed` (whatever the time did) |
//! | present | time moved forward, same user | `time_updated` |
//! | present | time moved back, same user | no change (clock skew) |
//! | present | same time, same user | no change |
//!
//! A detected change is debounced when `now - last_notification_time < window`.
//! At exactly the window boundary it is not debounced.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::models::{ChangeDetectionResult, ChangeType, DocMetadata, TrackedDocument};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE_WINDOW_MS: i64 = 5_000;

/// Default minimum interval for [`ChangeDetector::should_notify_again`].
pub const DEFAULT_MIN_NOTIFY_INTERVAL_MS: i64 = 5_000;

/// Detector options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorOptions {
    /// Minimum time between notifications for one document.
    pub debounce_window_ms: i64,
    /// Emit a debug event per comparison.
    pub enable_logging: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            enable_logging: true,
        }
    }
}

impl DetectorOptions {
    /// Sets the debounce window.
    #[must_use]
    pub const fn with_debounce_window_ms(mut self, window_ms: i64) -> Self {
        self.debounce_window_ms = window_ms;
        self
    }

    /// Enables or disables per-comparison logging.
    #[must_use]
    pub const fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }
}

/// Stateless change detector with an injected clock.
#[derive(Clone)]
pub struct ChangeDetector {
    options: DetectorOptions,
    clock: Arc<dyn Clock>,
}

impl ChangeDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new(options: DetectorOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &DetectorOptions {
        &self.options
    }

    /// Classifies `current` against `previous` at the clock's current time.
    #[must_use]
    pub fn detect(
        &self,
        current: &DocMetadata,
        previous: Option<&TrackedDocument>,
    ) -> ChangeDetectionResult {
        let result = classify(
            current,
            previous,
            self.options.debounce_window_ms,
            self.clock.now_ms(),
        );
        if self.options.enable_logging {
            debug!(
                doc_token = %current.doc_token,
                change_type = %result.change_type,
                has_changed = result.has_changed,
                debounced = result.debounced,
                reason = %result.reason,
                "Change detection"
            );
        }
        result
    }

    /// Returns true if at least `min_interval_ms` elapsed since the last notification.
    ///
    /// A document that has never been notified always passes.
    #[must_use]
    pub fn should_notify_again(
        &self,
        last_notification_time: Option<i64>,
        min_interval_ms: i64,
    ) -> bool {
        last_notification_time
            .is_none_or(|last| self.clock.now_ms().saturating_sub(last) >= min_interval_ms)
    }

    /// Builds the next tracked state after a confirmed change.
    ///
    /// This is the only place `last_notification_time` advances.
    #[must_use]
    pub fn create_updated_tracked_state(
        &self,
        previous: &TrackedDocument,
        current: &DocMetadata,
    ) -> TrackedDocument {
        TrackedDocument {
            doc_token: previous.doc_token.clone(),
            doc_type: previous.doc_type,
            notify_target: previous.notify_target.clone(),
            last_known_user: Some(current.last_modified_user.clone()),
            last_known_modified_time: Some(current.last_modified_time),
            last_notification_time: Some(self.clock.now_ms()),
        }
    }
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Pure classification at an explicit time.
#[must_use]
pub fn classify(
    current: &DocMetadata,
    previous: Option<&TrackedDocument>,
    debounce_window_ms: i64,
    now_ms: i64,
) -> ChangeDetectionResult {
    let base = ChangeDetectionResult {
        has_changed: false,
        change_type: ChangeType::None,
        debounced: false,
        previous_user: None,
        previous_time: None,
        current_user: current.last_modified_user.clone(),
        current_time: current.last_modified_time,
        reason: String::new(),
        changed_at: now_ms,
    };

    let Some((previous, previous_time)) =
        previous.and_then(|p| p.last_known_modified_time.map(|t| (p, t)))
    else {
        return ChangeDetectionResult {
            has_changed: true,
            change_type: ChangeType::NewDocument,
            reason: "first observation of document".to_string(),
            ..base
        };
    };

    let base = ChangeDetectionResult {
        previous_user: previous.last_known_user.clone(),
        previous_time: Some(previous_time),
        ..base
    };
    let user_differs =
        previous.last_known_user.as_deref() != Some(current.last_modified_user.as_str());

    // A different user takes precedence over a newer timestamp, so a
    // handover is reported as user_changed even when the time also moved.
    let (change_type, reason) = if user_differs {
        (
            ChangeType::UserChanged,
            format!(
                "modifying user changed from {} to {}",
                previous.last_known_user.as_deref().unwrap_or("unknown"),
                current.last_modified_user
            ),
        )
    } else if current.last_modified_time > previous_time {
        (
            ChangeType::TimeUpdated,
            format!(
                "modified time advanced from {previous_time} to {}",
                current.last_modified_time
            ),
        )
    } else if current.last_modified_time < previous_time {
        return ChangeDetectionResult {
            reason: "modified time moved backwards with the same user, ignoring".to_string(),
            ..base
        };
    } else {
        return ChangeDetectionResult {
            reason: "no change".to_string(),
            ..base
        };
    };

    let debounced = previous
        .last_notification_time
        .is_some_and(|last| now_ms.saturating_sub(last) < debounce_window_ms);

    ChangeDetectionResult {
        has_changed: true,
        change_type,
        debounced,
        reason: if debounced {
            format!("{reason} (debounced)")
        } else {
            reason
        },
        ..base
    }
}
