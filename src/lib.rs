//! # Docwatch
//!
//! Watches externally hosted documents for changes by polling their metadata,
//! and reacts to confirmed changes through a user-configurable rules engine.
//!
//! ## Pipeline
//!
//! ```text
//! DocPoller ──fetch metadata──▶ ChangeDetector ──changed──▶ DocSnapshotService
//!                                                              │
//!                                                              ▼
//!          RulesIntegration ◀── ChangeEvent ◀── SemanticDiffEngine
//!                 │
//!                 ▼
//!           RulesEngine ──▶ notify / webhook / create_task / aggregate
//! ```
//!
//! ## Features
//!
//! - Bounded-concurrency polling with per-fetch timeout and retry/backoff
//! - Change classification with debounce and clock-skew protection
//! - zstd-compressed content snapshots with compression-ratio policy and retention
//! - Line- and block-level semantic diffs
//! - Typed rule conditions/actions with synchronous or queued evaluation
//!
//! ## Example
//!
//! ```rust,ignore
//! use docwatch::{App, DocwatchConfig};
//!
//! let app = App::open(DocwatchConfig::load_default()?.with_env_overrides())?;
//! app.seed()?;
//! app.surface().track("doccnAbc", "docx", "oc_team")?;
//! let report = app.poll_once().await;
//! println!("{} changed", report.changed);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

use thiserror::Error as ThisError;

pub mod clock;
pub mod commands;
pub mod config;
pub mod connectors;
pub mod diff;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;
mod sync;
pub mod webhooks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{App, CommandSurface};
pub use config::DocwatchConfig;
pub use diff::{compute_diff, format_diff_for_card};
pub use models::{
    ChangeDetectionResult, ChangeEvent, ChangeRule, ChangeType, DiffResult, DocMetadata, DocType,
    DocumentSnapshot, RuleAction, RuleCondition, RuleExecutionResult, TrackedDocument,
};
pub use services::{
    ChangeDetector, DocPoller, DocSnapshotService, PollCycleReport, PollerHealth, PollerMetrics,
    RulesEngine, RulesIntegration,
};

/// Error type for docwatch operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty document token, unknown document type, malformed config |
/// | `InvalidRule` | Unknown condition/action kind, missing action target, bad hour window |
/// | `NotTracked` | Stopping or querying a document that is not being watched |
/// | `OperationFailed` | Store, HTTP, compression, or I/O failures |
/// | `Timeout` | A fetch, sink call, or queue drain exceeded its deadline |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A rule failed validation.
    ///
    /// The message carries the specific reason so the command layer can show it.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// The document token is not tracked.
    #[error("not tracked: {0}")]
    NotTracked(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` queries fail
    /// - HTTP requests to the document source or a sink fail
    /// - Compression or decompression fails
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A bounded operation ran out of time.
    #[error("operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Milliseconds waited before giving up.
        elapsed_ms: u64,
    },
}

impl Error {
    /// Shorthand for [`Error::OperationFailed`].
    pub fn failed(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns `true` for failures worth retrying (network, store, timeouts).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::OperationFailed { .. } | Self::Timeout { .. })
    }

    /// Renders the message shown to end users by the command layer.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotTracked(token) => format!("Document {token} is not tracked"),
            Self::InvalidRule(reason) => format!("Invalid rule: {reason}"),
            Self::InvalidInput(reason) => format!("Invalid request: {reason}"),
            Self::OperationFailed { .. } | Self::Timeout { .. } => {
                "The document service is temporarily unavailable, please try again later"
                    .to_string()
            },
        }
    }
}

/// Result type alias for docwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts a millisecond duration to `u64`, saturating.
#[must_use]
pub fn duration_to_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
