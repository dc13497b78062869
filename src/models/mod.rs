//! Data models for docwatch.
//!
//! This module contains the core data structures passed between the poller,
//! detector, snapshot service, diff engine, and rules engine.

mod change;
mod diff;
mod document;
mod rule;
mod snapshot;

pub use change::{ChangeDetectionResult, ChangeEvent, ChangeType};
pub use diff::{Block, BlockDiff, BlockKind, DiffKind, DiffResult, DiffSummary, LineDiff};
pub use document::{DocMetadata, DocType, TrackedDocument};
pub use rule::{
    ChangeRule, HourWindow, RawAction, RawCondition, RuleAction, RuleCondition,
    RuleExecutionResult, RuleUpdate,
};
pub use snapshot::{DocumentSnapshot, SnapshotStats};
