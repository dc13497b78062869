//! Storage layer.
//!
//! The logical schema has four collections, each scoped by owner:
//! - **Tracked documents**: the poller's registry, written through for restarts
//! - **Snapshots**: compressed content per `(doc_token, revision_number)`
//! - **Rules**: change rules with JSON-encoded condition/action
//! - **Change events**: append-only audit log
//!
//! [`MemoryStore`] and [`SqliteStore`] implement all four traits.

// Dropping the connection guard a few statements early buys nothing here.
#![allow(clippy::significant_drop_tightening)]

pub mod memory;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
mod conformance;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ChangeEventStore, RuleStore, SnapshotStore, StoreHealth, TrackedDocumentStore};
