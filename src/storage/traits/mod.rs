//! Storage backend traits.
//!
//! Every call is scoped by an owner ID so one database can hold several users'
//! documents without cross-talk. Traits are synchronous; every operation is
//! a short local read or write.

mod event;
mod rule;
mod snapshot;
mod tracked;

pub use event::ChangeEventStore;
pub use rule::RuleStore;
pub use snapshot::SnapshotStore;
pub use tracked::TrackedDocumentStore;

/// Reachability probe shared by all stores.
pub trait StoreHealth: Send + Sync {
    /// Returns true if the backing store answers a trivial query.
    fn health_check(&self) -> bool;
}
