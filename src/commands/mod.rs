//! Command layer.
//!
//! - `app.rs`: wires stores, connectors, and services from configuration
//! - `surface.rs`: track, rule, snapshot, and status operations for front ends

mod app;
mod surface;

pub use app::{App, Backends, DEFAULT_SHUTDOWN_TIMEOUT_MS, SeedReport};
pub use surface::{CommandSurface, DEFAULT_LIST_LIMIT};
