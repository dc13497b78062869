//! Operation metrics for the `SQLite` store.

use std::time::Instant;

/// Records a counter and a latency histogram for one store operation.
///
/// # Arguments
///
/// * `operation` - Operation name (e.g., `insert_snapshot`, `list_rules`)
/// * `start` - Operation start time from `Instant::now()`
/// * `success` - Whether the operation succeeded
pub fn record_operation_metrics(operation: &'static str, start: Instant, success: bool) {
    let status = if success { "success" } else { "error" };
    metrics::counter!(
        "docwatch_store_operations_total",
        "backend" => "sqlite",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "docwatch_store_operation_duration_ms",
        "backend" => "sqlite",
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
