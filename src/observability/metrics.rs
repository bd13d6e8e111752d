//! Metrics collection using metrics-rs.

use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const EXPORTS: &str = "drm_prime_exports";
const IMPORTS: &str = "drm_prime_imports";
const FAILURES: &str = "drm_prime_failures";
const TABLE_ENTRIES: &str = "drm_prime_table_entries";

/// Initialize metric descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(EXPORTS, Unit::Count, "Handles exported as descriptors");
    metrics::describe_counter!(IMPORTS, Unit::Count, "Descriptors imported as handles");
    metrics::describe_counter!(FAILURES, Unit::Count, "Failed PRIME ioctls");
    metrics::describe_gauge!(TABLE_ENTRIES, Unit::Count, "Live handle-mapping entries");
}

fn reused_label(reused: bool) -> &'static str {
    if reused { "true" } else { "false" }
}

/// Record a successful export.
#[inline]
pub fn record_export(reused: bool) {
    counter!(EXPORTS, "reused" => reused_label(reused)).increment(1);
}

/// Record a successful import.
#[inline]
pub fn record_import(reused: bool) {
    counter!(IMPORTS, "reused" => reused_label(reused)).increment(1);
}

/// Record a failed ioctl with its (negative) errno.
#[inline]
pub fn record_failure(op: &'static str, errno: i32) {
    counter!(FAILURES, "op" => op, "errno" => errno.to_string()).increment(1);
}

/// Record handle-mapping entries added.
#[inline]
pub fn record_table_entries_added(count: usize) {
    gauge!(TABLE_ENTRIES).increment(count as f64);
}

/// Record handle-mapping entries removed.
#[inline]
pub fn record_table_entries_removed(count: usize) {
    gauge!(TABLE_ENTRIES).decrement(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        init_metrics();
        init_metrics();
        assert!(METRICS_INITIALIZED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_record_without_recorder() {
        record_export(true);
        record_import(false);
        record_failure("fd_to_handle", -9);
        record_table_entries_added(2);
        record_table_entries_removed(2);
    }
}
