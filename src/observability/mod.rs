//! Observability: metrics and tracing.
//!
//! - **Metrics**: counters and gauges via the `metrics` facade
//! - **Tracing**: ioctl spans and structured events via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `drm_prime_exports` | Counter | `reused` | Successful handle-to-descriptor exports |
//! | `drm_prime_imports` | Counter | `reused` | Successful descriptor-to-handle imports |
//! | `drm_prime_failures` | Counter | `op`, `errno` | Failed PRIME ioctls |
//! | `drm_prime_table_entries` | Gauge | | Live handle-mapping entries, all files |
//!
//! Nothing is recorded unless the application installs a recorder.

mod metrics;
mod tracing_support;

pub use metrics::{
    init_metrics, record_export, record_failure, record_import, record_table_entries_added,
    record_table_entries_removed,
};
pub use tracing_support::{instrument_ioctl, span_ioctl, trace_ioctl_error};
