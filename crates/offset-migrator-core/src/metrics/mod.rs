//! Metrics collection for the offset migrator.
//!
//! Counts loop iterations, per-set outcomes and offset writes so a
//! continuous sync can be watched from Prometheus.

pub mod prometheus;

pub use prometheus::MigrationMetrics;
