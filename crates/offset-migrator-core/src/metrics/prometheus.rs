//! Prometheus metrics for the offset migrator.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Migration metrics collection.
///
/// Cloning is cheap: every counter shares its value with the original.
#[derive(Clone)]
pub struct MigrationMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Completed loop iterations.
    pub loops_total: IntCounter,

    /// Set runs by set name and outcome.
    pub set_runs_total: IntCounterVec,

    /// Offsets written to the broker by set.
    pub offsets_written_total: IntCounterVec,

    /// Failed offset writes by set.
    pub write_failures_total: IntCounterVec,

    /// Names that could not be rendered by set.
    pub template_errors_total: IntCounterVec,
}

impl MigrationMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let loops_total = IntCounter::new(
            "offset_migrator_loops_total",
            "Total number of completed migration loop iterations",
        )
        .expect("metric creation should succeed");

        let set_runs_total = IntCounterVec::new(
            Opts::new(
                "offset_migrator_set_runs_total",
                "Total number of migration set runs by outcome",
            ),
            &["set", "outcome"],
        )
        .expect("metric creation should succeed");

        let offsets_written_total = IntCounterVec::new(
            Opts::new(
                "offset_migrator_offsets_written_total",
                "Total number of committed offsets written",
            ),
            &["set"],
        )
        .expect("metric creation should succeed");

        let write_failures_total = IntCounterVec::new(
            Opts::new(
                "offset_migrator_write_failures_total",
                "Total number of failed offset writes",
            ),
            &["set"],
        )
        .expect("metric creation should succeed");

        let template_errors_total = IntCounterVec::new(
            Opts::new(
                "offset_migrator_template_errors_total",
                "Total number of names that failed to render",
            ),
            &["set"],
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(loops_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(set_runs_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(offsets_written_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(write_failures_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(template_errors_total.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            loops_total,
            set_runs_total,
            offsets_written_total,
            write_failures_total,
            template_errors_total,
        }
    }

    /// Record a finished loop iteration.
    pub fn record_loop(&self) {
        self.loops_total.inc();
    }

    /// Record the outcome of one set run.
    pub fn record_set_run(&self, set: &str, outcome: &str) {
        self.set_runs_total.with_label_values(&[set, outcome]).inc();
    }

    /// Record offsets written for a set.
    pub fn record_offsets_written(&self, set: &str, count: usize) {
        self.offsets_written_total
            .with_label_values(&[set])
            .inc_by(count as u64);
    }

    /// Record failed writes for a set.
    pub fn record_write_failures(&self, set: &str, count: usize) {
        self.write_failures_total
            .with_label_values(&[set])
            .inc_by(count as u64);
    }

    /// Record template errors for a set.
    pub fn record_template_errors(&self, set: &str, count: usize) {
        self.template_errors_total
            .with_label_values(&[set])
            .inc_by(count as u64);
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for MigrationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MigrationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationMetrics")
            .field("loops_total", &self.loops_total.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = MigrationMetrics::new();
        assert!(metrics.encode().is_ok());
    }

    #[test]
    fn test_record_loop() {
        let metrics = MigrationMetrics::new();
        metrics.record_loop();
        metrics.record_loop();

        assert_eq!(metrics.loops_total.get(), 2);
        let output = metrics.encode().unwrap();
        assert!(output.contains("offset_migrator_loops_total 2"));
    }

    #[test]
    fn test_record_set_run() {
        let metrics = MigrationMetrics::new();
        metrics.record_set_run("orders", "completed");
        metrics.record_set_run("orders", "failed");

        let output = metrics.encode().unwrap();
        assert!(output.contains("offset_migrator_set_runs_total"));
        assert!(output.contains(r#"outcome="failed""#));
    }

    #[test]
    fn test_per_set_counters() {
        let metrics = MigrationMetrics::new();
        metrics.record_offsets_written("orders", 3);
        metrics.record_write_failures("orders", 1);
        metrics.record_template_errors("orders", 2);

        assert_eq!(
            metrics
                .offsets_written_total
                .with_label_values(&["orders"])
                .get(),
            3
        );
        let output = metrics.encode().unwrap();
        assert!(output.contains("offset_migrator_write_failures_total"));
        assert!(output.contains("offset_migrator_template_errors_total"));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MigrationMetrics::new();
        let clone = metrics.clone();
        clone.record_loop();
        assert_eq!(metrics.loops_total.get(), 1);
    }
}
