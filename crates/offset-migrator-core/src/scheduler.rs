//! Loop driver: runs every set in order, then sleeps, until the loop count
//! is exhausted.

use tracing::{error, info};

use crate::admin::OffsetAdmin;
use crate::applier::OffsetApplier;
use crate::metrics::MigrationMetrics;
use crate::migration::{LoopCount, MigrationConfig};
use crate::processor::{SetOutcome, SetProcessor};

/// Summary of one loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    /// Iteration counter, starting at 1.
    pub iteration: u64,
    /// Sets that ran to an outcome (including skips).
    pub sets_ok: usize,
    /// Sets aborted by invalid rules or an admin failure.
    pub sets_failed: usize,
    /// Offsets written across all sets.
    pub offsets_written: usize,
}

/// Owns the run's configuration and offset memory.
pub struct Scheduler {
    config: MigrationConfig,
    processor: SetProcessor,
    applier: OffsetApplier,
    metrics: Option<MigrationMetrics>,
    completed: u64,
}

impl Scheduler {
    /// Create a scheduler with an empty offset memory.
    #[must_use]
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            processor: SetProcessor::new(config.require_stable),
            config,
            applier: OffsetApplier::new(),
            metrics: None,
            completed: 0,
        }
    }

    /// Record outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MigrationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The offset applier and its memory.
    #[must_use]
    pub fn applier(&self) -> &OffsetApplier {
        &self.applier
    }

    /// Iterations completed so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Whether the configured loop count has been reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.config.loops.is_exhausted(self.completed)
    }

    /// Run every set once, in configuration order.
    ///
    /// A set that fails is logged and does not stop the others.
    pub async fn run_once(&mut self, admin: &dyn OffsetAdmin) -> LoopReport {
        let mut report = LoopReport {
            iteration: self.completed + 1,
            ..LoopReport::default()
        };
        info!(iteration = report.iteration, loops = %self.config.loops, "starting migration loop");

        for set in &self.config.sets {
            match self.processor.run(set, admin, &mut self.applier).await {
                Ok(outcome) => {
                    report.sets_ok += 1;
                    report.offsets_written += outcome.offsets_written();
                    if let Some(metrics) = &self.metrics {
                        record_outcome(metrics, &set.name, &outcome);
                    }
                }
                Err(e) => {
                    error!(set = %e.set(), error = %e, "migration set failed");
                    report.sets_failed += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_set_run(&set.name, "failed");
                    }
                }
            }
        }

        self.completed += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_loop();
        }
        info!(
            iteration = report.iteration,
            sets_ok = report.sets_ok,
            sets_failed = report.sets_failed,
            offsets_written = report.offsets_written,
            "migration loop done"
        );
        report
    }

    /// Run loops until the loop count is exhausted, sleeping for the
    /// configured interval between iterations.
    ///
    /// Never returns when the loop count is unbounded.
    pub async fn run(&mut self, admin: &dyn OffsetAdmin) -> Vec<LoopReport> {
        let mut reports = Vec::new();
        while !self.is_finished() {
            let report = self.run_once(admin).await;
            if matches!(self.config.loops, LoopCount::Bounded(_)) {
                reports.push(report);
            }
            if self.is_finished() {
                break;
            }
            tokio::time::sleep(self.config.interval).await;
        }
        reports
    }
}

fn record_outcome(metrics: &MigrationMetrics, set: &str, outcome: &SetOutcome) {
    metrics.record_set_run(set, outcome.label());
    if let SetOutcome::Completed(report) = outcome {
        metrics.record_offsets_written(set, report.offsets_written);
        metrics.record_write_failures(set, report.write_failures);
        metrics.record_template_errors(set, report.template_errors);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::admin::{GroupOffsets, TopicPartition};
    use crate::migration::MigrationSet;
    use crate::testing::MockAdmin;

    fn offsets(entries: &[(&str, i32, i64)]) -> GroupOffsets {
        entries
            .iter()
            .map(|(t, p, o)| (TopicPartition::new(*t, *p), *o))
            .collect()
    }

    fn config(sets: Vec<MigrationSet>, loops: LoopCount) -> MigrationConfig {
        MigrationConfig {
            loops,
            interval: Duration::from_millis(1),
            ..MigrationConfig::with_sets(sets)
        }
    }

    #[tokio::test]
    async fn test_zero_loops_runs_nothing() {
        let admin = MockAdmin::new();
        admin.fail_listing();
        let set = MigrationSet::new("s", "g", "h").unwrap();
        let mut scheduler = Scheduler::new(config(vec![set], LoopCount::Bounded(0)));

        let reports = scheduler.run(&admin).await;
        assert!(reports.is_empty());
        assert_eq!(scheduler.completed(), 0);
    }

    #[tokio::test]
    async fn test_bounded_loops() {
        let admin = MockAdmin::new();
        admin.set_offsets("g", offsets(&[("t", 0, 1)]));
        let set = MigrationSet::new("s", "g", "h").unwrap();
        let metrics = MigrationMetrics::new();
        let mut scheduler =
            Scheduler::new(config(vec![set], LoopCount::Bounded(3))).with_metrics(metrics.clone());

        let reports = scheduler.run(&admin).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].iteration, 1);
        assert_eq!(reports[0].offsets_written, 1);
        assert_eq!(reports[1].offsets_written, 0);
        assert_eq!(reports[2].offsets_written, 0);
        assert!(scheduler.is_finished());
        assert_eq!(metrics.loops_total.get(), 3);
        assert_eq!(admin.writes_for("h").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_set_does_not_stop_the_next() {
        let admin = MockAdmin::new();
        admin.set_offsets("g", offsets(&[("t", 0, 1)]));
        admin.fail_fetch();
        let failing = MigrationSet::new("first", "g", "h").unwrap();
        let disabled = MigrationSet::new("second", "g", "i").unwrap().disabled();
        let mut scheduler = Scheduler::new(config(vec![failing, disabled], LoopCount::Bounded(1)));

        let report = scheduler.run_once(&admin).await;

        assert_eq!(report.sets_failed, 1);
        assert_eq!(report.sets_ok, 1);
        assert_eq!(scheduler.completed(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_loop_keeps_going() {
        let admin = MockAdmin::new();
        let set = MigrationSet::new("s", "g", "h").unwrap();
        let mut scheduler = Scheduler::new(config(vec![set], LoopCount::Unbounded));

        let run = tokio::time::timeout(Duration::from_millis(50), scheduler.run(&admin)).await;
        assert!(run.is_err());
        assert!(scheduler.completed() > 1);
    }
}
