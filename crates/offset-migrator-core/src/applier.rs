//! Writes proposed offsets that differ from what was last written.
//!
//! Re-committing an unchanged offset is harmless for the broker, so the
//! applier uses [`OffsetMemory`] to skip those entries. In steady state with
//! no new consumption a loop performs no writes at all.

use tracing::{error, info};

use crate::admin::{GroupOffsets, OffsetAdmin};
use crate::error::AdminError;
use crate::memory::OffsetMemory;

/// Result of applying a proposed offset map for one group.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Every proposed offset had already been written.
    Unchanged,
    /// This many entries were written in one atomic call.
    Written(usize),
    /// The write failed; memory was left untouched so the next loop retries.
    Failed(AdminError),
}

impl ApplyOutcome {
    /// Number of entries written (0 unless [`ApplyOutcome::Written`]).
    #[must_use]
    pub fn written(&self) -> usize {
        match self {
            Self::Written(count) => *count,
            Self::Unchanged | Self::Failed(_) => 0,
        }
    }
}

/// Applies offset deltas through an [`OffsetAdmin`], owning the run's memory.
#[derive(Debug, Default)]
pub struct OffsetApplier {
    memory: OffsetMemory,
}

impl OffsetApplier {
    /// Create an applier with an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an applier that starts from an existing memory.
    #[must_use]
    pub fn with_memory(memory: OffsetMemory) -> Self {
        Self { memory }
    }

    /// Offsets confirmed written so far.
    #[must_use]
    pub fn memory(&self) -> &OffsetMemory {
        &self.memory
    }

    /// The subset of `proposed` that differs from memory or was never written.
    #[must_use]
    pub fn pending(&self, group: &str, proposed: &GroupOffsets) -> GroupOffsets {
        proposed
            .iter()
            .filter(|(tp, offset)| self.memory.get(group, tp) != Some(**offset))
            .map(|(tp, offset)| (tp.clone(), *offset))
            .collect()
    }

    /// Write the changed part of `proposed` for `group`.
    ///
    /// The broker is not contacted when nothing changed.
    pub async fn apply(
        &mut self,
        admin: &dyn OffsetAdmin,
        group: &str,
        proposed: &GroupOffsets,
    ) -> ApplyOutcome {
        let changes = self.pending(group, proposed);
        if changes.is_empty() {
            return ApplyOutcome::Unchanged;
        }

        info!(group, entries = changes.len(), "altering consumer group offsets");
        for (tp, offset) in &changes {
            info!(
                group,
                partition = %tp,
                offset,
                previous = ?self.memory.get(group, tp),
                "offset change"
            );
        }

        if let Err(e) = admin.write_committed_offsets(group, &changes).await {
            error!(group, error = %e, "failed to alter consumer group offsets");
            return ApplyOutcome::Failed(e);
        }

        let written = changes.len();
        for (tp, offset) in changes {
            self.memory.record(group, tp, offset);
        }
        ApplyOutcome::Written(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::TopicPartition;
    use crate::testing::MockAdmin;

    fn offsets(entries: &[(&str, i32, i64)]) -> GroupOffsets {
        entries
            .iter()
            .map(|(t, p, o)| (TopicPartition::new(*t, *p), *o))
            .collect()
    }

    #[tokio::test]
    async fn test_first_apply_writes_everything() {
        let admin = MockAdmin::new();
        let mut applier = OffsetApplier::new();
        let proposed = offsets(&[("archived.us", 0, 100), ("archived.eu", 0, 50)]);

        let outcome = applier.apply(&admin, "migrated", &proposed).await;

        assert_eq!(outcome.written(), 2);
        assert_eq!(admin.writes().len(), 1);
        assert_eq!(admin.writes()[0].offsets, proposed);
        assert_eq!(applier.memory().len(), 2);
    }

    #[tokio::test]
    async fn test_second_apply_is_a_no_op() {
        let admin = MockAdmin::new();
        let mut applier = OffsetApplier::new();
        let proposed = offsets(&[("archived.us", 0, 100)]);

        applier.apply(&admin, "migrated", &proposed).await;
        let outcome = applier.apply(&admin, "migrated", &proposed).await;

        assert!(matches!(outcome, ApplyOutcome::Unchanged));
        assert_eq!(outcome.written(), 0);
        assert_eq!(admin.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_only_changed_entries_are_written() {
        let admin = MockAdmin::new();
        let mut applier = OffsetApplier::new();

        applier
            .apply(&admin, "g", &offsets(&[("a", 0, 100), ("b", 0, 50)]))
            .await;
        let outcome = applier
            .apply(&admin, "g", &offsets(&[("a", 0, 150), ("b", 0, 50)]))
            .await;

        assert_eq!(outcome.written(), 1);
        let writes = admin.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].offsets, offsets(&[("a", 0, 150)]));
    }

    #[tokio::test]
    async fn test_memory_is_per_group() {
        let admin = MockAdmin::new();
        let mut applier = OffsetApplier::new();
        let proposed = offsets(&[("a", 0, 1)]);

        applier.apply(&admin, "g1", &proposed).await;
        let outcome = applier.apply(&admin, "g2", &proposed).await;

        assert_eq!(outcome.written(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let admin = MockAdmin::new();
        admin.fail_writes_for("g");
        let mut applier = OffsetApplier::new();
        let proposed = offsets(&[("a", 0, 10)]);

        let outcome = applier.apply(&admin, "g", &proposed).await;
        assert!(matches!(outcome, ApplyOutcome::Failed(_)));
        assert!(applier.memory().is_empty());

        // Retried once the broker recovers.
        admin.clear_failures();
        let outcome = applier.apply(&admin, "g", &proposed).await;
        assert_eq!(outcome.written(), 1);
    }

    #[tokio::test]
    async fn test_offset_moving_backwards_is_written() {
        let admin = MockAdmin::new();
        let mut applier = OffsetApplier::new();

        applier.apply(&admin, "g", &offsets(&[("a", 0, 100)])).await;
        let outcome = applier.apply(&admin, "g", &offsets(&[("a", 0, 40)])).await;

        assert_eq!(outcome.written(), 1);
        assert_eq!(
            applier.memory().get("g", &TopicPartition::new("a", 0)),
            Some(40)
        );
    }

    #[test]
    fn test_pending_with_prefilled_memory() {
        let mut memory = OffsetMemory::new();
        memory.record("g", TopicPartition::new("a", 0), 5);
        let applier = OffsetApplier::with_memory(memory);

        let pending = applier.pending("g", &offsets(&[("a", 0, 5), ("a", 1, 5)]));
        assert_eq!(pending, offsets(&[("a", 1, 5)]));
    }
}
