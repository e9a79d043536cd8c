//! Memory of offsets this process has committed.
//!
//! Lives for one process run and is never persisted: after a restart every
//! current source offset is applied once more. Only the
//! [`OffsetApplier`](crate::applier::OffsetApplier) records entries, and only
//! after the broker confirmed the write.

use std::collections::HashMap;

use crate::admin::TopicPartition;

/// Key of a committed offset: target group, topic and partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OffsetKey {
    /// Target consumer group id.
    pub group: String,
    /// Target topic partition.
    pub partition: TopicPartition,
}

impl OffsetKey {
    /// Create a new key.
    #[must_use]
    pub fn new(group: impl Into<String>, partition: TopicPartition) -> Self {
        Self {
            group: group.into(),
            partition,
        }
    }
}

/// Last offset confirmed written per (group, topic, partition).
#[derive(Debug, Default, Clone)]
pub struct OffsetMemory {
    offsets: HashMap<OffsetKey, i64>,
}

impl OffsetMemory {
    /// Create an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last offset written for a group's topic partition.
    #[must_use]
    pub fn get(&self, group: &str, partition: &TopicPartition) -> Option<i64> {
        self.offsets
            .get(&OffsetKey::new(group, partition.clone()))
            .copied()
    }

    /// Record a confirmed write. A lower value replaces a higher one: the
    /// source moved backwards and that is taken as the new truth.
    pub(crate) fn record(&mut self, group: &str, partition: TopicPartition, offset: i64) {
        self.offsets.insert(OffsetKey::new(group, partition), offset);
    }

    /// Number of remembered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
