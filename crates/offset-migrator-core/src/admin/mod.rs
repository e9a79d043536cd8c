//! Broker admin interface.
//!
//! The migration engine reads and writes committed offsets only through
//! [`OffsetAdmin`]. [`KafkaOffsetAdmin`] implements it against a real
//! cluster; tests use the in-memory admin from the `testing` module.

pub mod kafka;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;

use crate::error::AdminResult;

pub use kafka::KafkaOffsetAdmin;

/// A topic partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    /// Topic name.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic partition.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Committed offsets of one consumer group, in topic/partition order.
pub type GroupOffsets = BTreeMap<TopicPartition, i64>;

/// Admin operations the migration engine needs from a cluster.
#[async_trait]
pub trait OffsetAdmin: Send + Sync {
    /// List the ids of every consumer group known to the cluster.
    async fn list_consumer_groups(&self) -> AdminResult<Vec<String>>;

    /// Fetch committed offsets for the given groups.
    ///
    /// With `require_stable` only settled offsets are returned; without it
    /// offsets of pending transactions are included. A group with nothing
    /// committed is absent from the result.
    async fn list_committed_offsets(
        &self,
        groups: &BTreeSet<String>,
        require_stable: bool,
    ) -> AdminResult<HashMap<String, GroupOffsets>>;

    /// Commit offsets for a group. Succeeds or fails for the whole map.
    async fn write_committed_offsets(&self, group: &str, offsets: &GroupOffsets)
        -> AdminResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_partition_ordering() {
        let mut offsets = GroupOffsets::new();
        offsets.insert(TopicPartition::new("orders.us", 1), 10);
        offsets.insert(TopicPartition::new("orders.eu", 0), 20);
        offsets.insert(TopicPartition::new("orders.us", 0), 30);

        let keys: Vec<String> = offsets.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["orders.eu-0", "orders.us-0", "orders.us-1"]);
    }
}
