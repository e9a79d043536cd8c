//! [`OffsetAdmin`] over the Kafka wire protocol.
//!
//! Brokers are discovered with a Metadata request after bootstrapping.
//! Group listing asks every broker, since each only knows the groups it
//! coordinates. Offset reads and writes go to the group's coordinator,
//! found with FindCoordinator. A commit with generation `-1` and an empty
//! member id is the admin form Kafka accepts for groups without active
//! members.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kafka_protocol::messages::offset_commit_request::{
    OffsetCommitRequestPartition, OffsetCommitRequestTopic,
};
use kafka_protocol::messages::{
    FindCoordinatorRequest, GroupId, ListGroupsRequest, MetadataRequest, OffsetCommitRequest,
    OffsetFetchRequest, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use tracing::{debug, info, instrument};

use crate::admin::{GroupOffsets, OffsetAdmin, TopicPartition};
use crate::broker::{BrokerConnection, BrokerInfo, BrokerPool};
use crate::config::KafkaConfig;
use crate::error::{AdminError, AdminResult};

const METADATA_VERSION: i16 = 1;
const LIST_GROUPS_VERSION: i16 = 2;
const FIND_COORDINATOR_VERSION: i16 = 2;
const OFFSET_FETCH_VERSION: i16 = 7;
const OFFSET_COMMIT_VERSION: i16 = 7;

/// FindCoordinator key type for consumer groups.
const COORDINATOR_KEY_GROUP: i8 = 0;

/// Kafka `GROUP_ID_NOT_FOUND`.
const GROUP_ID_NOT_FOUND: i16 = 69;

fn check(api: &'static str, code: i16, context: impl FnOnce() -> String) -> AdminResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(AdminError::Kafka {
            api,
            code,
            context: context(),
        })
    }
}

/// Kafka cluster admin client for committed offsets.
pub struct KafkaOffsetAdmin {
    pool: BrokerPool,
    request_timeout: Duration,
}

impl KafkaOffsetAdmin {
    /// Bootstrap and discover the cluster's brokers.
    ///
    /// # Errors
    ///
    /// Returns an error if no bootstrap server is reachable or the
    /// metadata request fails.
    pub async fn connect(config: &KafkaConfig) -> AdminResult<Self> {
        let pool = BrokerPool::new(config.clone())?;
        pool.connect().await?;
        let admin = Self {
            pool,
            request_timeout: config.request_timeout(),
        };
        admin.refresh_brokers().await?;
        Ok(admin)
    }

    async fn bounded<T>(
        &self,
        api: &'static str,
        call: impl Future<Output = AdminResult<T>>,
    ) -> AdminResult<T> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| AdminError::Timeout(api))?
    }

    /// Re-read the broker list from cluster metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata request fails.
    pub async fn refresh_brokers(&self) -> AdminResult<()> {
        let mut request = MetadataRequest::default();
        request.topics = Some(Vec::new());

        let response = self
            .bounded("Metadata", async {
                self.pool.get_any().await?.call(METADATA_VERSION, &request).await
            })
            .await?;

        let brokers: Vec<BrokerInfo> = response
            .brokers
            .iter()
            .map(|b| BrokerInfo::new(b.node_id.0, b.host.to_string(), b.port))
            .collect();
        info!(brokers = brokers.len(), "discovered brokers");
        self.pool.update_brokers(brokers);
        Ok(())
    }

    async fn coordinator(&self, group: &str) -> AdminResult<Arc<BrokerConnection>> {
        let mut request = FindCoordinatorRequest::default();
        request.key = StrBytes::from_string(group.to_string());
        request.key_type = COORDINATOR_KEY_GROUP;

        let response = self
            .pool
            .get_any()
            .await?
            .call(FIND_COORDINATOR_VERSION, &request)
            .await?;
        check("FindCoordinator", response.error_code, || format!("group {group}"))?;

        let coordinator = BrokerInfo::new(response.node_id.0, response.host.to_string(), response.port);
        debug!(group, broker_id = coordinator.node_id, "found group coordinator");
        self.pool.connect_to(coordinator).await
    }

    async fn fetch_group(&self, group: &str, require_stable: bool) -> AdminResult<GroupOffsets> {
        let mut request = OffsetFetchRequest::default();
        request.group_id = GroupId::from(StrBytes::from_string(group.to_string()));
        request.topics = None;
        request.require_stable = require_stable;

        let response = self
            .coordinator(group)
            .await?
            .call(OFFSET_FETCH_VERSION, &request)
            .await?;
        if response.error_code == GROUP_ID_NOT_FOUND {
            return Ok(GroupOffsets::new());
        }
        check("OffsetFetch", response.error_code, || format!("group {group}"))?;

        let mut offsets = GroupOffsets::new();
        for topic in &response.topics {
            for partition in &topic.partitions {
                let tp = TopicPartition::new(topic.name.0.to_string(), partition.partition_index);
                check("OffsetFetch", partition.error_code, || format!("group {group} partition {tp}"))?;
                if partition.committed_offset >= 0 {
                    offsets.insert(tp, partition.committed_offset);
                }
            }
        }
        Ok(offsets)
    }

    /// Close every broker connection.
    pub async fn close(&self) {
        self.pool.disconnect_all().await;
    }
}

#[async_trait]
impl OffsetAdmin for KafkaOffsetAdmin {
    #[instrument(skip(self))]
    async fn list_consumer_groups(&self) -> AdminResult<Vec<String>> {
        self.bounded("ListGroups", async {
            let request = ListGroupsRequest::default();
            let mut groups = BTreeSet::new();

            let mut ids = self.pool.broker_ids();
            if ids.is_empty() {
                self.refresh_brokers().await?;
                ids = self.pool.broker_ids();
            }
            for id in ids {
                let response = self
                    .pool
                    .get_broker(id)
                    .await?
                    .call(LIST_GROUPS_VERSION, &request)
                    .await?;
                check("ListGroups", response.error_code, || format!("broker {id}"))?;
                groups.extend(
                    response
                        .groups
                        .iter()
                        .map(|g| g.group_id.0.trim().to_string())
                        .filter(|g| !g.is_empty()),
                );
            }
            debug!(groups = groups.len(), "listed consumer groups");
            Ok(groups.into_iter().collect())
        })
        .await
    }

    #[instrument(skip(self, groups), fields(groups = groups.len()))]
    async fn list_committed_offsets(
        &self,
        groups: &BTreeSet<String>,
        require_stable: bool,
    ) -> AdminResult<HashMap<String, GroupOffsets>> {
        self.bounded("OffsetFetch", async {
            let mut snapshots = HashMap::new();
            for group in groups {
                let offsets = self.fetch_group(group, require_stable).await?;
                if !offsets.is_empty() {
                    snapshots.insert(group.clone(), offsets);
                }
            }
            Ok(snapshots)
        })
        .await
    }

    #[instrument(skip(self, offsets), fields(entries = offsets.len()))]
    async fn write_committed_offsets(&self, group: &str, offsets: &GroupOffsets) -> AdminResult<()> {
        self.bounded("OffsetCommit", async {
            let mut topics: Vec<OffsetCommitRequestTopic> = Vec::new();
            for (tp, offset) in offsets {
                if topics.last().map_or(true, |t| &*t.name.0 != tp.topic.as_str()) {
                    let mut topic = OffsetCommitRequestTopic::default();
                    topic.name = TopicName::from(StrBytes::from_string(tp.topic.clone()));
                    topics.push(topic);
                }
                let mut partition = OffsetCommitRequestPartition::default();
                partition.partition_index = tp.partition;
                partition.committed_offset = *offset;
                if let Some(topic) = topics.last_mut() {
                    topic.partitions.push(partition);
                }
            }

            let mut request = OffsetCommitRequest::default();
            request.group_id = GroupId::from(StrBytes::from_string(group.to_string()));
            request.topics = topics;

            let response = self
                .coordinator(group)
                .await?
                .call(OFFSET_COMMIT_VERSION, &request)
                .await?;
            for topic in &response.topics {
                for partition in &topic.partitions {
                    check("OffsetCommit", partition.error_code, || {
                        format!("group {group} partition {}-{}", topic.name.0, partition.partition_index)
                    })?;
                }
            }
            Ok(())
        })
        .await
    }
}
