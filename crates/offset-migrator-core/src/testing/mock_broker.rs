//! Single-node fake Kafka broker for admin client tests.
//!
//! Speaks the real wire protocol for the APIs the offset admin uses
//! (Metadata, ListGroups, FindCoordinator, OffsetFetch, OffsetCommit) and
//! keeps committed offsets in memory, so commits are visible to later
//! fetches. Every request is logged.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::list_groups_response::ListedGroup;
use kafka_protocol::messages::metadata_response::MetadataResponseBroker;
use kafka_protocol::messages::offset_commit_response::{
    OffsetCommitResponsePartition, OffsetCommitResponseTopic,
};
use kafka_protocol::messages::offset_fetch_response::{
    OffsetFetchResponsePartition, OffsetFetchResponseTopic,
};
use kafka_protocol::messages::{
    ApiKey, BrokerId, FindCoordinatorRequest, FindCoordinatorResponse, GroupId, ListGroupsRequest,
    ListGroupsResponse, MetadataRequest, MetadataResponse, OffsetCommitRequest,
    OffsetCommitResponse, OffsetFetchRequest, OffsetFetchResponse, RequestHeader, ResponseHeader,
    TopicName,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::admin::{GroupOffsets, TopicPartition};

/// Node id the broker advertises for itself.
pub const NODE_ID: i32 = 1;

/// A recorded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerCall {
    /// The API key of the request.
    pub api_key: i16,
    /// The API version of the request.
    pub api_version: i16,
    /// The correlation ID.
    pub correlation_id: i32,
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, GroupOffsets>,
    commit_failures: HashMap<String, i16>,
    api_errors: HashMap<i16, i16>,
    fetch_stability: Vec<bool>,
    calls: Vec<BrokerCall>,
    response_delay: Option<Duration>,
}

#[derive(Debug)]
struct Shared {
    address: SocketAddr,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fake broker bound to a local port.
pub struct MockBroker {
    shared: Arc<Shared>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl MockBroker {
    /// Bind to an ephemeral local port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let shared = Arc::new(Shared {
            address: listener.local_addr()?,
            state: Mutex::new(State::default()),
        });
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let accept_shared = Arc::clone(&shared);
        let accept_tx = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        let shared = Arc::clone(&accept_shared);
                        let shutdown_rx = accept_tx.subscribe();
                        tokio::spawn(handle_connection(stream, shared, shutdown_rx));
                    }
                }
            }
        });

        Ok(Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// `host:port` the broker listens on.
    #[must_use]
    pub fn address(&self) -> String {
        self.shared.address.to_string()
    }

    /// Replace the committed offsets of `group`.
    pub fn set_offsets(&self, group: &str, offsets: GroupOffsets) {
        self.shared.state().groups.insert(group.to_string(), offsets);
    }

    /// Register a group with no committed offsets.
    pub fn add_group(&self, group: &str) {
        self.shared.state().groups.entry(group.to_string()).or_default();
    }

    /// Committed offsets of `group`, if it exists.
    #[must_use]
    pub fn committed(&self, group: &str) -> Option<GroupOffsets> {
        self.shared.state().groups.get(group).cloned()
    }

    /// `require_stable` of every OffsetFetch, in order.
    #[must_use]
    pub fn fetch_stability(&self) -> Vec<bool> {
        self.shared.state().fetch_stability.clone()
    }

    /// Every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.shared.state().calls.clone()
    }

    /// Requests received for `api_key`.
    #[must_use]
    pub fn calls_for(&self, api_key: i16) -> Vec<BrokerCall> {
        self.calls().into_iter().filter(|c| c.api_key == api_key).collect()
    }

    /// Reject every commit partition of `group` with `code`.
    pub fn fail_commits(&self, group: &str, code: i16) {
        self.shared.state().commit_failures.insert(group.to_string(), code);
    }

    /// Answer every request for `api_key` with the top-level `code`.
    pub fn fail_api(&self, api_key: i16, code: i16) {
        self.shared.state().api_errors.insert(api_key, code);
    }

    /// Hold back the next response by `delay`.
    pub fn delay_next_response(&self, delay: Duration) {
        self.shared.state().response_delay = Some(delay);
    }

    /// Stop accepting and close open connections.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            frame = read_frame(&mut stream) => {
                let Ok(Some(frame)) = frame else { break };
                let Some(response) = dispatch(&shared, frame) else { break };
                let delay = shared.state().response_delay.take();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if write_frame(&mut stream, &response).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let mut buf = vec![0u8; u32::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

async fn write_frame(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| std::io::ErrorKind::InvalidData)?;
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u32(len);
    buf.extend_from_slice(data);
    stream.write_all(&buf).await?;
    stream.flush().await
}

/// Decode one request frame and build the response frame. `None` closes
/// the connection.
fn dispatch(shared: &Shared, frame: Bytes) -> Option<Bytes> {
    if frame.len() < 4 {
        return None;
    }
    let api_key = i16::from_be_bytes([frame[0], frame[1]]);
    let version = i16::from_be_bytes([frame[2], frame[3]]);

    match ApiKey::try_from(api_key).ok()? {
        ApiKey::Metadata => serve::<MetadataRequest>(shared, frame, version, metadata),
        ApiKey::ListGroups => serve::<ListGroupsRequest>(shared, frame, version, list_groups),
        ApiKey::FindCoordinator => {
            serve::<FindCoordinatorRequest>(shared, frame, version, find_coordinator)
        }
        ApiKey::OffsetFetch => serve::<OffsetFetchRequest>(shared, frame, version, offset_fetch),
        ApiKey::OffsetCommit => serve::<OffsetCommitRequest>(shared, frame, version, offset_commit),
        _ => None,
    }
}

fn serve<R: Request>(
    shared: &Shared,
    mut frame: Bytes,
    version: i16,
    handle: fn(&Shared, R) -> R::Response,
) -> Option<Bytes> {
    let header = RequestHeader::decode(&mut frame, R::header_version(version)).ok()?;
    let request = R::decode(&mut frame, version).ok()?;
    shared.state().calls.push(BrokerCall {
        api_key: R::KEY,
        api_version: version,
        correlation_id: header.correlation_id,
    });

    let response = handle(shared, request);

    let mut response_header = ResponseHeader::default();
    response_header.correlation_id = header.correlation_id;
    let mut buf = BytesMut::new();
    response_header
        .encode(&mut buf, R::Response::header_version(version))
        .ok()?;
    response.encode(&mut buf, version).ok()?;
    Some(buf.freeze())
}

fn api_error(shared: &Shared, api_key: i16) -> i16 {
    shared.state().api_errors.get(&api_key).copied().unwrap_or(0)
}

fn metadata(shared: &Shared, _request: MetadataRequest) -> MetadataResponse {
    let mut broker = MetadataResponseBroker::default();
    broker.node_id = BrokerId(NODE_ID);
    broker.host = StrBytes::from_string(shared.address.ip().to_string());
    broker.port = i32::from(shared.address.port());

    let mut response = MetadataResponse::default();
    response.brokers.push(broker);
    response.controller_id = BrokerId(NODE_ID);
    response
}

fn list_groups(shared: &Shared, _request: ListGroupsRequest) -> ListGroupsResponse {
    let mut response = ListGroupsResponse::default();
    response.error_code = api_error(shared, ListGroupsRequest::KEY);
    if response.error_code != 0 {
        return response;
    }
    for group in shared.state().groups.keys() {
        let mut listed = ListedGroup::default();
        listed.group_id = GroupId::from(StrBytes::from_string(group.clone()));
        listed.protocol_type = StrBytes::from_static_str("consumer");
        response.groups.push(listed);
    }
    response
}

fn find_coordinator(shared: &Shared, _request: FindCoordinatorRequest) -> FindCoordinatorResponse {
    let mut response = FindCoordinatorResponse::default();
    response.error_code = api_error(shared, FindCoordinatorRequest::KEY);
    if response.error_code == 0 {
        response.node_id = BrokerId(NODE_ID);
        response.host = StrBytes::from_string(shared.address.ip().to_string());
        response.port = i32::from(shared.address.port());
    }
    response
}

fn offset_fetch(shared: &Shared, request: OffsetFetchRequest) -> OffsetFetchResponse {
    let mut response = OffsetFetchResponse::default();
    response.error_code = api_error(shared, OffsetFetchRequest::KEY);

    let mut state = shared.state();
    state.fetch_stability.push(request.require_stable);
    if response.error_code != 0 {
        return response;
    }

    let Some(offsets) = state.groups.get(&*request.group_id.0) else {
        return response;
    };
    for (tp, offset) in offsets {
        if response.topics.last().map_or(true, |t| &*t.name.0 != tp.topic.as_str()) {
            let mut topic = OffsetFetchResponseTopic::default();
            topic.name = TopicName::from(StrBytes::from_string(tp.topic.clone()));
            response.topics.push(topic);
        }
        let mut partition = OffsetFetchResponsePartition::default();
        partition.partition_index = tp.partition;
        partition.committed_offset = *offset;
        if let Some(topic) = response.topics.last_mut() {
            topic.partitions.push(partition);
        }
    }
    response
}

fn offset_commit(shared: &Shared, request: OffsetCommitRequest) -> OffsetCommitResponse {
    let group = request.group_id.0.to_string();
    let mut state = shared.state();
    let code = state
        .commit_failures
        .get(&group)
        .or_else(|| state.api_errors.get(&OffsetCommitRequest::KEY))
        .copied()
        .unwrap_or(0);

    let mut response = OffsetCommitResponse::default();
    for topic in &request.topics {
        let mut topic_response = OffsetCommitResponseTopic::default();
        topic_response.name = topic.name.clone();
        for partition in &topic.partitions {
            if code == 0 {
                state.groups.entry(group.clone()).or_default().insert(
                    TopicPartition::new(topic.name.0.to_string(), partition.partition_index),
                    partition.committed_offset,
                );
            }
            let mut partition_response = OffsetCommitResponsePartition::default();
            partition_response.partition_index = partition.partition_index;
            partition_response.error_code = code;
            topic_response.partitions.push(partition_response);
        }
        response.topics.push(topic_response);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut broker = MockBroker::start().await.unwrap();
        assert!(broker.address().starts_with("127.0.0.1:"));
        assert!(broker.calls().is_empty());
        broker.stop();
    }

    #[tokio::test]
    async fn test_state_accessors() {
        let broker = MockBroker::start().await.unwrap();
        broker.add_group("empty");
        broker.set_offsets("g", [(TopicPartition::new("t", 0), 5)].into_iter().collect());

        assert_eq!(broker.committed("empty"), Some(GroupOffsets::new()));
        assert_eq!(broker.committed("g").unwrap().len(), 1);
        assert_eq!(broker.committed("missing"), None);
    }

    #[tokio::test]
    async fn test_unknown_api_closes_connection() {
        let broker = MockBroker::start().await.unwrap();
        let mut stream = TcpStream::connect(broker.address()).await.unwrap();
        // Produce v0 header with no body.
        write_frame(&mut stream, &[0, 0, 0, 0, 0, 0, 0, 1, 0xff, 0xff])
            .await
            .unwrap();
        assert!(read_frame(&mut stream).await.unwrap().is_none());
    }
}
