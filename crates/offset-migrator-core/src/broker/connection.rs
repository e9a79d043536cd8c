//! Single Kafka broker connection.
//!
//! Manages a TCP or TLS connection to one broker, optionally authenticated
//! with SASL/PLAIN, and performs typed request/response round-trips with
//! correlation ID checking.

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{
    RequestHeader, ResponseHeader, SaslAuthenticateRequest, SaslHandshakeRequest,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{BrokerSaslConfig, KafkaConfig, SecurityProtocol};
use crate::error::{AdminError, AdminResult};
use crate::tls::TlsConnector;

use super::stream::BrokerStream;

/// A connection to a single Kafka broker.
pub struct BrokerConnection {
    broker_id: i32,
    address: String,
    client_id: String,
    stream: Mutex<Option<BrokerStream>>,
    correlation_id: AtomicI32,
    connect_timeout: Duration,
    request_timeout: Duration,
    security_protocol: SecurityProtocol,
    tls_connector: Option<Arc<TlsConnector>>,
    sasl_config: Option<BrokerSaslConfig>,
}

impl BrokerConnection {
    /// Create a connection (not yet connected) using the cluster settings.
    ///
    /// `tls_connector` must be set when the security protocol requires TLS.
    #[must_use]
    pub fn new(
        broker_id: i32,
        address: String,
        config: &KafkaConfig,
        tls_connector: Option<Arc<TlsConnector>>,
    ) -> Self {
        Self {
            broker_id,
            address,
            client_id: config.client_id.clone(),
            stream: Mutex::new(None),
            correlation_id: AtomicI32::new(0),
            connect_timeout: config.connection_timeout(),
            request_timeout: config.request_timeout(),
            security_protocol: config.security_protocol,
            tls_connector,
            sasl_config: config.sasl.clone(),
        }
    }

    /// Get the broker ID (`-1` for a bootstrap connection).
    #[must_use]
    pub fn broker_id(&self) -> i32 {
        self.broker_id
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check if the connection is established.
    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    fn unavailable(&self, message: impl Into<String>) -> AdminError {
        AdminError::BrokerUnavailable {
            broker_id: self.broker_id,
            message: message.into(),
        }
    }

    /// Connect to the broker, running the TLS handshake and SASL
    /// authentication the security protocol asks for.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, times out, or
    /// authentication fails.
    #[instrument(skip(self), fields(broker_id = self.broker_id, address = %self.address, protocol = ?self.security_protocol))]
    pub async fn connect(&self) -> AdminResult<()> {
        let tcp_stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to connect to broker");
                return Err(self.unavailable(e.to_string()));
            }
            Err(_) => {
                warn!("connection timeout");
                return Err(self.unavailable("connection timeout"));
            }
        };

        let stream = if self.security_protocol.requires_tls() {
            let connector = self
                .tls_connector
                .as_ref()
                .ok_or_else(|| self.unavailable("TLS required but no connector configured"))?;
            let server_name = self
                .address
                .rsplit_once(':')
                .map_or(self.address.as_str(), |(host, _)| host);
            debug!(server_name, "performing TLS handshake");
            BrokerStream::tls(connector.connect(server_name, tcp_stream).await?)
        } else {
            BrokerStream::plain(tcp_stream)
        };

        *self.stream.lock().await = Some(stream);

        if self.security_protocol.requires_sasl() {
            if let Err(e) = self.authenticate().await {
                self.disconnect().await;
                return Err(e);
            }
        }

        debug!("connected to broker");
        Ok(())
    }

    /// SaslHandshake followed by a SASL/PLAIN SaslAuthenticate.
    async fn authenticate(&self) -> AdminResult<()> {
        let sasl = self
            .sasl_config
            .as_ref()
            .ok_or_else(|| self.unavailable("SASL required but no configuration provided"))?;
        let mechanism = sasl.mechanism.mechanism_name();

        let mut handshake = SaslHandshakeRequest::default();
        handshake.mechanism = StrBytes::from_static_str(mechanism);
        let response = self.round_trip(1, &handshake).await?;
        if response.error_code != 0 {
            let supported: Vec<String> = response.mechanisms.iter().map(ToString::to_string).collect();
            return Err(self.unavailable(format!(
                "SASL mechanism {mechanism} rejected (error code {}), broker supports {supported:?}",
                response.error_code
            )));
        }

        let mut authenticate = SaslAuthenticateRequest::default();
        authenticate.auth_bytes = Bytes::from(format!("\0{}\0{}", sasl.username(), sasl.password()));
        let response = self.round_trip(2, &authenticate).await?;
        if response.error_code != 0 {
            let message = response
                .error_message
                .map_or_else(|| "unknown error".to_string(), |m| m.to_string());
            return Err(self.unavailable(format!(
                "SASL authentication failed (error code {}): {message}",
                response.error_code
            )));
        }

        info!(mechanism, "SASL authentication completed");
        Ok(())
    }

    /// Disconnect from the broker.
    pub async fn disconnect(&self) {
        *self.stream.lock().await = None;
    }

    /// Encode `request` at `version`, send it, and decode the typed response.
    ///
    /// A connection dropped by an earlier failure or cancellation is
    /// reopened first.
    ///
    /// # Errors
    ///
    /// Returns an error if reconnecting, encoding, the round-trip, or
    /// decoding fails.
    pub async fn call<R: Request>(&self, version: i16, request: &R) -> AdminResult<R::Response> {
        if !self.is_connected().await {
            debug!(broker_id = self.broker_id, "reconnecting to broker");
            self.connect().await?;
        }
        self.round_trip(version, request).await
    }

    async fn round_trip<R: Request>(&self, version: i16, request: &R) -> AdminResult<R::Response> {
        let correlation_id = self.next_correlation_id();

        let mut header = RequestHeader::default();
        header.request_api_key = R::KEY;
        header.request_api_version = version;
        header.correlation_id = correlation_id;
        header.client_id = Some(StrBytes::from_string(self.client_id.clone()));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, R::header_version(version))
            .map_err(|e| AdminError::ProtocolEncode {
                message: format!("request header (api {}): {e}", R::KEY),
            })?;
        request
            .encode(&mut buf, version)
            .map_err(|e| AdminError::ProtocolEncode {
                message: format!("request body (api {}): {e}", R::KEY),
            })?;

        let mut response = self.send_request(&buf).await?;

        let decoded = ResponseHeader::decode(&mut response, R::Response::header_version(version))
            .map_err(|e| AdminError::ProtocolDecode {
                message: format!("response header (api {}): {e}", R::KEY),
            })
            .and_then(|response_header| {
                if response_header.correlation_id == correlation_id {
                    Ok(())
                } else {
                    Err(AdminError::CorrelationIdMismatch {
                        expected: correlation_id,
                        actual: response_header.correlation_id,
                    })
                }
            })
            .and_then(|()| {
                R::Response::decode(&mut response, version).map_err(|e| AdminError::ProtocolDecode {
                    message: format!("response body (api {}): {e}", R::KEY),
                })
            });

        // The stream can no longer be trusted to be aligned on a frame.
        if decoded.is_err() {
            self.disconnect().await;
        }
        decoded
    }

    /// Send a framed request and read one framed response.
    ///
    /// `request_bytes` is the request header and body without the length
    /// prefix. The returned bytes start at the response header.
    ///
    /// The stream leaves its slot for the round trip and goes back only
    /// after a whole response was read. A failed, timed out or cancelled
    /// call therefore closes the connection instead of leaving a response
    /// unread on the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not established, the I/O
    /// fails, or either direction exceeds the request timeout.
    #[instrument(skip(self, request_bytes), fields(broker_id = self.broker_id))]
    pub async fn send_request(&self, request_bytes: &[u8]) -> AdminResult<Bytes> {
        let mut guard = self.stream.lock().await;
        let mut stream = guard.take().ok_or_else(|| self.unavailable("not connected"))?;

        let len = u32::try_from(request_bytes.len()).map_err(|_| AdminError::ProtocolEncode {
            message: "request too large".to_string(),
        })?;
        let mut write_buf = BytesMut::with_capacity(4 + request_bytes.len());
        write_buf.put_u32(len);
        write_buf.extend_from_slice(request_bytes);

        debug!(request_len = request_bytes.len(), "sending request");

        let round_trip = timeout(self.request_timeout, async {
            stream.write_all(&write_buf).await?;
            stream.flush().await?;

            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await?;
            let mut response_buf = vec![0u8; u32::from_be_bytes(len_buf) as usize];
            stream.read_exact(&mut response_buf).await?;
            Ok::<_, std::io::Error>(response_buf)
        })
        .await;

        match round_trip {
            Ok(Ok(response)) => {
                *guard = Some(stream);
                debug!(response_len = response.len(), "received response");
                Ok(Bytes::from(response))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "broker connection failed, dropping it");
                Err(AdminError::Connection(e))
            }
            Err(_) => {
                warn!("request timeout, dropping connection");
                Err(self.unavailable("request timeout"))
            }
        }
    }

    /// Generate a new correlation ID.
    #[must_use]
    pub fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KafkaConfig {
        KafkaConfig {
            connection_timeout_ms: 100,
            request_timeout_ms: 1000,
            ..KafkaConfig::plaintext(vec!["localhost:9092".to_string()])
        }
    }

    #[test]
    fn test_broker_connection_new() {
        let conn = BrokerConnection::new(1, "localhost:9092".to_string(), &config(), None);
        assert_eq!(conn.broker_id(), 1);
        assert_eq!(conn.address(), "localhost:9092");
    }

    #[test]
    fn test_correlation_id_generation() {
        let conn = BrokerConnection::new(1, "localhost:9092".to_string(), &config(), None);
        assert_eq!(conn.next_correlation_id(), 0);
        assert_eq!(conn.next_correlation_id(), 1);
        assert_eq!(conn.next_correlation_id(), 2);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let conn = BrokerConnection::new(1, "localhost:9092".to_string(), &config(), None);
        assert!(!conn.is_connected().await);
        let result = conn.send_request(&[0; 8]).await;
        assert!(matches!(result, Err(AdminError::BrokerUnavailable { broker_id: 1, .. })));
    }

    #[tokio::test]
    async fn test_connect_to_invalid_address() {
        let conn = BrokerConnection::new(1, "127.0.0.1:59999".to_string(), &config(), None);
        assert!(conn.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_poison_connection() {
        use crate::testing::MockBroker;
        use kafka_protocol::messages::ListGroupsRequest;

        let broker = MockBroker::start().await.unwrap();
        broker.add_group("g");
        let conn = BrokerConnection::new(1, broker.address(), &config(), None);
        conn.connect().await.unwrap();

        broker.delay_next_response(Duration::from_millis(300));
        let request = ListGroupsRequest::default();
        let first = timeout(Duration::from_millis(100), conn.call(2, &request)).await;
        assert!(first.is_err());
        assert!(!conn.is_connected().await);

        for _ in 0..3 {
            let response = conn.call(2, &request).await.unwrap();
            assert_eq!(response.groups.len(), 1);
        }
        assert!(conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_timed_out_request_reconnects() {
        use crate::testing::MockBroker;
        use kafka_protocol::messages::ListGroupsRequest;

        let broker = MockBroker::start().await.unwrap();
        let config = KafkaConfig {
            request_timeout_ms: 100,
            ..config()
        };
        let conn = BrokerConnection::new(1, broker.address(), &config, None);
        conn.connect().await.unwrap();

        broker.delay_next_response(Duration::from_millis(300));
        let request = ListGroupsRequest::default();
        assert!(matches!(
            conn.call(2, &request).await,
            Err(AdminError::BrokerUnavailable { .. })
        ));
        assert!(conn.call(2, &request).await.is_ok());
    }

    #[tokio::test]
    async fn test_tls_without_connector() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let config = KafkaConfig {
            security_protocol: SecurityProtocol::Ssl,
            ..config()
        };

        let conn = BrokerConnection::new(1, address, &config, None);
        let result = conn.connect().await;
        assert!(matches!(result, Err(AdminError::BrokerUnavailable { .. })));
    }
}
