//! Broker connection pool.
//!
//! Holds the bootstrap connection plus one connection per broker learned
//! from metadata or coordinator lookups. Broker connections are opened on
//! first use and reopened after a failure dropped them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::{AdminError, AdminResult};
use crate::tls::TlsConnector;

use super::connection::BrokerConnection;

/// Information about a Kafka broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    /// The broker node ID.
    pub node_id: i32,
    /// The broker hostname.
    pub host: String,
    /// The broker port.
    pub port: i32,
}

impl BrokerInfo {
    /// Create a new broker info.
    #[must_use]
    pub fn new(node_id: i32, host: impl Into<String>, port: i32) -> Self {
        Self {
            node_id,
            host: host.into(),
            port,
        }
    }

    /// `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Manages connections to Kafka brokers.
pub struct BrokerPool {
    config: KafkaConfig,
    tls_connector: Option<Arc<TlsConnector>>,
    bootstrap: RwLock<Option<Arc<BrokerConnection>>>,
    known: DashMap<i32, BrokerInfo>,
    connections: DashMap<i32, Arc<BrokerConnection>>,
}

impl BrokerPool {
    /// Create a pool; no connection is opened yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the security protocol needs TLS and the TLS
    /// configuration cannot be loaded.
    pub fn new(config: KafkaConfig) -> AdminResult<Self> {
        let tls_connector = if config.security_protocol.requires_tls() {
            let tls = config.tls.clone().unwrap_or_default();
            Some(Arc::new(TlsConnector::new(&tls)?))
        } else {
            None
        };

        Ok(Self {
            config,
            tls_connector,
            bootstrap: RwLock::new(None),
            known: DashMap::new(),
            connections: DashMap::new(),
        })
    }

    fn connection(&self, broker_id: i32, address: String) -> BrokerConnection {
        BrokerConnection::new(broker_id, address, &self.config, self.tls_connector.clone())
    }

    /// Connect to the first reachable bootstrap server.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NoBrokersAvailable`] if every bootstrap server fails.
    pub async fn connect(&self) -> AdminResult<()> {
        for server in &self.config.bootstrap_servers {
            let server = server.trim();
            if server.is_empty() {
                continue;
            }
            let conn = self.connection(-1, server.to_string());
            match conn.connect().await {
                Ok(()) => {
                    info!(server, protocol = ?self.config.security_protocol, "connected to bootstrap server");
                    *self.bootstrap.write().await = Some(Arc::new(conn));
                    return Ok(());
                }
                Err(e) => warn!(server, error = %e, "failed to connect to bootstrap server"),
            }
        }
        Err(AdminError::NoBrokersAvailable)
    }

    /// Any usable connection: the bootstrap one, then known brokers, then a
    /// fresh bootstrap attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if no broker can be reached.
    pub async fn get_any(&self) -> AdminResult<Arc<BrokerConnection>> {
        if let Some(conn) = self.bootstrap.read().await.as_ref() {
            if conn.is_connected().await {
                return Ok(Arc::clone(conn));
            }
        }

        for id in self.broker_ids() {
            if let Ok(conn) = self.get_broker(id).await {
                return Ok(conn);
            }
        }

        self.connect().await?;
        self.bootstrap
            .read()
            .await
            .clone()
            .ok_or(AdminError::NoBrokersAvailable)
    }

    /// Record brokers learned from a metadata response.
    pub fn update_brokers(&self, brokers: impl IntoIterator<Item = BrokerInfo>) {
        for broker in brokers {
            let changed = self
                .known
                .insert(broker.node_id, broker.clone())
                .is_some_and(|previous| previous != broker);
            if changed {
                debug!(broker_id = broker.node_id, address = %broker.address(), "broker address changed");
                self.connections.remove(&broker.node_id);
            }
        }
    }

    /// IDs of every known broker, ascending.
    #[must_use]
    pub fn broker_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.known.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// A connected connection to `broker_id`, opening it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker is unknown or cannot be reached.
    pub async fn get_broker(&self, broker_id: i32) -> AdminResult<Arc<BrokerConnection>> {
        let existing = self.connections.get(&broker_id).map(|c| Arc::clone(c.value()));
        if let Some(conn) = existing {
            if conn.is_connected().await {
                return Ok(conn);
            }
            conn.connect().await?;
            return Ok(conn);
        }

        let info = self
            .known
            .get(&broker_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| AdminError::BrokerUnavailable {
                broker_id,
                message: "broker not in pool".to_string(),
            })?;

        let conn = Arc::new(self.connection(broker_id, info.address()));
        conn.connect().await?;
        info!(broker_id, address = %info.address(), "connected to broker");
        self.connections.insert(broker_id, Arc::clone(&conn));
        Ok(conn)
    }

    /// Register `broker` and return a connection to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    pub async fn connect_to(&self, broker: BrokerInfo) -> AdminResult<Arc<BrokerConnection>> {
        let id = broker.node_id;
        self.update_brokers([broker]);
        self.get_broker(id).await
    }

    /// Number of open broker connections (excluding bootstrap).
    #[must_use]
    pub fn broker_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection.
    pub async fn disconnect_all(&self) {
        if let Some(conn) = self.bootstrap.write().await.take() {
            conn.disconnect().await;
        }
        let connections: Vec<_> = self.connections.iter().map(|e| Arc::clone(e.value())).collect();
        self.connections.clear();
        for conn in connections {
            conn.disconnect().await;
        }
    }
}
