//! Broker transport for the Kafka admin client.
//!
//! - [`BrokerConnection`]: one broker, TCP or TLS, optional SASL/PLAIN,
//!   typed request/response calls
//! - [`BrokerPool`]: bootstrap plus per-broker connections, opened lazily
//! - [`BrokerStream`]: plain or TLS byte stream

pub mod connection;
pub mod pool;
pub mod stream;

pub use connection::BrokerConnection;
pub use pool::{BrokerInfo, BrokerPool};
pub use stream::BrokerStream;
