//! Test doubles for the admin layer.
//!
//! - [`MockAdmin`]: in-memory [`OffsetAdmin`](crate::admin::OffsetAdmin)
//!   for engine tests.
//! - [`MockBroker`]: a fake broker on a local port that speaks the Kafka
//!   wire protocol, for exercising
//!   [`KafkaOffsetAdmin`](crate::admin::KafkaOffsetAdmin).

pub mod mock_admin;
pub mod mock_broker;

pub use mock_admin::{MockAdmin, WriteCall};
pub use mock_broker::{BrokerCall, MockBroker};
