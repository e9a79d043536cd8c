//! Kafka Offset Migrator Core Library
//!
//! Copies committed consumer group offsets from existing groups and topics
//! to renamed ones. Each migration set pairs a regex over group names with
//! a rename template, plus an optional topic rule and blacklists; matched
//! groups get their offsets rewritten under the new names on every loop.
//!
//! # Architecture
//!
//! - [`matcher`] and [`template`] - Full-name regex matching and
//!   `${N}` rename templates
//! - [`migration`] - Migration sets and run settings, loaded from
//!   `.properties` or YAML
//! - [`processor`] - One pass of one migration set
//! - [`applier`] and [`memory`] - Change detection so unchanged offsets are
//!   never rewritten
//! - [`scheduler`] - The loop driver
//! - [`admin`] - The [`OffsetAdmin`] interface and its Kafka implementation
//! - [`broker`] and [`tls`] - Broker connections, TLS and SASL/PLAIN
//! - [`config`] - Client configuration (cluster, logging, metrics)
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use offset_migrator_core::{ClientConfig, KafkaOffsetAdmin, MigrationConfig, Scheduler};
//!
//! let client = ClientConfig::from_file("client.yaml")?;
//! let migration = MigrationConfig::from_file("migration.properties")?;
//!
//! let admin = KafkaOffsetAdmin::connect(&client.kafka).await?;
//! Scheduler::new(migration).run(&admin).await;
//! ```

#![forbid(unsafe_code)]

pub mod admin;
pub mod applier;
pub mod broker;
pub mod config;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod metrics;
pub mod migration;
pub mod processor;
pub mod properties;
pub mod scheduler;
pub mod template;
pub mod tls;

/// Test doubles for the admin layer.
///
/// Only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use admin::{GroupOffsets, KafkaOffsetAdmin, OffsetAdmin, TopicPartition};
pub use applier::{ApplyOutcome, OffsetApplier};
pub use config::{ClientConfig, KafkaConfig, SecurityProtocol};
pub use error::{AdminError, ConfigError, MigrationError, Result, TemplateError, TlsError};
pub use matcher::{CaptureTokens, MatchOutcome, NamePattern};
pub use memory::OffsetMemory;
pub use metrics::MigrationMetrics;
pub use migration::{LoopCount, MigrationConfig, MigrationSet, RenameRule};
pub use processor::{SetOutcome, SetProcessor, SetReport};
pub use properties::Properties;
pub use scheduler::{LoopReport, Scheduler};
pub use template::RenameTemplate;
