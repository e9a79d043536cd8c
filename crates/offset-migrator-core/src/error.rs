//! Domain error types for the consumer group offset migrator.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//! Failures are contained at the narrowest scope that still lets the
//! migration make progress: a rendered pair, a group, a set, a loop.

use std::sync::Arc;

use thiserror::Error;

/// Errors related to loading and validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A YAML migration file did not have a mapping at its root.
    #[error("expected a mapping at the root of '{0}'")]
    NotAMapping(String),

    /// A regular expression could not be compiled.
    #[error("invalid regex for '{key}': {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },

    /// A rename template contains a placeholder that cannot be parsed.
    #[error("invalid rename template for '{key}': {message}")]
    InvalidTemplate { key: String, message: String },

    /// A value could not be converted to the expected type.
    #[error("invalid value for '{key}': '{value}'")]
    InvalidValue { key: String, value: String },

    /// No bootstrap servers were configured.
    #[error("kafka.bootstrap_servers must not be empty")]
    NoBootstrapServers,
}

/// Rendering a rename template failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template references a capture group that did not participate in the match.
    #[error("unknown group {index} in pattern {template}")]
    MissingGroup { index: usize, template: String },
}

/// Errors returned by the broker admin interface.
#[derive(Error, Debug)]
pub enum AdminError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Broker is not available or connection failed.
    #[error("broker {broker_id} unavailable: {message}")]
    BrokerUnavailable { broker_id: i32, message: String },

    /// No brokers available to handle request.
    #[error("no brokers available")]
    NoBrokersAvailable,

    /// Failed to encode a Kafka protocol message.
    #[error("protocol encode error: {message}")]
    ProtocolEncode { message: String },

    /// Failed to decode a Kafka protocol message.
    #[error("protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// Request correlation ID mismatch.
    #[error("correlation ID mismatch: expected {expected}, got {actual}")]
    CorrelationIdMismatch { expected: i32, actual: i32 },

    /// The broker answered with a non-zero Kafka error code.
    #[error("{api} failed for {context}: kafka error code {code}")]
    Kafka {
        api: &'static str,
        code: i16,
        context: String,
    },

    /// The call did not complete within the configured bound.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// TLS setup or handshake failure.
    #[error("tls error: {0}")]
    Tls(#[from] TlsError),

    /// Failure injected or reported by a non-network admin implementation.
    #[error("{0}")]
    Other(String),
}

/// Errors specific to TLS operations.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to load certificate file.
    #[error("failed to load certificate from '{path}': {message}")]
    CertificateLoad { path: String, message: String },

    /// Failed to load private key file.
    #[error("failed to load private key from '{path}': {message}")]
    PrivateKeyLoad { path: String, message: String },

    /// No certificates found in file.
    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    /// No private keys found in file.
    #[error("no private keys found in '{0}'")]
    NoPrivateKeys(String),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
}

/// A failure that aborted one migration set for the current loop.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Listing groups or fetching offsets failed.
    #[error("set `{set}`: {source}")]
    Admin {
        set: String,
        #[source]
        source: AdminError,
    },

    /// The set's rules did not compile.
    #[error("set `{set}`: {source}")]
    Config {
        set: String,
        #[source]
        source: Arc<ConfigError>,
    },
}

impl MigrationError {
    /// Name of the set that failed.
    #[must_use]
    pub fn set(&self) -> &str {
        match self {
            Self::Admin { set, .. } | Self::Config { set, .. } => set,
        }
    }
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for admin calls.
pub type AdminResult<T> = std::result::Result<T, AdminError>;

/// Result type alias for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Result type alias for running a migration set.
pub type Result<T> = std::result::Result<T, MigrationError>;
