//! Client configuration: how to reach the Kafka cluster, plus logging and
//! metrics settings for the process.
//!
//! Loaded from a YAML file and validated before use. The migration rules
//! themselves live in a separate file, see [`crate::migration`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::properties::expand_env_vars;

/// Root client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Kafka cluster connection configuration.
    pub kafka: KafkaConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Kafka cluster connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Bootstrap server addresses.
    pub bootstrap_servers: Vec<String>,

    /// Client id sent with every request.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Upper bound for one admin call, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Security protocol for broker connections.
    #[serde(default)]
    pub security_protocol: SecurityProtocol,

    /// TLS configuration (when using SSL or SASL_SSL).
    #[serde(default)]
    pub tls: Option<BrokerTlsConfig>,

    /// SASL configuration (when using SASL_PLAINTEXT or SASL_SSL).
    #[serde(default)]
    pub sasl: Option<BrokerSaslConfig>,
}

impl KafkaConfig {
    /// A plaintext configuration for the given bootstrap servers.
    #[must_use]
    pub fn plaintext(bootstrap_servers: Vec<String>) -> Self {
        Self {
            bootstrap_servers,
            client_id: default_client_id(),
            connection_timeout_ms: default_connection_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            security_protocol: SecurityProtocol::Plaintext,
            tls: None,
            sasl: None,
        }
    }

    /// Connection timeout as a [`Duration`].
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Security protocol for Kafka connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    /// Plain TCP without encryption or authentication.
    #[default]
    Plaintext,
    /// TLS encryption without SASL authentication.
    Ssl,
    /// SASL authentication without TLS encryption.
    SaslPlaintext,
    /// TLS encryption with SASL authentication.
    SaslSsl,
}

impl SecurityProtocol {
    /// Check if TLS is required for this protocol.
    #[must_use]
    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Ssl | Self::SaslSsl)
    }

    /// Check if SASL is required for this protocol.
    #[must_use]
    pub fn requires_sasl(&self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }
}

/// TLS configuration for broker connections.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrokerTlsConfig {
    /// CA certificate file (PEM). Falls back to the webpki roots when unset.
    pub ca_cert_path: Option<PathBuf>,

    /// Client certificate file (PEM) for mTLS.
    pub cert_path: Option<PathBuf>,

    /// Client private key file (PEM) for mTLS.
    pub key_path: Option<PathBuf>,
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum SaslMechanism {
    /// SASL/PLAIN username/password authentication.
    #[default]
    #[serde(rename = "PLAIN")]
    Plain,
}

impl SaslMechanism {
    /// Kafka mechanism name as used in the SASL handshake.
    #[must_use]
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
        }
    }
}

/// SASL authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerSaslConfig {
    /// SASL mechanism to use.
    #[serde(default)]
    pub mechanism: SaslMechanism,

    /// Username, with `${VAR}` environment expansion.
    pub username: String,

    /// Password, with `${VAR}` environment expansion.
    pub password: String,
}

impl BrokerSaslConfig {
    /// Get the username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.username)
    }

    /// Get the password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to serve the metrics endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_client_id() -> String {
    "kafka-offset-migrator".to_string()
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no bootstrap server is set, or if SASL is
    /// required but not configured.
    pub fn validate(&self) -> ConfigResult<()> {
        if self
            .kafka
            .bootstrap_servers
            .iter()
            .all(|s| s.trim().is_empty())
        {
            return Err(ConfigError::NoBootstrapServers);
        }
        if self.kafka.security_protocol.requires_sasl() && self.kafka.sasl.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "kafka.sasl".to_string(),
                value: "missing for a SASL security protocol".to_string(),
            });
        }
        Ok(())
    }
}
