//! rustls client connector for TLS broker connections.
//!
//! Verifies brokers against a configured CA bundle, or the webpki roots
//! when none is given, and presents a client certificate for mTLS when
//! both a certificate and a key are configured.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::config::BrokerTlsConfig;
use crate::error::{TlsError, TlsResult};

/// TLS connector for broker connections.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Build a connector from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a certificate or key file cannot be loaded, or
    /// if rustls rejects the resulting configuration.
    pub fn new(config: &BrokerTlsConfig) -> TlsResult<Self> {
        // Fails only when a provider is already installed.
        let _ = CryptoProvider::install_default(default_provider());

        let builder = ClientConfig::builder().with_root_certificates(root_store(config)?);
        let client_config = match (&config.cert_path, &config.key_path) {
            (Some(cert_path), Some(key_path)) => {
                debug!(cert = %cert_path.display(), "using client certificate");
                builder
                    .with_client_auth_cert(load_certificates(cert_path)?, load_private_key(key_path)?)
                    .map_err(|e| TlsError::Config(format!("client certificate rejected: {e}")))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(TlsError::Config(
                    "cert_path and key_path must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Run the TLS handshake over `stream`, verifying `server_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid DNS name or IP, or if
    /// the handshake fails.
    pub async fn connect(&self, server_name: &str, stream: TcpStream) -> TlsResult<TlsStream<TcpStream>> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| TlsError::Config(format!("invalid server name '{server_name}': {e}")))?;
        self.inner
            .connect(name, stream)
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

fn root_store(config: &BrokerTlsConfig) -> TlsResult<RootCertStore> {
    let mut store = RootCertStore::empty();
    match &config.ca_cert_path {
        Some(path) => {
            let (added, ignored) = store.add_parsable_certificates(load_certificates(path)?);
            debug!(path = %path.display(), added, ignored, "loaded CA certificates");
            if added == 0 {
                return Err(TlsError::NoCertificates(path.display().to_string()));
            }
        }
        None => store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(store)
}

fn open(path: &Path) -> std::io::Result<BufReader<File>> {
    File::open(path).map(BufReader::new)
}

fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path).map_err(|e| TlsError::CertificateLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|cert| {
            cert.map_err(|e| warn!(path = %path.display(), error = %e, "skipping unreadable certificate"))
                .ok()
        })
        .collect();

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let key_error = |message: String| TlsError::PrivateKeyLoad {
        path: path.display().to_string(),
        message,
    };
    let mut reader = open(path).map_err(|e| key_error(e.to_string()))?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| key_error(e.to_string()))?
        .ok_or_else(|| TlsError::NoPrivateKeys(path.display().to_string()))
}
