//! TCP + TLS transport.
//!
//! Production transport over plain TCP wrapped in TLS 1.3 via `tokio-rustls`.
//! Unlike a QUIC/stream-multiplexed transport, DCP needs exactly one framed
//! byte stream per connection, so there is no stream-acceptance step: the
//! accepted, handshaken socket *is* the connection.
//!
//! # Security
//!
//! TLS 1.3 is enforced via `rustls`. Self-signed certificates are only
//! suitable for local testing - production deployments MUST use proper TLS
//! certificates from a trusted CA.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::PrivatePkcs8KeyDer;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::{server::TlsStream, TlsAcceptor};

use crate::error::ServerError;

/// TCP listener plus TLS acceptor.
pub struct TcpTlsTransport {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TcpTlsTransport {
    /// Bind and prepare to accept TLS connections.
    ///
    /// If `cert_path` and `key_path` are provided, they are used for TLS.
    /// Otherwise a self-signed certificate is generated, for local testing
    /// only.
    pub async fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        // Ignored: Err just means a prior call (e.g. in tests) already installed one.
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

        let tls_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => generate_self_signed_config()?,
        };

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("TCP+TLS transport bound to {}", addr);

        Ok(Self { listener, acceptor: TlsAcceptor::from(Arc::new(tls_config)) })
    }

    /// Accept and TLS-handshake one incoming connection.
    ///
    /// Blocks until a connection is available and its handshake completes.
    pub async fn accept(&self) -> Result<(TlsStream<TcpStream>, SocketAddr), ServerError> {
        let (socket, remote_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| ServerError::Transport(format!("accept failed: {e}")))?;

        let tls_stream = self
            .acceptor
            .accept(socket)
            .await
            .map_err(|e| ServerError::Transport(format!("TLS handshake failed: {e}")))?;

        Ok((tls_stream, remote_addr))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// Load TLS configuration from certificate and key files.
fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    use std::fs;

    let cert_pem = fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;
    let key_pem = fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))
}

/// Generate a self-signed certificate for testing.
fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("using self-signed certificate - not for production use!");

    Ok(config)
}
