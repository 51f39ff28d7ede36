//! DCP chat protocol server.
//!
//! Production server implementation using TCP+TLS for transport, Tokio for
//! the async runtime, and system time with cryptographic RNG.
//!
//! # Architecture
//!
//! This crate provides production "glue" around [`dcp_core`]'s action-based
//! logic. [`ServerDriver`] follows the sans-IO pattern (see `dcp_core` for
//! details): it is a single state owner driven from one actor task, fed by
//! a channel that every connection task writes events to and reads encoded
//! outbound bytes back from. [`Server`] wires that actor up to a real
//! [`TcpTlsTransport`].
//!
//! # Components
//!
//! - [`ServerDriver`]: action-based orchestrator (pure logic, no I/O)
//! - [`Server`]: production runtime that executes `ServerDriver` actions
//! - [`TcpTlsTransport`]: TCP+TLS transport
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod credentials;
mod driver;
mod error;
mod motd;
mod registry;
mod server_error;
mod system_env;
mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dcp_proto::Dialect;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

pub use credentials::{AclRow, CredentialRecord, CredentialStore, InMemoryCredentialStore, StoreError};
pub use driver::{LogLevel, ServerAction, ServerConfig as DriverConfig, ServerDriver};
pub use error::ServerError;
pub use motd::Motd;
pub use registry::Registry;
pub use server_error::{ExecutorError, ServerError as DriverError};
pub use system_env::SystemEnv;
pub use transport::TcpTlsTransport;

/// Read buffer size for each connection's socket.
const READ_BUFFER: usize = 8192;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g. `"0.0.0.0:7700"`).
    pub bind_address: String,
    /// Path to TLS certificate (PEM format). `None` generates a self-signed
    /// certificate, for local testing only.
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format).
    pub key_path: Option<String>,
    /// Name this server announces as `=<name>` and in the `signon` frame.
    pub server_name: String,
    /// Required `servpass` value, if any.
    pub server_password: Option<String>,
    /// Path to a MOTD text file. `None` means no MOTD is configured.
    pub motd_path: Option<String>,
    /// Wire dialect this server speaks.
    pub dialect: Dialect,
    /// Maximum simultaneous connections; further accepts are dropped.
    pub max_connections: usize,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7700".to_string(),
            cert_path: None,
            key_path: None,
            server_name: "dcp".to_string(),
            server_password: None,
            motd_path: None,
            dialect: Dialect::Binary,
            max_connections: 10_000,
        }
    }
}

/// One message sent from a connection task (or the ticker) to the driver
/// actor.
enum DriverMessage {
    /// A socket finished its TLS handshake; register its outbound channel.
    Accept { session_id: u64, outbound: mpsc::UnboundedSender<Vec<u8>> },
    /// Bytes read off a session's socket.
    Bytes { session_id: u64, data: Vec<u8> },
    /// A session's socket closed.
    Closed { session_id: u64 },
    /// Periodic liveness/signon-timeout maintenance.
    Tick,
}

/// Production DCP server.
///
/// Wraps [`ServerDriver`] with a TCP+TLS transport and the system
/// environment. The driver runs on a single actor task; connection tasks
/// only read/write sockets and forward events/frames across channels,
/// which gives the driver exclusive, lock-free access to its registry and
/// connection map.
pub struct Server {
    transport: TcpTlsTransport,
    driver_tx: mpsc::UnboundedSender<DriverMessage>,
    next_session_id: Arc<AtomicU64>,
    active_connections: Arc<AtomicUsize>,
    max_connections: usize,
}

impl Server {
    /// Bind the transport and spawn the driver actor and ticker.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for a malformed bind address,
    /// unreadable TLS material, or an unreadable MOTD file, or
    /// [`ServerError::Transport`] if the socket cannot be bound.
    pub async fn bind<C>(config: ServerRuntimeConfig, store: Arc<C>) -> Result<Self, ServerError>
    where
        C: CredentialStore + 'static,
    {
        let transport = TcpTlsTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )
        .await?;

        let motd = match &config.motd_path {
            Some(path) => Motd::load(path)
                .map_err(|e| ServerError::Config(format!("failed to load motd '{path}': {e}")))?,
            None => Motd::none(),
        };

        let driver_config = DriverConfig {
            server_name: config.server_name.clone(),
            server_password: config.server_password.clone(),
            dialect: config.dialect,
        };
        let driver = ServerDriver::new(SystemEnv::new(), store, Arc::new(motd), driver_config);

        let (driver_tx, driver_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_driver_actor(driver, driver_rx));

        let ticker_tx = driver_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                interval.tick().await;
                if ticker_tx.send(DriverMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            transport,
            driver_tx,
            next_session_id: Arc::new(AtomicU64::new(1)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            max_connections: config.max_connections,
        })
    }

    /// Local address the transport is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if the bound socket's local
    /// address cannot be queried.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Accept connections until the transport errors.
    ///
    /// This method runs until the server is shut down or an error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if accepting a new connection
    /// fails unrecoverably.
    pub async fn run(&self) -> Result<(), ServerError> {
        loop {
            let (tls_stream, remote_addr) = self.transport.accept().await?;

            if self.active_connections.load(Ordering::Relaxed) >= self.max_connections {
                tracing::warn!("rejecting {remote_addr}: at max_connections ({})", self.max_connections);
                drop(tls_stream);
                continue;
            }

            let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
            self.active_connections.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("accepted {remote_addr} as session {session_id}");

            let driver_tx = self.driver_tx.clone();
            let active_connections = Arc::clone(&self.active_connections);
            tokio::spawn(async move {
                handle_connection(session_id, tls_stream, driver_tx).await;
                active_connections.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}

/// Read and write one connection's socket, forwarding events to the driver
/// actor and outbound bytes back to the socket.
async fn handle_connection(
    session_id: u64,
    stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    driver_tx: mpsc::UnboundedSender<DriverMessage>,
) {
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    if driver_tx.send(DriverMessage::Accept { session_id, outbound: outbound_tx }).is_err() {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if driver_tx
                    .send(DriverMessage::Bytes { session_id, data: buf[..n].to_vec() })
                    .is_err()
                {
                    break;
                }
            },
        }
    }

    let _ = driver_tx.send(DriverMessage::Closed { session_id });
    writer.abort();
}

/// The driver actor: owns the one [`ServerDriver`] and the map of outbound
/// channels, and processes every connection event sequentially.
async fn run_driver_actor<C>(
    mut driver: ServerDriver<SystemEnv, C>,
    mut rx: mpsc::UnboundedReceiver<DriverMessage>,
) where
    C: CredentialStore,
{
    let mut outbound: HashMap<u64, mpsc::UnboundedSender<Vec<u8>>> = HashMap::new();

    while let Some(message) = rx.recv().await {
        let actions = match message {
            DriverMessage::Accept { session_id, outbound: tx } => {
                outbound.insert(session_id, tx);
                driver.accept(session_id)
            },
            DriverMessage::Bytes { session_id, data } => driver.ingest(session_id, &data).await,
            DriverMessage::Closed { session_id } => {
                outbound.remove(&session_id);
                driver.disconnect(session_id)
            },
            DriverMessage::Tick => driver.tick(),
        };

        execute_actions(&driver, &mut outbound, actions);
    }
}

/// Turn [`ServerAction`]s into socket writes, channel teardown, or log
/// lines.
fn execute_actions(
    driver: &ServerDriver<SystemEnv, impl CredentialStore>,
    outbound: &mut HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>,
    actions: Vec<ServerAction>,
) {
    for action in actions {
        match action {
            ServerAction::Send { session_id, frame } => {
                let Some(encoded) = driver.encode(session_id, &frame) else { continue };
                match encoded {
                    Ok(bytes) => {
                        if let Some(tx) = outbound.get(&session_id) {
                            let _ = tx.send(bytes);
                        }
                    },
                    Err(err) => tracing::warn!("failed to encode frame for session {session_id}: {err}"),
                }
            },
            ServerAction::Close { session_id } => {
                outbound.remove(&session_id);
            },
            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
        }
    }
}
