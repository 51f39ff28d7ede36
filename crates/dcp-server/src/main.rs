//! DCP server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! dcp-server --bind 0.0.0.0:7700 --name irc
//!
//! # Start with TLS certificate (production)
//! dcp-server --bind 0.0.0.0:7700 --name irc --cert cert.pem --key key.pem
//! ```

use std::sync::Arc;

use clap::Parser;
use dcp_server::{InMemoryCredentialStore, Server, ServerRuntimeConfig};
use dcp_proto::Dialect;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// DCP chat protocol server
#[derive(Parser, Debug)]
#[command(name = "dcp-server")]
#[command(about = "DCP chat protocol server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7700")]
    bind: String,

    /// Server name, announced as `=<name>` and in the signon frame
    #[arg(short, long, default_value = "dcp")]
    name: String,

    /// Required `servpass` value; omit to allow signon/register without one
    #[arg(long)]
    server_password: Option<String>,

    /// Path to a MOTD text file
    #[arg(long)]
    motd: Option<String>,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Speak the JSON wire dialect instead of the binary one
    #[arg(long)]
    json: bool,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("dcp-server starting");
    tracing::info!("binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided - using self-signed certificate");
        tracing::warn!("this is NOT suitable for production use!");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        server_name: args.name,
        server_password: args.server_password,
        motd_path: args.motd,
        dialect: if args.json { Dialect::Json } else { Dialect::Binary },
        max_connections: args.max_connections,
    };

    let store = Arc::new(InMemoryCredentialStore::new());
    let server = Server::bind(config, store).await?;

    tracing::info!("server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
