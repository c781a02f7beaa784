//! PublicTunnel CLI
//!
//! `publictunnel server` runs the relay; `publictunnel client` exposes a local port through it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use publictunnel_client::{ClientConfig, TunnelClient};
use publictunnel_server_http::{ServerConfig, TunnelServer};
use tracing::{error, info};
use tracing_subscriber::prelude::*;

/// PublicTunnel - expose local HTTP services on a public subdomain
#[derive(Parser, Debug)]
#[command(name = "publictunnel")]
#[command(about = "Expose local HTTP services on a public subdomain", long_about = None)]
#[command(version = env!("PUBLICTUNNEL_VERSION"))]
#[command(long_version = concat!(
    env!("PUBLICTUNNEL_VERSION"),
    " (",
    env!("PUBLICTUNNEL_COMMIT"),
    ", built ",
    env!("PUBLICTUNNEL_BUILD_DATE"),
    ")"
))]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay server
    #[command(long_about = r#"
Run the relay server. One listener serves the status page and the /ws
control endpoint on the server's own names, and relays traffic for
<subdomain>.<tunnel-domain> to the owning client.

EXAMPLES:
  # Local development: tunnels at http://<name>.localhost:4000
  publictunnel server --domain localhost --tunnel-domain localhost

ENVIRONMENT VARIABLES:
  PUBLICTUNNEL_DOMAIN         Control domain
  PUBLICTUNNEL_TUNNEL_DOMAIN  Base domain for tunnels
  PUBLICTUNNEL_PORT           Listen port
    "#)]
    Server {
        /// Domain the server itself is reached on
        #[arg(long, env = "PUBLICTUNNEL_DOMAIN", default_value = "server.publictunnel.com")]
        domain: String,

        /// Base domain tunnels are published under
        #[arg(long, env = "PUBLICTUNNEL_TUNNEL_DOMAIN", default_value = "publictunnel.com")]
        tunnel_domain: String,

        /// Port to listen on
        #[arg(short, long, env = "PUBLICTUNNEL_PORT", default_value = "4000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },

    /// Expose a local port through a relay server
    #[command(long_about = r#"
Connect to a relay server and forward every request for the assigned
subdomain to http://localhost:<port>. Exits when the connection drops.

EXAMPLES:
  publictunnel client --port 3000 --subdomain demo
  publictunnel client --server http://localhost:4000 --port 3000

ENVIRONMENT VARIABLES:
  PUBLICTUNNEL_SERVER      Relay server URL
  PUBLICTUNNEL_LOCAL_PORT  Local port to forward to
  PUBLICTUNNEL_SUBDOMAIN   Requested subdomain
    "#)]
    Client {
        /// Relay server URL
        #[arg(long, env = "PUBLICTUNNEL_SERVER", default_value = "https://server.publictunnel.com")]
        server: String,

        /// Local port to forward to
        #[arg(short, long, env = "PUBLICTUNNEL_LOCAL_PORT", default_value = "8080")]
        port: u16,

        /// Request a specific subdomain
        #[arg(short, long, env = "PUBLICTUNNEL_SUBDOMAIN")]
        subdomain: Option<String>,
    },
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn run_server(domain: String, tunnel_domain: String, port: u16, bind: String) -> Result<()> {
    let config = ServerConfig::builder()
        .domain(domain)
        .tunnel_domain(tunnel_domain)
        .bind_host(bind)
        .port(port)
        .build()
        .map_err(anyhow::Error::msg)
        .context("Invalid server configuration")?;

    let server = TunnelServer::new(config);

    tokio::select! {
        result = server.start() => {
            result.context("Server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    Ok(())
}

async fn run_client(server: String, port: u16, subdomain: Option<String>) -> Result<()> {
    let config = ClientConfig::builder()
        .server_url(server)
        .local_port(port)
        .subdomain(subdomain)
        .build()
        .map_err(anyhow::Error::msg)
        .context("Invalid client configuration")?;

    let client = TunnelClient::new(config).context("Failed to create client")?;

    tokio::select! {
        result = client.run() => {
            result.context("Client failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // wss:// dials go through rustls, which needs a process-wide provider
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let result = match cli.command {
        Commands::Server {
            domain,
            tunnel_domain,
            port,
            bind,
        } => run_server(domain, tunnel_domain, port, bind).await,
        Commands::Client {
            server,
            port,
            subdomain,
        } => run_client(server, port, subdomain).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
