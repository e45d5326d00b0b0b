//! Tessera registry server: the coordination store shards register
//! with and clients discover through.

use std::net::SocketAddr;

use anyhow::Context as _;
use clap::Parser;
use tessera_distributed::rpc::server::RegistryServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tessera-registry", about = "Tessera shard registry")]
struct Options {
    /// Port the registry listens on.
    #[arg(long, default_value_t = 9090, env = "TESSERA_REGISTRY_PORT")]
    port: u16,

    /// Base path namespacing this cluster's entries.
    #[arg(long, default_value = "/tessera", env = "TESSERA_REGISTRY_PATH")]
    base_path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr: SocketAddr = format!("0.0.0.0:{}", options.port)
        .parse()
        .context("invalid port")?;
    info!("registry for {} starting on {}", options.base_path, addr);
    RegistryServer::new(options.base_path)
        .start(addr)
        .await
        .context("registry server failed")?;
    Ok(())
}
