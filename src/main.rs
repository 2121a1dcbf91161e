use std::net::SocketAddr;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use frameproxy::{ProxyConfig, spawn_proxy};

#[derive(Parser, Debug)]
#[command(name = "frameproxy", about = "Embedding web proxy for iframe rendering")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "FRAMEPROXY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Hourly request cap per client for rate-guarded hosts.
    #[arg(long, env = "FRAMEPROXY_HOURLY_CAP", default_value_t = 60)]
    hourly_cap: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let handle = spawn_proxy(ProxyConfig {
        bind_addr: args.bind,
        hourly_cap: args.hourly_cap,
    })
    .await?;
    info!(addr = %handle.addr, "frameproxy listening");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
