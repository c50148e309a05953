use anyhow::Result;
use clap::Parser;
use ringkv::common::{NodeConfig, NodeRole};
use ringkv::node::NodeServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ringkv-node")]
#[command(about = "ringkv storage node - clustered KV with quorum replication")]
struct Args {
    /// Node ID (unique identifier for this node)
    #[arg(short, long, default_value = "node-1")]
    id: String,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:7001")]
    bind: SocketAddr,

    /// Data directory for the storage engine
    #[arg(short, long, default_value = "./data/node")]
    data_dir: PathBuf,

    /// Run as primary (originates replication); otherwise replica
    #[arg(long)]
    primary: bool,

    /// Comma-separated replica addresses (primary only)
    #[arg(long, value_delimiter = ',')]
    replicas: Vec<String>,

    /// Virtual points per node on the hash ring
    #[arg(long, default_value_t = 10)]
    virtual_nodes: usize,

    /// Membership filter: expected number of keys
    #[arg(long, default_value_t = 1_000_000)]
    filter_keys: usize,

    /// Membership filter: target false-positive rate
    #[arg(long, default_value_t = 0.01)]
    filter_fp_rate: f64,

    /// Per-replica acknowledgement timeout in milliseconds
    #[arg(long, default_value_t = 5_000)]
    ack_timeout_ms: u64,

    /// Replica connect timeout in milliseconds
    #[arg(long, default_value_t = 3_000)]
    connect_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let role = if args.primary {
        NodeRole::Primary
    } else {
        NodeRole::Replica
    };

    tracing::info!("Starting ringkv node");
    tracing::info!("Node ID: {}", args.id);
    tracing::info!("Listening on: {}", args.bind);
    tracing::info!("Role: {}", role);
    tracing::info!("Data directory: {}", args.data_dir.display());
    if !args.replicas.is_empty() {
        tracing::info!("Replicas: {}", args.replicas.join(", "));
    }

    tokio::fs::create_dir_all(&args.data_dir).await?;

    let config = NodeConfig {
        node_id: args.id,
        bind_addr: args.bind,
        data_dir: args.data_dir,
        role,
        replicas: args.replicas,
        virtual_nodes: args.virtual_nodes,
        filter_expected_keys: args.filter_keys,
        filter_fp_rate: args.filter_fp_rate,
        ack_timeout_ms: args.ack_timeout_ms,
        connect_timeout_ms: args.connect_timeout_ms,
    };

    let (server, handle) = NodeServer::bind(config).await?;

    // Ctrl-C triggers the orderly shutdown path: stop accepting, drain,
    // close the engine last.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = handle.shutdown().await;
        }
    });

    server.run().await?;
    Ok(())
}
