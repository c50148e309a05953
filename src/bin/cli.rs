//! Routing-aware client CLI: builds the hash ring from the member list,
//! routes the key to its owning node, and speaks the wire protocol to it.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ringkv::node::{NodeClient, WireMessage};
use ringkv::router::{Router, VIRTUAL_NODES};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ringkv")]
#[command(about = "ringkv client - routes keys onto the cluster and runs KV ops")]
struct Args {
    /// Comma-separated live node addresses (host:port)
    #[arg(short, long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value under a key
    Put { key: String, value: String },
    /// Fetch the value of a key
    Get { key: String },
    /// Remove a key
    Delete { key: String },
    /// Show which nodes a key would be placed on
    Route {
        key: String,
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
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

    let router = Router::with_nodes(VIRTUAL_NODES, &args.nodes);
    let timeout = Duration::from_millis(args.timeout_ms);

    match args.command {
        Command::Put { key, value } => {
            let response = call(&router, &key, timeout, WireMessage::put(&key, value.into_bytes())).await?;
            report(&response);
        }
        Command::Get { key } => {
            let response = call(&router, &key, timeout, WireMessage::get(&key)).await?;
            if response.status_code == 200 {
                match response.value.as_deref().map(String::from_utf8_lossy) {
                    Some(text) => println!("{}", text),
                    None => println!(),
                }
            } else {
                report(&response);
            }
        }
        Command::Delete { key } => {
            let response = call(&router, &key, timeout, WireMessage::delete(&key)).await?;
            report(&response);
        }
        Command::Route { key, count } => {
            let placement = router.route_with_replicas(&key, count);
            if placement.is_empty() {
                bail!("routing failed: no nodes registered");
            }
            for (i, addr) in placement.iter().enumerate() {
                if i == 0 {
                    println!("{} (owner)", addr);
                } else {
                    println!("{}", addr);
                }
            }
        }
    }

    Ok(())
}

/// Route the key, dial the owning node, run one request.
async fn call(
    router: &Router,
    key: &str,
    timeout: Duration,
    msg: WireMessage,
) -> Result<WireMessage> {
    // A routing failure (empty ring) is distinct from a missing key.
    let owner = router.route(key)?;
    tracing::debug!(key, owner = %owner, "routed");

    let mut client = NodeClient::connect(&owner, timeout).await?;
    Ok(client.call(&msg, timeout).await?)
}

fn report(response: &WireMessage) {
    match response.status_code {
        200 => println!("OK: {}", response.message),
        202 => println!("PARTIAL: {}", response.message),
        404 => println!("NOT FOUND: {}", response.message),
        code => println!("ERROR {}: {}", code, response.message),
    }
}
