//! Powchain node CLI
//!
//! Starts a ledger node (P2P listener plus HTTP control surface) or prints a
//! fresh wallet key.

use clap::{Args, Parser, Subcommand};
use powchain::api::{create_router, ApiState};
use powchain::network::{Node, NodeConfig};
use powchain::wallet::Wallet;
use std::future::IntoFuture;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "powchain")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A minimal proof-of-work ledger node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node
    Start(StartArgs),

    /// Generate a wallet key pair
    Keygen,
}

#[derive(Args)]
struct StartArgs {
    /// Port for peer connections
    #[arg(long, env = "P2P_PORT", default_value = "6001")]
    p2p_port: u16,

    /// Port for the HTTP API
    #[arg(long, env = "HTTP_PORT", default_value = "3001")]
    http_port: u16,

    /// Comma-separated peers to connect to (host:port)
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Hex private key of the node wallet (random if omitted)
    #[arg(long, env = "WALLET_KEY", hide_env_values = true)]
    wallet_key: Option<String>,
}

impl From<StartArgs> for NodeConfig {
    fn from(args: StartArgs) -> Self {
        NodeConfig {
            p2p_port: args.p2p_port,
            http_port: args.http_port,
            bootstrap_peers: args
                .peers
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            wallet_key: args.wallet_key,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            let wallet = Wallet::new();
            println!("Address:     {}", wallet.address());
            println!("Private key: {}", wallet.private_key());
            Ok(())
        }
        Commands::Start(args) => run_node(args.into()),
    }
}

fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let node = Arc::new(Node::new(config.clone())?);
        if !config.bootstrap_peers.is_empty() {
            log::info!("Bootstrap peers: {:?}", config.bootstrap_peers);
        }

        let p2p_node = Arc::clone(&node);
        let mut p2p_task = tokio::spawn(async move { p2p_node.start().await });

        let addr = format!("0.0.0.0:{}", config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("HTTP API listening on http://{}", addr);

        let shutdown_node = Arc::clone(&node);
        let server = axum::serve(listener, create_router(ApiState::new(node)))
            .with_graceful_shutdown(async move {
                tokio::signal::ctrl_c().await.ok();
                log::info!("Shutting down...");
                shutdown_node.shutdown();
            })
            .into_future();

        tokio::select! {
            res = server => res?,
            res = &mut p2p_task => res??,
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
