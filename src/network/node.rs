//! P2P Node implementation
//!
//! The node wires the chain, the peer set, the wallet and the miner
//! together: it accepts and dials peer connections, funnels every inbound
//! message into one loop, and exposes mining and status to the API.

use crate::core::{Block, Blockchain, Transaction};
use crate::mining::{Miner, MiningError};
use crate::network::message::Message;
use crate::network::peer::{PeerError, PeerManager};
use crate::network::server::{connect_to_peer, handle_connection, Server};
use crate::network::sync::ChainSync;
use crate::wallet::{Wallet, WalletError};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

/// Capacity of the inbound message queue shared by all connections
const MESSAGE_QUEUE_SIZE: usize = 1000;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),
    #[error("Node is already running")]
    AlreadyRunning,
}

/// P2P Node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Port for peer connections
    pub p2p_port: u16,
    /// Port for the HTTP control surface
    pub http_port: u16,
    /// Initial peers to connect to (`host:port`)
    pub bootstrap_peers: Vec<String>,
    /// Hex private key of the node wallet; a fresh key when absent
    pub wallet_key: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            p2p_port: 6001,
            http_port: 3001,
            bootstrap_peers: Vec::new(),
            wallet_key: None,
        }
    }
}

/// Node status information
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub height: u64,
    pub tip_hash: String,
    pub next_difficulty: u32,
    pub cumulative_work: u128,
    pub peers: usize,
    pub address: String,
}

/// The main P2P node
pub struct Node {
    pub config: NodeConfig,
    pub chain_sync: Arc<ChainSync>,
    pub peer_manager: Arc<PeerManager>,
    pub wallet: Wallet,
    miner: Miner,
    message_tx: mpsc::Sender<(SocketAddr, Message)>,
    message_rx: Mutex<Option<mpsc::Receiver<(SocketAddr, Message)>>>,
    shutdown: Notify,
}

impl Node {
    /// Create a node holding only the genesis block
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let wallet = match &config.wallet_key {
            Some(key) => Wallet::from_private_key(key)?,
            None => Wallet::new(),
        };
        let miner = Miner::new(&wallet.address());
        let peer_manager = Arc::new(PeerManager::new());
        let chain_sync = Arc::new(ChainSync::new(Blockchain::new(), Arc::clone(&peer_manager)));
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_QUEUE_SIZE);

        log::info!("Node wallet address: {}", wallet.address());

        Ok(Self {
            config,
            chain_sync,
            peer_manager,
            wallet,
            miner,
            message_tx,
            message_rx: Mutex::new(Some(message_rx)),
            shutdown: Notify::new(),
        })
    }

    /// Bind the P2P port and start accepting connections.
    ///
    /// Returns the bound port, which differs from the configured one only
    /// when that was 0.
    pub async fn listen(&self) -> Result<(u16, JoinHandle<()>), NodeError> {
        let server = Server::bind(self.config.p2p_port).await?;
        let port = server.port();

        let peer_manager = Arc::clone(&self.peer_manager);
        let message_tx = self.message_tx.clone();
        let acceptor = tokio::spawn(async move {
            loop {
                match server.accept().await {
                    Ok((stream, addr)) => {
                        log::info!("Incoming connection from {}", addr);
                        let pm = Arc::clone(&peer_manager);
                        let tx = message_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, pm, tx, false).await {
                                log::warn!("Connection error with {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok((port, acceptor))
    }

    /// Start the node: listen, dial bootstrap peers, then process messages
    /// until [`Node::shutdown`] is called.
    pub async fn start(&self) -> Result<(), NodeError> {
        let (port, acceptor) = self.listen().await?;
        log::info!("Node started on port {}", port);

        for peer_addr in &self.config.bootstrap_peers {
            if let Err(e) = self.connect_to(peer_addr).await {
                log::warn!("Failed to connect to bootstrap peer {}: {}", peer_addr, e);
            }
        }

        let result = self.run().await;
        acceptor.abort();
        result
    }

    /// Process inbound peer messages until shutdown
    pub async fn run(&self) -> Result<(), NodeError> {
        let mut message_rx = self
            .message_rx
            .lock()
            .await
            .take()
            .ok_or(NodeError::AlreadyRunning)?;

        loop {
            tokio::select! {
                Some((from, msg)) = message_rx.recv() => {
                    self.chain_sync.handle_message(from, msg).await;
                }
                _ = self.shutdown.notified() => {
                    log::info!("Node shutting down...");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Connect to a peer
    pub async fn connect_to(&self, addr: &str) -> Result<SocketAddr, NodeError> {
        log::info!("Connecting to peer: {}", addr);

        let (stream, peer_addr) = connect_to_peer(addr).await?;
        if self.peer_manager.is_connected(&peer_addr).await {
            return Err(PeerError::AlreadyConnected(peer_addr).into());
        }
        let pm = Arc::clone(&self.peer_manager);
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, pm, message_tx, true).await {
                log::warn!("Connection error with {}: {}", peer_addr, e);
            }
        });

        Ok(peer_addr)
    }

    /// Mine `payload` into a block paying the reward to the node wallet
    pub async fn mine_block(&self, payload: Vec<Transaction>) -> Result<Block, NodeError> {
        let (block, _stats) = self.chain_sync.mine_block(&self.miner, payload).await?;
        Ok(block)
    }

    /// Pay `amount` to `address` from the node wallet and mine the payment
    pub async fn mine_transaction(&self, address: &str, amount: u64) -> Result<Block, NodeError> {
        let utxos = self.chain_sync.snapshot().await.utxos();
        let tx = self.wallet.create_transaction(address, amount, &utxos)?;
        log::info!("Created payment {} of {} to {}", tx.id, amount, address);
        self.mine_block(vec![tx]).await
    }

    /// Get node status
    pub async fn status(&self) -> NodeStatus {
        let chain = self.chain_sync.snapshot().await;
        NodeStatus {
            height: chain.height(),
            tip_hash: chain.latest_block().hash.clone(),
            next_difficulty: chain.next_difficulty(),
            cumulative_work: chain.cumulative_work(),
            peers: self.peer_manager.peer_count().await,
            address: self.wallet.address(),
        }
    }

    /// Stop the message loop
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::COINBASE_AMOUNT;
    use std::time::Duration;

    fn test_config() -> NodeConfig {
        NodeConfig {
            p2p_port: 0,
            http_port: 0,
            ..Default::default()
        }
    }

    async fn spawn_node() -> (Arc<Node>, u16) {
        let node = Arc::new(Node::new(test_config()).unwrap());
        let (port, _acceptor) = node.listen().await.unwrap();
        let runner = Arc::clone(&node);
        tokio::spawn(async move { runner.run().await });
        (node, port)
    }

    async fn wait_for_height(node: &Node, height: u64) -> bool {
        for _ in 0..100 {
            if node.status().await.height >= height {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    async fn wait_for_peers(node: &Node, count: usize) -> bool {
        for _ in 0..100 {
            if node.peer_manager.peer_count().await >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_node_creation() {
        let node = Node::new(test_config()).unwrap();
        let status = node.status().await;

        assert_eq!(status.height, 0);
        assert_eq!(status.peers, 0);
        assert_eq!(status.cumulative_work, 1);
    }

    #[tokio::test]
    async fn test_wallet_key_from_config() {
        let wallet = Wallet::new();
        let config = NodeConfig {
            wallet_key: Some(wallet.private_key()),
            ..test_config()
        };
        assert_eq!(Node::new(config).unwrap().wallet.address(), wallet.address());

        let bad = NodeConfig {
            wallet_key: Some("nope".to_string()),
            ..test_config()
        };
        assert!(matches!(Node::new(bad), Err(NodeError::Wallet(_))));
    }

    #[tokio::test]
    async fn test_mine_and_pay() {
        let node = Node::new(test_config()).unwrap();
        node.mine_block(Vec::new()).await.unwrap();
        assert_eq!(node.status().await.height, 1);

        let recipient = Wallet::new().address();
        let block = node.mine_transaction(&recipient, 20).await.unwrap();
        assert_eq!(block.data.len(), 2);

        let utxos = node.chain_sync.snapshot().await.utxos();
        assert_eq!(utxos.balance(&recipient), 20);
        assert_eq!(node.wallet.balance(&utxos), 2 * COINBASE_AMOUNT - 20);

        assert!(matches!(
            node.mine_transaction(&recipient, 10_000).await,
            Err(NodeError::Wallet(WalletError::InsufficientFunds { .. }))
        ));
    }

    #[tokio::test]
    async fn test_two_nodes_converge() {
        let (a, a_port) = spawn_node().await;
        let (b, _) = spawn_node().await;

        // A is ahead before the peers meet
        a.mine_block(Vec::new()).await.unwrap();

        b.connect_to(&format!("127.0.0.1:{}", a_port)).await.unwrap();
        assert!(wait_for_height(&b, 1).await);

        // Blocks mined afterwards are pushed as new tips
        a.mine_block(Vec::new()).await.unwrap();
        assert!(wait_for_height(&b, 2).await);
        assert_eq!(a.status().await.tip_hash, b.status().await.tip_hash);

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_dial_rejected() {
        let (a, a_port) = spawn_node().await;
        let (b, _) = spawn_node().await;
        let target = format!("127.0.0.1:{}", a_port);

        let addr = b.connect_to(&target).await.unwrap();
        assert!(wait_for_peers(&b, 1).await);

        let peers = b.peer_manager.get_peers().await;
        assert_eq!(peers[0].addr, addr);
        assert!(peers[0].outbound);

        assert!(matches!(
            b.connect_to(&target).await,
            Err(NodeError::Peer(PeerError::AlreadyConnected(_)))
        ));
        assert_eq!(b.peer_manager.peer_count().await, 1);

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let (node, _) = spawn_node().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(node.run().await, Err(NodeError::AlreadyRunning)));
        node.shutdown();
    }
}
