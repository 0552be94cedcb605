//! Peer management for P2P networking
//!
//! Tracks live connections and routes outbound messages to each peer's
//! writer task.

use crate::network::message::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Maximum number of connected peers
pub const MAX_PEERS: usize = 8;

/// Capacity of each peer's outbound queue
pub const PEER_QUEUE_SIZE: usize = 100;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Max peers reached")]
    MaxPeersReached,
    #[error("Already connected to {0}")]
    AlreadyConnected(SocketAddr),
}

/// Information about a connected peer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Peer's address
    pub addr: SocketAddr,
    /// Whether this is an outbound connection
    pub outbound: bool,
    pub connected_at: DateTime<Utc>,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr, outbound: bool) -> Self {
        Self {
            addr,
            outbound,
            connected_at: Utc::now(),
        }
    }
}

/// Handle for sending messages to a peer
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    pub async fn send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.send(msg).await.map_err(|_| PeerError::Disconnected)
    }
}

struct PeerEntry {
    info: PeerInfo,
    handle: PeerHandle,
}

/// Manages all peer connections
pub struct PeerManager {
    peers: RwLock<HashMap<SocketAddr, PeerEntry>>,
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerManager {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Add a new peer
    pub async fn add_peer(
        &self,
        addr: SocketAddr,
        handle: PeerHandle,
        outbound: bool,
    ) -> Result<(), PeerError> {
        let mut peers = self.peers.write().await;

        if peers.contains_key(&addr) {
            return Err(PeerError::AlreadyConnected(addr));
        }
        if peers.len() >= MAX_PEERS {
            return Err(PeerError::MaxPeersReached);
        }

        let info = PeerInfo::new(addr, outbound);
        peers.insert(addr, PeerEntry { info, handle });

        log::info!("Added peer: {} (outbound: {})", addr, outbound);
        Ok(())
    }

    /// Remove a peer
    pub async fn remove_peer(&self, addr: &SocketAddr) {
        if self.peers.write().await.remove(addr).is_some() {
            log::info!("Removed peer: {}", addr);
        }
    }

    /// Connected peers, ordered by address
    pub async fn get_peers(&self) -> Vec<PeerInfo> {
        let peers = self.peers.read().await;
        let mut infos: Vec<PeerInfo> = peers.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by_key(|info| info.addr);
        infos
    }

    /// Get peer count
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.peers.read().await.contains_key(addr)
    }

    /// Broadcast a message to all peers
    pub async fn broadcast(&self, msg: Message) {
        let peers = self.peers.read().await;
        for (addr, entry) in peers.iter() {
            if let Err(e) = entry.handle.send(msg.clone()).await {
                log::warn!("Failed to send to {}: {}", addr, e);
            }
        }
    }

    /// Send a message to a specific peer
    pub async fn send_to(&self, addr: &SocketAddr, msg: Message) -> Result<(), PeerError> {
        let peers = self.peers.read().await;
        match peers.get(addr) {
            Some(entry) => entry.handle.send(msg).await,
            None => Err(PeerError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(addr: SocketAddr) -> (PeerHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(PEER_QUEUE_SIZE);
        (PeerHandle { addr, tx }, rx)
    }

    #[tokio::test]
    async fn test_add_send_remove() {
        let manager = PeerManager::new();
        let addr: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        let (h, mut rx) = handle(addr);

        manager.add_peer(addr, h, true).await.unwrap();
        assert!(manager.is_connected(&addr).await);
        let peers = manager.get_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].addr, addr);
        assert!(peers[0].outbound);

        manager.send_to(&addr, Message::QueryAll).await.unwrap();
        assert_eq!(rx.recv().await, Some(Message::QueryAll));

        manager.remove_peer(&addr).await;
        assert_eq!(manager.peer_count().await, 0);
        assert!(!manager.is_connected(&addr).await);
        assert!(matches!(
            manager.send_to(&addr, Message::QueryAll).await,
            Err(PeerError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let manager = PeerManager::new();
        let mut receivers = Vec::new();
        for port in 7101..7104 {
            let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
            let (h, rx) = handle(addr);
            manager.add_peer(addr, h, false).await.unwrap();
            receivers.push(rx);
        }

        manager.broadcast(Message::QueryLatest).await;
        for rx in receivers.iter_mut() {
            assert_eq!(rx.recv().await, Some(Message::QueryLatest));
        }
    }

    #[tokio::test]
    async fn test_peer_limits() {
        let manager = PeerManager::new();
        let mut receivers = Vec::new();
        for port in 0..MAX_PEERS as u16 {
            let addr: SocketAddr = format!("127.0.0.1:{}", 7200 + port).parse().unwrap();
            let (h, rx) = handle(addr);
            manager.add_peer(addr, h, true).await.unwrap();
            receivers.push(rx);
        }

        let first: SocketAddr = "127.0.0.1:7200".parse().unwrap();
        let (dup, _rx) = handle(first);
        assert!(matches!(
            manager.add_peer(first, dup, true).await,
            Err(PeerError::AlreadyConnected(_))
        ));

        let extra: SocketAddr = "127.0.0.1:7999".parse().unwrap();
        let (h, _rx) = handle(extra);
        assert!(matches!(
            manager.add_peer(extra, h, true).await,
            Err(PeerError::MaxPeersReached)
        ));
    }
}
