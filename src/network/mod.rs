//! P2P Networking module
//!
//! Provides the peer reconciliation protocol that converges replicas on the
//! heaviest valid chain.
//!
//! # Features
//! - TCP peer connections with length-prefixed JSON frames
//! - Tip and full-chain queries
//! - Direct tip append, full-chain adoption by cumulative work
//! - Tip broadcast after every local or remote extension

pub mod message;
pub mod node;
pub mod peer;
pub mod server;
pub mod sync;

pub use message::{Message, MAGIC, MAX_MESSAGE_SIZE};
pub use node::{Node, NodeConfig, NodeError, NodeStatus};
pub use peer::{PeerError, PeerHandle, PeerInfo, PeerManager, MAX_PEERS};
pub use server::{connect_to_peer, MessageCodec, Server};
pub use sync::{ChainSync, SyncOutcome};
