//! Powchain: a minimal proof-of-work ledger node
//!
//! This crate provides:
//! - SHA-256 proof of work counted in leading zero bits, with retargeting
//! - ECDSA signatures (secp256k1) over a UTXO transaction model
//! - Whole-chain validation and heaviest-chain (cumulative work) fork choice
//! - A cancellable background miner
//! - Peer reconciliation over TCP and a small HTTP control surface
//!
//! # Example
//!
//! ```rust
//! use powchain::core::Blockchain;
//! use powchain::mining::Miner;
//! use powchain::wallet::Wallet;
//!
//! let mut blockchain = Blockchain::new();
//! let wallet = Wallet::new();
//!
//! // Mine a block paying the reward to the wallet
//! let miner = Miner::new(&wallet.address());
//! let template = miner.template(&blockchain, vec![]);
//! let (block, stats) = Miner::mine_template(template, || false).unwrap();
//! println!("Mined block {} in {}ms", block.index, stats.time_ms);
//!
//! blockchain.add_block(block).unwrap();
//! assert_eq!(wallet.balance(&blockchain.utxos()), 50);
//! ```

pub mod api;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod wallet;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{Block, Blockchain, Transaction, UtxoSet};
pub use crypto::KeyPair;
pub use mining::Miner;
pub use network::{Node, NodeConfig};
pub use wallet::Wallet;
