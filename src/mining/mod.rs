//! Mining module for block creation

pub mod miner;

pub use miner::{BlockTemplate, Miner, MiningError, MiningStats};
