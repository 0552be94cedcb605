//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model with secp256k1 signatures and a coinbase reward)
//! - Blocks (with proof of work and successor validation)
//! - UTXO set projection
//! - Blockchain (append, validation, difficulty, heaviest-chain adoption)

pub mod block;
pub mod blockchain;
pub mod transaction;
pub mod utxo;

pub use block::{
    now_millis, Block, BlockError, GENESIS_HASH, GENESIS_TIMESTAMP, MAX_TIMESTAMP_DRIFT_MS,
    PREEMPTION_CHECK_INTERVAL,
};
pub use blockchain::{
    block_work, cumulative_work, next_difficulty, validate_chain, Blockchain, ChainError,
    ValidatedChain, BLOCK_GENERATION_INTERVAL_MS, DIFFICULTY_ADJUSTMENT_INTERVAL,
};
pub use transaction::{
    validate_address, Transaction, TransactionError, TxIn, TxOut, UnspentTxOut, COINBASE_AMOUNT,
};
pub use utxo::{apply_block, UtxoSet};
