//! Blockchain implementation
//!
//! The chain is held as copy-on-write snapshots: `Arc<Vec<Block>>` for the
//! blocks and `Arc<UtxoSet>` for the projected ledger. Appending clones only
//! when a reader still holds the old snapshot, and replacement swaps both
//! `Arc`s together so readers never see blocks and UTXOs out of step.

use crate::core::block::{now_millis, Block, BlockError};
use crate::core::transaction::TransactionError;
use crate::core::utxo::{apply_block, UtxoSet};
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

/// Number of blocks between difficulty adjustments
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

/// Target time between blocks in milliseconds
pub const BLOCK_GENERATION_INTERVAL_MS: i64 = 10_000;

/// Chain-level errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Chain is empty")]
    EmptyChain,
    #[error("First block is not the genesis block")]
    GenesisMismatch,
    #[error("Invalid block {index}: {source}")]
    Block {
        index: u64,
        #[source]
        source: BlockError,
    },
    #[error("Invalid transactions in block {index}: {source}")]
    Transaction {
        index: u64,
        #[source]
        source: TransactionError,
    },
}

/// Work contributed by one block of the given difficulty
pub fn block_work(difficulty: u32) -> u128 {
    if difficulty >= u128::BITS {
        u128::MAX
    } else {
        1u128 << difficulty
    }
}

/// Total work of a chain: the sum of `2^difficulty`, saturating
pub fn cumulative_work(blocks: &[Block]) -> u128 {
    blocks
        .iter()
        .map(|block| block_work(block.difficulty))
        .fold(0u128, u128::saturating_add)
}

/// Difficulty expected for the block after the tip of `blocks`.
///
/// Every `DIFFICULTY_ADJUSTMENT_INTERVAL` blocks, the time since the block
/// one interval back (index `tip - N`) is compared with the expected time:
/// much faster raises the difficulty by one, much slower lowers it by one.
/// Otherwise the tip's difficulty carries over.
pub fn next_difficulty(blocks: &[Block]) -> u32 {
    let Some(tip) = blocks.last() else {
        return 0;
    };

    if tip.index == 0 || tip.index % DIFFICULTY_ADJUSTMENT_INTERVAL != 0 {
        return tip.difficulty;
    }

    let interval = DIFFICULTY_ADJUSTMENT_INTERVAL as usize;
    let Some(adjustment_base) = blocks
        .len()
        .checked_sub(interval + 1)
        .and_then(|i| blocks.get(i))
    else {
        return tip.difficulty;
    };

    let expected = BLOCK_GENERATION_INTERVAL_MS * DIFFICULTY_ADJUSTMENT_INTERVAL as i64;
    let actual = tip.timestamp.saturating_sub(adjustment_base.timestamp);

    if actual < expected / 2 {
        tip.difficulty.saturating_add(1)
    } else if actual > expected * 2 {
        tip.difficulty.saturating_sub(1)
    } else {
        tip.difficulty
    }
}

/// Validate a whole candidate chain on its own.
///
/// The first block must be the genesis block; every later block must be
/// well formed, extend its predecessor, and carry transactions valid against
/// the UTXO set projected so far. Returns the final projection.
pub fn validate_chain(blocks: &[Block], now_ms: i64) -> Result<UtxoSet, ChainError> {
    let genesis = blocks.first().ok_or(ChainError::EmptyChain)?;
    if !genesis.is_genesis() {
        return Err(ChainError::GenesisMismatch);
    }

    let mut utxos = UtxoSet::new();
    for pair in blocks.windows(2) {
        let (prev, block) = (&pair[0], &pair[1]);
        block
            .validate_structure()
            .and_then(|_| block.validate_successor(prev, now_ms))
            .map_err(|source| ChainError::Block {
                index: block.index,
                source,
            })?;
        utxos = apply_block(block, &utxos).map_err(|source| ChainError::Transaction {
            index: block.index,
            source,
        })?;
    }
    Ok(utxos)
}

/// A candidate chain that passed `validate_chain`, with its projected UTXO set
#[derive(Debug)]
pub struct ValidatedChain {
    blocks: Vec<Block>,
    utxos: UtxoSet,
    work: u128,
}

impl ValidatedChain {
    /// Validate `candidate` on its own, independent of any local state
    pub fn validate(candidate: Vec<Block>, now_ms: i64) -> Result<Self, ChainError> {
        let utxos = validate_chain(&candidate, now_ms)?;
        let work = cumulative_work(&candidate);
        Ok(Self {
            blocks: candidate,
            utxos,
            work,
        })
    }

    pub fn work(&self) -> u128 {
        self.work
    }

    pub fn height(&self) -> u64 {
        self.blocks.last().map(|b| b.index).unwrap_or_default()
    }
}

/// The local chain replica
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Arc<Vec<Block>>,
    utxos: Arc<UtxoSet>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Create a chain holding only the genesis block
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(vec![Block::genesis()]),
            utxos: Arc::new(UtxoSet::new()),
        }
    }

    /// Snapshot of the blocks
    pub fn blocks(&self) -> Arc<Vec<Block>> {
        Arc::clone(&self.blocks)
    }

    /// Snapshot of the unspent outputs
    pub fn utxos(&self) -> Arc<UtxoSet> {
        Arc::clone(&self.utxos)
    }

    /// Get the latest block
    pub fn latest_block(&self) -> &Block {
        self.blocks
            .last()
            .expect("Blockchain should have at least genesis block")
    }

    /// Get a block by index
    pub fn get_block(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    /// Index of the tip
    pub fn height(&self) -> u64 {
        self.latest_block().index
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Difficulty for the next block mined on this chain
    pub fn next_difficulty(&self) -> u32 {
        next_difficulty(&self.blocks)
    }

    pub fn cumulative_work(&self) -> u128 {
        cumulative_work(&self.blocks)
    }

    /// Spendable balance of `address`
    pub fn balance(&self, address: &str) -> u64 {
        self.utxos.balance(address)
    }

    /// Append a block that extends the tip
    pub fn add_block(&mut self, block: Block) -> Result<(), ChainError> {
        self.add_block_at(block, now_millis())
    }

    /// Append a block, judging timestamps against `now_ms`
    pub fn add_block_at(&mut self, block: Block, now_ms: i64) -> Result<(), ChainError> {
        let index = block.index;
        block
            .validate_structure()
            .and_then(|_| block.validate_successor(self.latest_block(), now_ms))
            .map_err(|source| ChainError::Block { index, source })?;

        let utxos = apply_block(&block, &self.utxos)
            .map_err(|source| ChainError::Transaction { index, source })?;

        info!("Appended block {} ({})", index, block.hash);
        Arc::make_mut(&mut self.blocks).push(block);
        self.utxos = Arc::new(utxos);
        Ok(())
    }

    /// Replace the chain with `candidate` if it is valid and strictly heavier.
    ///
    /// Returns `Ok(false)` when the candidate carries no more work than the
    /// local chain; the local chain is then left untouched.
    pub fn adopt(&mut self, candidate: Vec<Block>) -> Result<bool, ChainError> {
        self.adopt_at(candidate, now_millis())
    }

    pub fn adopt_at(&mut self, candidate: Vec<Block>, now_ms: i64) -> Result<bool, ChainError> {
        let local_work = self.cumulative_work();
        let candidate_work = cumulative_work(&candidate);
        if candidate_work <= local_work {
            info!(
                "Ignoring candidate chain: work {} does not exceed local {}",
                candidate_work, local_work
            );
            return Ok(false);
        }

        let validated = ValidatedChain::validate(candidate, now_ms).inspect_err(|err| {
            warn!("Rejected candidate chain: {}", err);
        })?;
        Ok(self.install(validated))
    }

    /// Swap in an already validated chain if it is still strictly heavier.
    ///
    /// The local chain may have grown since `validated` was checked, so the
    /// work comparison is repeated here.
    pub fn install(&mut self, validated: ValidatedChain) -> bool {
        let local_work = self.cumulative_work();
        if validated.work <= local_work {
            info!(
                "Ignoring candidate chain: work {} does not exceed local {}",
                validated.work, local_work
            );
            return false;
        }

        info!(
            "Replacing chain: height {} -> {}, work {} -> {}",
            self.height(),
            validated.height(),
            local_work,
            validated.work
        );
        self.blocks = Arc::new(validated.blocks);
        self.utxos = Arc::new(validated.utxos);
        true
    }
}
