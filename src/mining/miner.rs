//! Mining engine for the ledger
//!
//! Mining works on a template snapshotted from the chain, so the nonce
//! search runs on a blocking thread without holding the chain lock. The
//! search watches the published tip hash and gives up as soon as the tip
//! moves away from the template's base.

use crate::core::block::MAX_DIFFICULTY;
use crate::core::{now_millis, Block, Blockchain, ChainError, Transaction};
use log::{debug, info};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

/// Mining errors
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Mining preempted: the chain tip changed")]
    Preempted,
    #[error("Difficulty {0} cannot be met by a 256-bit digest")]
    Unsatisfiable(u32),
    #[error("Mined block rejected: {0}")]
    Rejected(#[from] ChainError),
    #[error("Mining task failed: {0}")]
    TaskFailed(String),
}

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

impl MiningStats {
    fn new(hash_attempts: u64, start: Instant) -> Self {
        let time_ms = start.elapsed().as_millis();
        let hash_rate = if time_ms > 0 {
            (hash_attempts as f64) / (time_ms as f64 / 1000.0)
        } else {
            hash_attempts as f64
        };
        Self {
            hash_attempts,
            time_ms,
            hash_rate,
        }
    }
}

/// Everything fixed before the nonce search starts
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: i64,
    pub data: Vec<Transaction>,
    pub difficulty: u32,
}

/// Miner for creating new blocks
#[derive(Debug, Clone, Default)]
pub struct Miner {
    /// Address credited by the coinbase, if any
    pub reward_address: Option<String>,
}

impl Miner {
    /// Create a miner paying block rewards to `address`
    pub fn new(address: &str) -> Self {
        Self {
            reward_address: Some(address.to_string()),
        }
    }

    /// A miner that mines payloads as given, with no coinbase
    pub fn without_reward() -> Self {
        Self::default()
    }

    /// Snapshot a template extending the tip of `blockchain`
    pub fn template(&self, blockchain: &Blockchain, payload: Vec<Transaction>) -> BlockTemplate {
        let tip = blockchain.latest_block();
        let index = tip.index + 1;

        let mut data = Vec::with_capacity(payload.len() + 1);
        if let Some(address) = &self.reward_address {
            data.push(Transaction::coinbase(address, index));
        }
        data.extend(payload);

        BlockTemplate {
            index,
            previous_hash: tip.hash.clone(),
            timestamp: now_millis(),
            data,
            difficulty: blockchain.next_difficulty(),
        }
    }

    /// Run the nonce search on the current thread until found or stopped
    pub fn mine_template<F>(
        template: BlockTemplate,
        should_stop: F,
    ) -> Result<(Block, MiningStats), MiningError>
    where
        F: FnMut() -> bool,
    {
        if template.difficulty > MAX_DIFFICULTY {
            return Err(MiningError::Unsatisfiable(template.difficulty));
        }

        let start = Instant::now();
        info!(
            "Mining block {} with difficulty {}...",
            template.index, template.difficulty
        );

        let block = Block::mine_until(
            template.index,
            &template.previous_hash,
            template.timestamp,
            template.data,
            template.difficulty,
            should_stop,
        )
        .ok_or(MiningError::Preempted)?;

        let stats = MiningStats::new(block.nonce.saturating_add(1), start);
        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            block.index, stats.time_ms, stats.hash_attempts, stats.hash_rate
        );
        Ok((block, stats))
    }

    /// Mine a block without holding the blockchain lock.
    ///
    /// The search runs on a blocking thread and stops once `tip` publishes a
    /// hash other than the template's previous hash. The caller must then
    /// add the block to the chain under the write lock.
    pub async fn mine_detached(
        &self,
        template: BlockTemplate,
        tip: watch::Receiver<String>,
    ) -> Result<(Block, MiningStats), MiningError> {
        let base = template.previous_hash.clone();
        let result = tokio::task::spawn_blocking(move || {
            Self::mine_template(template, || *tip.borrow() != base)
        })
        .await
        .map_err(|e| MiningError::TaskFailed(e.to_string()))?;

        if let Err(MiningError::Preempted) = &result {
            debug!("Abandoned mining: a new tip arrived");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::COINBASE_AMOUNT;
    use crate::crypto::KeyPair;

    #[test]
    fn test_template_prepends_coinbase() {
        let address = KeyPair::generate().address();
        let chain = Blockchain::new();
        let template = Miner::new(&address).template(&chain, Vec::new());

        assert_eq!(template.index, 1);
        assert_eq!(template.previous_hash, chain.latest_block().hash);
        assert_eq!(template.data.len(), 1);
        assert!(template.data[0].is_coinbase());

        let bare = Miner::without_reward().template(&chain, Vec::new());
        assert!(bare.data.is_empty());
    }

    #[test]
    fn test_mined_block_extends_chain() {
        let address = KeyPair::generate().address();
        let mut chain = Blockchain::new();
        let miner = Miner::new(&address);

        let template = miner.template(&chain, Vec::new());
        let (block, stats) = Miner::mine_template(template, || false).unwrap();
        assert!(stats.hash_attempts > 0);
        assert!(block.has_valid_pow());

        chain.add_block(block).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.balance(&address), COINBASE_AMOUNT);
    }

    #[test]
    fn test_unsatisfiable_difficulty() {
        let mut template = Miner::without_reward().template(&Blockchain::new(), Vec::new());
        template.difficulty = MAX_DIFFICULTY + 1;
        assert!(matches!(
            Miner::mine_template(template, || false),
            Err(MiningError::Unsatisfiable(_))
        ));
    }

    #[tokio::test]
    async fn test_mine_detached() {
        let chain = Blockchain::new();
        let miner = Miner::without_reward();
        let (_tx, rx) = watch::channel(chain.latest_block().hash.clone());

        let template = miner.template(&chain, Vec::new());
        let (block, _) = miner.mine_detached(template, rx).await.unwrap();
        assert_eq!(block.previous_hash, chain.latest_block().hash);
    }

    #[tokio::test]
    async fn test_tip_change_preempts_mining() {
        let chain = Blockchain::new();
        let miner = Miner::without_reward();
        let (tx, rx) = watch::channel(chain.latest_block().hash.clone());

        let mut template = miner.template(&chain, Vec::new());
        // Far beyond anything reachable in a test run
        template.difficulty = 200;
        tx.send("ab".repeat(32)).unwrap();

        assert!(matches!(
            miner.mine_detached(template, rx).await,
            Err(MiningError::Preempted)
        ));
    }
}
