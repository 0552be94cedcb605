//! Block implementation for the ledger
//!
//! A block links to its predecessor by hash and carries an ordered list of
//! transactions. Its hash commits to every field and must carry at least
//! `difficulty` leading zero bits.

use crate::core::transaction::{Transaction, TransactionError};
use crate::crypto::{hex_meets_difficulty, is_hex, sha256_hex};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Block Constants
// =============================================================================

/// Timestamp of the genesis block (epoch milliseconds)
pub const GENESIS_TIMESTAMP: i64 = 1_680_546_496_366;

/// Hash of the genesis block
pub const GENESIS_HASH: &str = "e54015fccf32d5ab77a9b4a1bb446fe655867bccf89d3b3dbbf59ed1a2e5dcc8";

/// Previous-hash marker carried only by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Allowed clock drift between a block and its predecessor or local time
pub const MAX_TIMESTAMP_DRIFT_MS: i64 = 60_000;

/// Nonces tried between two checks of the stop condition while mining
pub const PREEMPTION_CHECK_INTERVAL: u64 = 1024;

/// Length of a block hash in hex characters
pub const BLOCK_HASH_HEX_LEN: usize = 64;

/// Largest difficulty a 256-bit digest can satisfy
pub const MAX_DIFFICULTY: u32 = 256;

// =============================================================================
// Block Errors
// =============================================================================

/// Block validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("Malformed block: {0}")]
    Structural(String),
    #[error("Block {index} does not extend its predecessor: {reason}")]
    ChainLinkage { index: u64, reason: String },
    #[error("Block {index} hash does not meet difficulty {difficulty}")]
    ProofOfWork { index: u64, difficulty: u32 },
    #[error("Block {index} has out-of-range timestamp {timestamp}")]
    Timestamp { index: u64, timestamp: i64 },
    #[error("Block {index} hash does not match its contents")]
    HashMismatch { index: u64 },
}

impl From<TransactionError> for BlockError {
    fn from(err: TransactionError) -> Self {
        BlockError::Structural(err.to_string())
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A block in the chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Height, genesis is 0
    pub index: u64,
    /// Hash of the previous block, `"0"` for genesis
    pub previous_hash: String,
    /// Creation time in epoch milliseconds
    pub timestamp: i64,
    /// Ordered transactions
    pub data: Vec<Transaction>,
    /// Required leading zero bits of `hash`
    pub difficulty: u32,
    pub nonce: u64,
    /// Lowercase hex SHA-256 of all other fields
    pub hash: String,
}

impl Block {
    /// The genesis block, identical on every node
    pub fn genesis() -> Self {
        Self {
            index: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            timestamp: GENESIS_TIMESTAMP,
            data: Vec::new(),
            difficulty: 0,
            nonce: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Digest input for everything but the nonce, which always comes last
    fn hash_prefix(
        index: u64,
        previous_hash: &str,
        timestamp: i64,
        data: &[Transaction],
        difficulty: u32,
    ) -> String {
        let data_content: String = data.iter().map(Transaction::digest_content).collect();
        format!(
            "{}{}{}{}{}",
            index, previous_hash, timestamp, data_content, difficulty
        )
    }

    /// Calculate the hash of a block with the given fields.
    ///
    /// The preimage is the plain concatenation of the fields with no
    /// separators, so the literal genesis hash stays reproducible. Adjacent
    /// numeric fields are therefore not uniquely decodable from the preimage:
    /// difficulty 1 with nonce 23 hashes like difficulty 12 with nonce 3.
    /// Block validation still checks each field separately (linkage, index,
    /// and the claimed difficulty against the digest).
    pub fn calculate_hash(
        index: u64,
        previous_hash: &str,
        timestamp: i64,
        data: &[Transaction],
        difficulty: u32,
        nonce: u64,
    ) -> String {
        let prefix = Self::hash_prefix(index, previous_hash, timestamp, data, difficulty);
        sha256_hex(format!("{}{}", prefix, nonce).as_bytes())
    }

    /// Recompute this block's hash from its fields
    pub fn compute_hash(&self) -> String {
        Self::calculate_hash(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.data,
            self.difficulty,
            self.nonce,
        )
    }

    /// Verify the stored hash matches the block contents
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Check if the stored hash meets the block's difficulty
    pub fn has_valid_pow(&self) -> bool {
        hex_meets_difficulty(&self.hash, self.difficulty)
    }

    /// Mine a block: search nonces from 0 until the hash meets `difficulty`.
    ///
    /// The timestamp is fixed by the caller, so mining is deterministic.
    pub fn mine(
        index: u64,
        previous_hash: &str,
        timestamp: i64,
        data: Vec<Transaction>,
        difficulty: u32,
    ) -> Result<Self, BlockError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(BlockError::ProofOfWork { index, difficulty });
        }
        Self::mine_until(index, previous_hash, timestamp, data, difficulty, || false)
            .ok_or(BlockError::ProofOfWork { index, difficulty })
    }

    /// Interruptible nonce search.
    ///
    /// `should_stop` is polled every [`PREEMPTION_CHECK_INTERVAL`] nonces;
    /// returns `None` once it fires or the nonce space is exhausted.
    pub fn mine_until<F>(
        index: u64,
        previous_hash: &str,
        timestamp: i64,
        data: Vec<Transaction>,
        difficulty: u32,
        mut should_stop: F,
    ) -> Option<Self>
    where
        F: FnMut() -> bool,
    {
        let prefix = Self::hash_prefix(index, previous_hash, timestamp, &data, difficulty);
        let mut nonce = 0u64;

        loop {
            if nonce % PREEMPTION_CHECK_INTERVAL == 0 && should_stop() {
                return None;
            }

            let hash = sha256_hex(format!("{}{}", prefix, nonce).as_bytes());
            if hex_meets_difficulty(&hash, difficulty) {
                return Some(Self {
                    index,
                    previous_hash: previous_hash.to_string(),
                    timestamp,
                    data,
                    difficulty,
                    nonce,
                    hash,
                });
            }

            nonce = nonce.checked_add(1)?;
        }
    }

    /// Shape checks that need no context
    pub fn validate_structure(&self) -> Result<(), BlockError> {
        if self.hash.len() != BLOCK_HASH_HEX_LEN || !is_hex(&self.hash) {
            return Err(BlockError::Structural(format!(
                "block {} hash must be {} hex characters",
                self.index, BLOCK_HASH_HEX_LEN
            )));
        }

        let genesis_marker = self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH;
        let linked = self.previous_hash.len() == BLOCK_HASH_HEX_LEN && is_hex(&self.previous_hash);
        if !genesis_marker && !linked {
            return Err(BlockError::Structural(format!(
                "block {} previous hash must be {} hex characters",
                self.index, BLOCK_HASH_HEX_LEN
            )));
        }

        for tx in &self.data {
            tx.validate_structure()?;
        }
        Ok(())
    }

    /// Validate this block as the direct successor of `prev`
    pub fn validate_successor(&self, prev: &Block, now_ms: i64) -> Result<(), BlockError> {
        if prev.index.checked_add(1) != Some(self.index) {
            return Err(BlockError::ChainLinkage {
                index: self.index,
                reason: format!("expected index {}", prev.index.saturating_add(1)),
            });
        }
        if self.previous_hash != prev.hash {
            return Err(BlockError::ChainLinkage {
                index: self.index,
                reason: format!("previous hash does not match {}", prev.hash),
            });
        }

        let not_before = prev.timestamp.saturating_sub(MAX_TIMESTAMP_DRIFT_MS);
        let not_after = now_ms.saturating_add(MAX_TIMESTAMP_DRIFT_MS);
        if self.timestamp <= not_before || self.timestamp >= not_after {
            return Err(BlockError::Timestamp {
                index: self.index,
                timestamp: self.timestamp,
            });
        }

        if !self.has_valid_hash() {
            return Err(BlockError::HashMismatch { index: self.index });
        }
        if !self.has_valid_pow() {
            return Err(BlockError::ProofOfWork {
                index: self.index,
                difficulty: self.difficulty,
            });
        }
        Ok(())
    }
}
