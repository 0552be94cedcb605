//! UTXO set projection
//!
//! The set of spendable outputs is a materialized view of the chain: it is
//! rebuilt by replaying blocks from genesis and advanced block by block.
//! Applying a block never mutates the input set; it yields a new set so the
//! caller can swap it in only once the whole block has been accepted.

use crate::core::block::Block;
use crate::core::transaction::{Transaction, TransactionError, UnspentTxOut};
use std::collections::{HashMap, HashSet};

/// Outpoint key: `(tx_out_id, tx_out_index)`
pub type OutPoint = (String, u64);

/// Spendable outputs keyed by outpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtxoSet {
    map: HashMap<OutPoint, UnspentTxOut>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Build a set from a list of unspent outputs
    pub fn from_unspent(unspent: Vec<UnspentTxOut>) -> Self {
        let map = unspent
            .into_iter()
            .map(|utxo| (utxo.outpoint(), utxo))
            .collect();
        Self { map }
    }

    pub fn get(&self, tx_out_id: &str, tx_out_index: u64) -> Option<&UnspentTxOut> {
        self.map.get(&(tx_out_id.to_string(), tx_out_index))
    }

    pub fn contains(&self, tx_out_id: &str, tx_out_index: u64) -> bool {
        self.get(tx_out_id, tx_out_index).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentTxOut> {
        self.map.values()
    }

    /// All entries ordered by outpoint, for stable output
    pub fn to_sorted_vec(&self) -> Vec<UnspentTxOut> {
        let mut unspent: Vec<UnspentTxOut> = self.map.values().cloned().collect();
        unspent.sort_by(|a, b| {
            (a.tx_out_id.as_str(), a.tx_out_index).cmp(&(b.tx_out_id.as_str(), b.tx_out_index))
        });
        unspent
    }

    /// Outputs owned by `address`, ordered by outpoint
    pub fn for_address(&self, address: &str) -> Vec<UnspentTxOut> {
        self.to_sorted_vec()
            .into_iter()
            .filter(|utxo| utxo.address == address)
            .collect()
    }

    /// Total amount owned by `address`
    pub fn balance(&self, address: &str) -> u64 {
        self.iter()
            .filter(|utxo| utxo.address == address)
            .map(|utxo| utxo.amount)
            .fold(0u64, u64::saturating_add)
    }

    /// Apply the transactions of the block at `block_index`.
    ///
    /// Every transaction must be well formed and carry its correct id. An
    /// optional coinbase may appear first. Every other input must reference an
    /// output of `self` not consumed earlier in the block, signed by that
    /// output's owner, and each transaction must balance inputs and outputs.
    pub fn apply_transactions(
        &self,
        transactions: &[Transaction],
        block_index: u64,
    ) -> Result<UtxoSet, TransactionError> {
        for tx in transactions {
            tx.validate_structure()?;
        }

        let mut consumed: HashSet<OutPoint> = HashSet::new();

        for (position, tx) in transactions.iter().enumerate() {
            if !tx.has_valid_id() {
                return Err(TransactionError::IdMismatch(tx.id.clone()));
            }

            if tx.is_coinbase() {
                if position != 0 {
                    return Err(TransactionError::InvalidCoinbase(
                        "coinbase must be the first transaction".to_string(),
                    ));
                }
                tx.validate_coinbase(block_index)?;
                continue;
            }

            self.validate_spend(tx, &mut consumed)?;
        }

        let mut next = self.clone();
        for outpoint in &consumed {
            next.map.remove(outpoint);
        }
        for tx in transactions {
            for (index, tx_out) in tx.tx_outs.iter().enumerate() {
                let utxo = UnspentTxOut::new(&tx.id, index as u64, &tx_out.address, tx_out.amount);
                next.map.insert(utxo.outpoint(), utxo);
            }
        }

        Ok(next)
    }

    fn validate_spend(
        &self,
        tx: &Transaction,
        consumed: &mut HashSet<OutPoint>,
    ) -> Result<(), TransactionError> {
        let mut inputs_total = 0u64;

        for tx_in in &tx.tx_ins {
            let outpoint = tx_in.outpoint();
            if consumed.contains(&outpoint) {
                return Err(TransactionError::DoubleSpend {
                    tx_out_id: tx_in.tx_out_id.clone(),
                    tx_out_index: tx_in.tx_out_index,
                });
            }

            let referenced = self.map.get(&outpoint).ok_or_else(|| {
                TransactionError::UnresolvedReference {
                    tx_out_id: tx_in.tx_out_id.clone(),
                    tx_out_index: tx_in.tx_out_index,
                }
            })?;

            tx.verify_tx_in(tx_in, referenced)?;

            inputs_total = inputs_total.checked_add(referenced.amount).ok_or_else(|| {
                TransactionError::Structural("input amounts overflow".to_string())
            })?;
            consumed.insert(outpoint);
        }

        let outputs_total = tx
            .total_output()
            .ok_or_else(|| TransactionError::Structural("output amounts overflow".to_string()))?;

        if inputs_total != outputs_total {
            return Err(TransactionError::AmountMismatch {
                inputs: inputs_total,
                outputs: outputs_total,
            });
        }

        Ok(())
    }
}

/// Project `utxos` through `block`, returning the new set or the rejection
pub fn apply_block(block: &Block, utxos: &UtxoSet) -> Result<UtxoSet, TransactionError> {
    utxos.apply_transactions(&block.data, block.index)
}
