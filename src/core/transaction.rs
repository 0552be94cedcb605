//! Transaction handling for the ledger
//!
//! Implements a UTXO-based transaction model with secp256k1 signatures.
//! A transaction consumes previously unspent outputs through its inputs and
//! creates new outputs; its id is the SHA-256 of the referenced outpoints and
//! the new outputs, and every input signs that id.

use crate::core::utxo::UtxoSet;
use crate::crypto::{
    is_hex, sha256_hex, verify_digest, KeyError, KeyPair, ADDRESS_HEX_LEN, ADDRESS_PREFIX,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Amount minted by the coinbase transaction of each block
pub const COINBASE_AMOUNT: u64 = 50;

/// Length of a transaction id in hex characters
pub const TX_ID_HEX_LEN: usize = 64;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    Structural(String),
    #[error("Transaction id {0} does not match its contents")]
    IdMismatch(String),
    #[error("Signing key does not own output {tx_out_id}:{tx_out_index}")]
    SignatureMismatch { tx_out_id: String, tx_out_index: u64 },
    #[error("Unknown unspent output {tx_out_id}:{tx_out_index}")]
    UnresolvedReference { tx_out_id: String, tx_out_index: u64 },
    #[error("Output {tx_out_id}:{tx_out_index} spent more than once")]
    DoubleSpend { tx_out_id: String, tx_out_index: u64 },
    #[error("Invalid signature for input {tx_out_id}:{tx_out_index}")]
    InvalidSignature { tx_out_id: String, tx_out_index: u64 },
    #[error("Inputs total {inputs} but outputs total {outputs}")]
    AmountMismatch { inputs: u64, outputs: u64 },
    #[error("Invalid coinbase transaction: {0}")]
    InvalidCoinbase(String),
    #[error("No input at position {0}")]
    MissingInput(usize),
    #[error("Crypto error: {0}")]
    Key(#[from] KeyError),
}

// =============================================================================
// Transaction Input
// =============================================================================

/// Transaction input (reference to a previous output plus its owner's signature)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxIn {
    /// Id of the transaction that created the spent output
    pub tx_out_id: String,
    /// Position of the spent output in that transaction
    pub tx_out_index: u64,
    /// Hex DER signature over the spending transaction's id
    pub signature: String,
}

impl TxIn {
    /// Create an unsigned input spending `tx_out_id:tx_out_index`
    pub fn new(tx_out_id: &str, tx_out_index: u64) -> Self {
        Self {
            tx_out_id: tx_out_id.to_string(),
            tx_out_index,
            signature: String::new(),
        }
    }

    /// The outpoint this input consumes
    pub fn outpoint(&self) -> (String, u64) {
        (self.tx_out_id.clone(), self.tx_out_index)
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOut {
    /// Recipient address (uncompressed public key, hex)
    pub address: String,
    /// Amount of coins
    pub amount: u64,
}

impl TxOut {
    pub fn new(address: &str, amount: u64) -> Self {
        Self {
            address: address.to_string(),
            amount,
        }
    }
}

/// Check that an address is a hex-encoded uncompressed public key
pub fn validate_address(address: &str) -> Result<(), TransactionError> {
    if address.len() != ADDRESS_HEX_LEN {
        return Err(TransactionError::Structural(format!(
            "address must be {} hex characters, got {}",
            ADDRESS_HEX_LEN,
            address.len()
        )));
    }
    if !is_hex(address) {
        return Err(TransactionError::Structural(
            "address must contain only hex characters".to_string(),
        ));
    }
    if !address.starts_with(ADDRESS_PREFIX) {
        return Err(TransactionError::Structural(format!(
            "address must start with {}",
            ADDRESS_PREFIX
        )));
    }
    Ok(())
}

// =============================================================================
// Unspent Transaction Output
// =============================================================================

/// Unspent Transaction Output, keyed by `(tx_out_id, tx_out_index)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnspentTxOut {
    pub tx_out_id: String,
    pub tx_out_index: u64,
    pub address: String,
    pub amount: u64,
}

impl UnspentTxOut {
    pub fn new(tx_out_id: &str, tx_out_index: u64, address: &str, amount: u64) -> Self {
        Self {
            tx_out_id: tx_out_id.to_string(),
            tx_out_index,
            address: address.to_string(),
            amount,
        }
    }

    pub fn outpoint(&self) -> (String, u64) {
        (self.tx_out_id.clone(), self.tx_out_index)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// SHA-256 (hex) of the referenced outpoints and the new outputs
    pub id: String,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
}

impl Transaction {
    /// Create a transaction and compute its id; inputs stay unsigned
    pub fn new(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Self {
        let id = Self::calculate_id(&tx_ins, &tx_outs);
        Self { id, tx_ins, tx_outs }
    }

    /// Create the coinbase (reward) transaction for the block at `block_index`
    pub fn coinbase(address: &str, block_index: u64) -> Self {
        Self::new(
            vec![TxIn::new("", block_index)],
            vec![TxOut::new(address, COINBASE_AMOUNT)],
        )
    }

    /// Transaction id over inputs (outpoints only) and outputs.
    /// Signatures are excluded so that signing does not change the id.
    pub fn calculate_id(tx_ins: &[TxIn], tx_outs: &[TxOut]) -> String {
        let in_content: String = tx_ins
            .iter()
            .map(|tx_in| format!("{}{}", tx_in.tx_out_id, tx_in.tx_out_index))
            .collect();
        let out_content: String = tx_outs
            .iter()
            .map(|tx_out| format!("{}{}", tx_out.address, tx_out.amount))
            .collect();
        sha256_hex(format!("{}{}", in_content, out_content).as_bytes())
    }

    /// Whether the stored id matches the transaction contents
    pub fn has_valid_id(&self) -> bool {
        self.id == Self::calculate_id(&self.tx_ins, &self.tx_outs)
    }

    /// Whether this transaction has the coinbase shape (one input with no source)
    pub fn is_coinbase(&self) -> bool {
        self.tx_ins.len() == 1 && self.tx_ins[0].tx_out_id.is_empty()
    }

    /// Canonical rendering of every field, used as block digest input
    pub fn digest_content(&self) -> String {
        let mut content = self.id.clone();
        for tx_in in &self.tx_ins {
            content.push_str(&tx_in.tx_out_id);
            content.push_str(&tx_in.tx_out_index.to_string());
            content.push_str(&tx_in.signature);
        }
        for tx_out in &self.tx_outs {
            content.push_str(&tx_out.address);
            content.push_str(&tx_out.amount.to_string());
        }
        content
    }

    /// Sum of all output amounts, `None` on overflow
    pub fn total_output(&self) -> Option<u64> {
        self.tx_outs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    /// The 32 digest bytes that inputs sign
    pub fn id_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let bytes = hex::decode(&self.id)
            .map_err(|_| TransactionError::Structural("id is not hex".to_string()))?;
        if bytes.len() != TX_ID_HEX_LEN / 2 {
            return Err(TransactionError::Structural(
                "id must be a 32-byte digest".to_string(),
            ));
        }
        Ok(bytes)
    }

    /// Shape checks: a 64-hex id and well-formed output addresses.
    /// Field types are already enforced by the typed model.
    pub fn validate_structure(&self) -> Result<(), TransactionError> {
        if self.id.len() != TX_ID_HEX_LEN || !is_hex(&self.id) {
            return Err(TransactionError::Structural(format!(
                "transaction id must be {} hex characters",
                TX_ID_HEX_LEN
            )));
        }
        for tx_out in &self.tx_outs {
            validate_address(&tx_out.address)?;
        }
        Ok(())
    }

    /// Check the coinbase rules for the block at `block_index`
    pub fn validate_coinbase(&self, block_index: u64) -> Result<(), TransactionError> {
        if !self.has_valid_id() {
            return Err(TransactionError::IdMismatch(self.id.clone()));
        }
        if !self.is_coinbase() {
            return Err(TransactionError::InvalidCoinbase(
                "must have exactly one input without a source".to_string(),
            ));
        }
        let tx_in = &self.tx_ins[0];
        if tx_in.tx_out_index != block_index {
            return Err(TransactionError::InvalidCoinbase(format!(
                "input index {} must equal block index {}",
                tx_in.tx_out_index, block_index
            )));
        }
        if !tx_in.signature.is_empty() {
            return Err(TransactionError::InvalidCoinbase(
                "coinbase input must not carry a signature".to_string(),
            ));
        }
        if self.tx_outs.len() != 1 || self.tx_outs[0].amount != COINBASE_AMOUNT {
            return Err(TransactionError::InvalidCoinbase(format!(
                "must have exactly one output of {}",
                COINBASE_AMOUNT
            )));
        }
        Ok(())
    }

    /// Sign input `tx_in_index` with `key_pair`.
    ///
    /// The referenced output must exist in `utxos` and belong to the signer;
    /// otherwise the attempt fails before anything is signed.
    pub fn sign_tx_in(
        &self,
        tx_in_index: usize,
        key_pair: &KeyPair,
        utxos: &UtxoSet,
    ) -> Result<String, TransactionError> {
        let tx_in = self
            .tx_ins
            .get(tx_in_index)
            .ok_or(TransactionError::MissingInput(tx_in_index))?;

        let referenced = utxos.get(&tx_in.tx_out_id, tx_in.tx_out_index).ok_or_else(|| {
            TransactionError::UnresolvedReference {
                tx_out_id: tx_in.tx_out_id.clone(),
                tx_out_index: tx_in.tx_out_index,
            }
        })?;

        if key_pair.address() != referenced.address {
            return Err(TransactionError::SignatureMismatch {
                tx_out_id: tx_in.tx_out_id.clone(),
                tx_out_index: tx_in.tx_out_index,
            });
        }

        let digest = self.id_bytes()?;
        Ok(key_pair.sign_hex(&digest)?)
    }

    /// Verify that `tx_in` carries a valid signature by the owner of `referenced`
    pub fn verify_tx_in(
        &self,
        tx_in: &TxIn,
        referenced: &UnspentTxOut,
    ) -> Result<(), TransactionError> {
        let invalid = || TransactionError::InvalidSignature {
            tx_out_id: tx_in.tx_out_id.clone(),
            tx_out_index: tx_in.tx_out_index,
        };

        let digest = self.id_bytes()?;
        match verify_digest(&referenced.address, &digest, &tx_in.signature) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(invalid()),
        }
    }
}
