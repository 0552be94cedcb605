//! Wallet implementation for the ledger
//!
//! Holds one key pair. The node credits its block rewards to the wallet
//! address and builds signed payments from the outputs it owns.

use crate::core::{
    validate_address, Transaction, TransactionError, TxIn, TxOut, UnspentTxOut, UtxoSet,
};
use crate::crypto::{KeyError, KeyPair};
use serde::Serialize;
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Amount must be greater than zero")]
    InvalidAmount,
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

/// A wallet for receiving rewards and creating payments
#[derive(Clone)]
pub struct Wallet {
    key_pair: KeyPair,
}

impl Wallet {
    /// Create a new wallet with a fresh key pair
    pub fn new() -> Self {
        Self {
            key_pair: KeyPair::generate(),
        }
    }

    /// Import a wallet from a private key
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        let key_pair = KeyPair::from_private_key_hex(private_key_hex)?;
        Ok(Self { key_pair })
    }

    /// Get the wallet's address
    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    /// Get the wallet's private key (hex)
    /// WARNING: Keep this secret!
    pub fn private_key(&self) -> String {
        self.key_pair.private_key_hex()
    }

    pub fn balance(&self, utxos: &UtxoSet) -> u64 {
        utxos.balance(&self.address())
    }

    /// Outputs owned by this wallet, ordered by outpoint
    pub fn utxos(&self, utxos: &UtxoSet) -> Vec<UnspentTxOut> {
        utxos.for_address(&self.address())
    }

    /// Create a signed payment of `amount` to `recipient`.
    ///
    /// Owned outputs are taken in outpoint order until they cover the
    /// amount; any excess returns to the wallet as a change output.
    pub fn create_transaction(
        &self,
        recipient: &str,
        amount: u64,
        utxos: &UtxoSet,
    ) -> Result<Transaction, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount);
        }
        validate_address(recipient)?;

        let owned = self.utxos(utxos);
        let balance = owned
            .iter()
            .map(|u| u.amount)
            .fold(0u64, u64::saturating_add);
        if balance < amount {
            return Err(WalletError::InsufficientFunds {
                have: balance,
                need: amount,
            });
        }

        let mut tx_ins = Vec::new();
        let mut selected_amount = 0u64;
        for utxo in owned {
            tx_ins.push(TxIn::new(&utxo.tx_out_id, utxo.tx_out_index));
            selected_amount = selected_amount.saturating_add(utxo.amount);
            if selected_amount >= amount {
                break;
            }
        }

        let mut tx_outs = vec![TxOut::new(recipient, amount)];
        let change = selected_amount - amount;
        if change > 0 {
            tx_outs.push(TxOut::new(&self.address(), change));
        }

        let mut tx = Transaction::new(tx_ins, tx_outs);
        for index in 0..tx.tx_ins.len() {
            let signature = tx.sign_tx_in(index, &self.key_pair, utxos)?;
            tx.tx_ins[index].signature = signature;
        }
        Ok(tx)
    }

    /// Public wallet information (safe to share)
    pub fn info(&self, utxos: &UtxoSet) -> WalletInfo {
        WalletInfo {
            address: self.address(),
            balance: self.balance(utxos),
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Public wallet information (safe to share)
#[derive(Debug, Clone, Serialize)]
pub struct WalletInfo {
    pub address: String,
    pub balance: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::COINBASE_AMOUNT;

    fn funded(wallet: &Wallet, blocks: u64) -> UtxoSet {
        let mut utxos = UtxoSet::new();
        for index in 1..=blocks {
            utxos = utxos
                .apply_transactions(&[Transaction::coinbase(&wallet.address(), index)], index)
                .unwrap();
        }
        utxos
    }

    #[test]
    fn test_wallet_import() {
        let wallet1 = Wallet::new();
        let wallet2 = Wallet::from_private_key(&wallet1.private_key()).unwrap();
        assert_eq!(wallet1.address(), wallet2.address());
        assert!(Wallet::from_private_key("zz").is_err());
    }

    #[test]
    fn test_transaction_creation() {
        let wallet = Wallet::new();
        let recipient = Wallet::new().address();
        let utxos = funded(&wallet, 2);
        assert_eq!(wallet.balance(&utxos), 2 * COINBASE_AMOUNT);

        let tx = wallet.create_transaction(&recipient, 70, &utxos).unwrap();
        assert_eq!(tx.tx_ins.len(), 2);
        assert_eq!(tx.tx_outs[0], TxOut::new(&recipient, 70));
        assert_eq!(tx.tx_outs[1], TxOut::new(&wallet.address(), 30));

        // The payment is accepted by the ledger
        let next = utxos.apply_transactions(&[tx], 3).unwrap();
        assert_eq!(next.balance(&recipient), 70);
        assert_eq!(wallet.balance(&next), 30);
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let wallet = Wallet::new();
        let recipient = Wallet::new().address();
        let utxos = funded(&wallet, 1);

        let tx = wallet
            .create_transaction(&recipient, COINBASE_AMOUNT, &utxos)
            .unwrap();
        assert_eq!(tx.tx_outs.len(), 1);
    }

    #[test]
    fn test_payment_errors() {
        let wallet = Wallet::new();
        let recipient = Wallet::new().address();
        let utxos = funded(&wallet, 1);

        assert!(matches!(
            wallet.create_transaction(&recipient, 51, &utxos),
            Err(WalletError::InsufficientFunds { have: 50, need: 51 })
        ));
        assert!(matches!(
            wallet.create_transaction(&recipient, 0, &utxos),
            Err(WalletError::InvalidAmount)
        ));
        assert!(matches!(
            wallet.create_transaction("not-an-address", 1, &utxos),
            Err(WalletError::TransactionError(_))
        ));
    }
}
