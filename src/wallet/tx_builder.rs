// Transaction builder

use crate::core::{Hash256, Transaction, TxInput, TxOutput};
use crate::error::{ChainError, Result};
use crate::storage::{Ledger, UtxoSet};
use crate::wallet::{Address, Keystore};

/// Builds signed payments from the sender's unspent outputs
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
    utxo_set: &'a UtxoSet,
    ledger: &'a Ledger,
}

impl<'a> TransactionBuilder<'a> {
    /// Create a new transaction builder
    pub fn new(keystore: &'a Keystore, utxo_set: &'a UtxoSet, ledger: &'a Ledger) -> Self {
        Self {
            keystore,
            utxo_set,
            ledger,
        }
    }

    /// Build a transaction paying `amount` from `from` to `to`, with any
    /// change returned to the sender
    pub fn build(&self, from: &Address, to: &Address, amount: u64) -> Result<Transaction> {
        if amount == 0 {
            return Err(ChainError::InvalidTransaction(
                Hash256::zero(),
                "amount must be positive".to_string(),
            ));
        }

        let keypair = self
            .keystore
            .get_keypair(from)
            .ok_or_else(|| ChainError::Keystore(format!("no key for {}", from)))?;
        let sender = keypair.pub_key_hash();
        let recipient = to.pub_key_hash()?;

        let (accumulated, spendable) = self.utxo_set.find_spendable(&sender, amount);
        if accumulated < amount {
            return Err(ChainError::InsufficientFunds {
                available: accumulated,
                required: amount,
            });
        }

        let mut selected: Vec<(Hash256, u32)> = spendable
            .into_iter()
            .flat_map(|(txid, indices)| indices.into_iter().map(move |index| (txid, index)))
            .collect();
        selected.sort();

        let inputs = selected
            .into_iter()
            .map(|(txid, index)| TxInput::new(txid, index))
            .collect();

        let mut outputs = vec![TxOutput::new(amount, recipient)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, sender));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.ledger.sign_transaction(&mut tx, &keypair.secret_key)?;

        log::debug!("Built transaction {} ({} -> {}: {})", tx.id, from, to, amount);
        Ok(tx)
    }
}
