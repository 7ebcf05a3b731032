// UTXO (Unspent Transaction Output) set management

use crate::core::{Block, Hash256, PubKeyHash, TxOutput};
use crate::error::Result;
use crate::storage::Ledger;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

/// Unspent output together with its position in the owning transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub index: u32,
    pub output: TxOutput,
}

/// Unspent outputs grouped by transaction ID
pub type UtxoIndex = HashMap<Hash256, Vec<Utxo>>;

/// Scan the whole ledger from tip to genesis and collect every output
/// no later input consumes.
pub fn compute_index(ledger: &Ledger) -> Result<UtxoIndex> {
    compute_index_at(ledger, ledger.tip())
}

fn compute_index_at(ledger: &Ledger, tip: Option<Hash256>) -> Result<UtxoIndex> {
    let mut index = UtxoIndex::new();
    let mut spent: HashSet<OutPoint> = HashSet::new();

    // Walking backwards: any input seen was created by a later block than
    // the outputs it consumes, so the spent set is complete when they are reached.
    for block in ledger.iter_from(tip) {
        for tx in block?.transactions {
            let is_coinbase = tx.is_coinbase();
            for (i, output) in tx.outputs.into_iter().enumerate() {
                let i = i as u32;
                if !spent.contains(&OutPoint::new(tx.id, i)) {
                    index
                        .entry(tx.id)
                        .or_default()
                        .push(Utxo { index: i, output });
                }
            }

            if !is_coinbase {
                for input in tx.inputs {
                    spent.insert(OutPoint::new(input.prev_tx_id, input.prev_index));
                }
            }
        }
    }

    for utxos in index.values_mut() {
        utxos.sort_by_key(|utxo| utxo.index);
    }

    Ok(index)
}

/// Derived index of unspent outputs.
///
/// Readers see a consistent snapshot; a rebuild replaces the whole map at once.
/// Writers are serialised by `indexed_tip`, which holds the tip the current
/// index was built up to.
pub struct UtxoSet {
    index: RwLock<Arc<UtxoIndex>>,
    indexed_tip: Mutex<Option<Hash256>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(Arc::new(UtxoIndex::new())),
            indexed_tip: Mutex::new(None),
        }
    }

    /// Build the index for `ledger`
    pub fn from_ledger(ledger: &Ledger) -> Result<Self> {
        let utxo_set = Self::new();
        utxo_set.reindex(ledger)?;
        Ok(utxo_set)
    }

    /// Current contents
    pub fn snapshot(&self) -> Arc<UtxoIndex> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, index: UtxoIndex) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
    }

    /// Discard the index and rebuild it from the ledger
    pub fn reindex(&self, ledger: &Ledger) -> Result<()> {
        let mut indexed_tip = self
            .indexed_tip
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let tip = ledger.tip();
        let index = compute_index_at(ledger, tip)?;
        log::debug!("Reindexed UTXO set: {} transactions", index.len());
        self.replace(index);
        *indexed_tip = tip;
        Ok(())
    }

    /// Apply one newly connected block: drop what its inputs spend, add its outputs.
    ///
    /// Returns `false` without touching the index when `block` does not extend the
    /// tip the index was built up to; the caller must reindex instead.
    pub fn apply_block(&self, block: &Block) -> bool {
        let mut indexed_tip = self
            .indexed_tip
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if block.prev_hash != *indexed_tip {
            log::debug!(
                "Block {} does not extend indexed tip {:?}",
                block.hash,
                *indexed_tip
            );
            return false;
        }

        let mut index = (*self.snapshot()).clone();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if let Some(utxos) = index.get_mut(&input.prev_tx_id) {
                        utxos.retain(|utxo| utxo.index != input.prev_index);
                        if utxos.is_empty() {
                            index.remove(&input.prev_tx_id);
                        }
                    }
                }
            }

            let outputs: Vec<Utxo> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(i, output)| Utxo {
                    index: i as u32,
                    output: output.clone(),
                })
                .collect();
            if !outputs.is_empty() {
                index.insert(tx.id, outputs);
            }
        }

        self.replace(index);
        *indexed_tip = Some(block.hash);
        true
    }

    /// Unspent outputs locked to `pub_key_hash`, in (txid, index) order
    pub fn find_unspent(&self, pub_key_hash: &PubKeyHash) -> Vec<(OutPoint, TxOutput)> {
        let index = self.snapshot();
        let mut found: Vec<(OutPoint, TxOutput)> = index
            .iter()
            .flat_map(|(txid, utxos)| {
                utxos
                    .iter()
                    .filter(|utxo| utxo.output.is_locked_with(pub_key_hash))
                    .map(|utxo| (OutPoint::new(*txid, utxo.index), utxo.output.clone()))
            })
            .collect();
        found.sort_by_key(|(outpoint, _)| *outpoint);
        found
    }

    /// Accumulate outputs locked to `pub_key_hash` until `amount` is covered.
    /// Returns the accumulated value, which is below `amount` when funds are short.
    pub fn find_spendable(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> (u64, HashMap<Hash256, Vec<u32>>) {
        let mut accumulated = 0u64;
        let mut selected: HashMap<Hash256, Vec<u32>> = HashMap::new();

        for (outpoint, output) in self.find_unspent(pub_key_hash) {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.saturating_add(output.value);
            selected.entry(outpoint.txid).or_default().push(outpoint.index);
        }

        (accumulated, selected)
    }

    /// Sum of unspent outputs locked to `pub_key_hash`
    pub fn balance(&self, pub_key_hash: &PubKeyHash) -> u64 {
        self.find_unspent(pub_key_hash)
            .iter()
            .map(|(_, output)| output.value)
            .sum()
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> usize {
        self.snapshot().len()
    }
}

impl Default for UtxoSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{REWARD, Transaction};
    use crate::storage::ledger::tests::{funded_ledger, spend};
    use crate::wallet::KeyPair;

    #[test]
    fn test_genesis_balance() {
        let alice = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);
        let utxo_set = UtxoSet::from_ledger(&ledger).unwrap();

        assert_eq!(utxo_set.balance(&alice.pub_key_hash()), REWARD);
        assert_eq!(utxo_set.count_transactions(), 1);

        let unspent = utxo_set.find_unspent(&alice.pub_key_hash());
        assert_eq!(
            unspent,
            vec![(
                OutPoint::new(genesis.transactions[0].id, 0),
                TxOutput::new(REWARD, alice.pub_key_hash())
            )]
        );
    }

    #[test]
    fn test_transfer_moves_balance() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);

        let tx = spend(
            &ledger,
            &alice,
            &genesis.transactions[0],
            0,
            vec![
                TxOutput::new(5, bob.pub_key_hash()),
                TxOutput::new(5, alice.pub_key_hash()),
            ],
        );
        ledger.append(vec![tx]).unwrap();

        let utxo_set = UtxoSet::from_ledger(&ledger).unwrap();
        assert_eq!(utxo_set.balance(&alice.pub_key_hash()), 5);
        assert_eq!(utxo_set.balance(&bob.pub_key_hash()), 5);
        // the genesis coinbase is fully spent
        assert_eq!(utxo_set.count_transactions(), 1);
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let alice = KeyPair::generate();
        let (ledger, _) = funded_ledger(&alice);
        ledger
            .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
            .unwrap();

        let utxo_set = UtxoSet::new();
        utxo_set.reindex(&ledger).unwrap();
        let first = utxo_set.snapshot();
        utxo_set.reindex(&ledger).unwrap();

        assert_eq!(*first, *utxo_set.snapshot());
        assert_eq!(utxo_set.balance(&alice.pub_key_hash()), 2 * REWARD);
    }

    #[test]
    fn test_apply_block_matches_reindex() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);
        let utxo_set = UtxoSet::from_ledger(&ledger).unwrap();

        let tx = spend(
            &ledger,
            &alice,
            &genesis.transactions[0],
            0,
            vec![
                TxOutput::new(3, bob.pub_key_hash()),
                TxOutput::new(7, alice.pub_key_hash()),
            ],
        );
        let block = ledger
            .append(vec![Transaction::coinbase(bob.pub_key_hash(), Vec::new()), tx])
            .unwrap();
        assert!(utxo_set.apply_block(&block));

        assert_eq!(*utxo_set.snapshot(), compute_index(&ledger).unwrap());
        assert_eq!(utxo_set.balance(&bob.pub_key_hash()), 3 + REWARD);
    }

    #[test]
    fn test_apply_block_refuses_block_behind_index() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (ledger, _) = funded_ledger(&alice);
        let utxo_set = UtxoSet::from_ledger(&ledger).unwrap();

        let mined = ledger
            .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
            .unwrap();
        let tx = spend(
            &ledger,
            &alice,
            &mined.transactions[0],
            0,
            vec![TxOutput::new(REWARD, bob.pub_key_hash())],
        );
        ledger.append(vec![tx]).unwrap();

        // a rebuild already covers both blocks
        utxo_set.reindex(&ledger).unwrap();
        assert!(!utxo_set.apply_block(&mined));

        assert_eq!(*utxo_set.snapshot(), compute_index(&ledger).unwrap());
        assert_eq!(utxo_set.balance(&alice.pub_key_hash()), REWARD);
        assert_eq!(utxo_set.balance(&bob.pub_key_hash()), REWARD);
    }

    #[test]
    fn test_find_spendable() {
        let alice = KeyPair::generate();
        let (ledger, _) = funded_ledger(&alice);
        for _ in 0..2 {
            ledger
                .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
                .unwrap();
        }
        let utxo_set = UtxoSet::from_ledger(&ledger).unwrap();

        let (accumulated, selected) = utxo_set.find_spendable(&alice.pub_key_hash(), 15);
        assert_eq!(accumulated, 20);
        assert_eq!(selected.values().map(Vec::len).sum::<usize>(), 2);

        // deterministic selection
        let (_, again) = utxo_set.find_spendable(&alice.pub_key_hash(), 15);
        assert_eq!(selected, again);

        let (short, _) = utxo_set.find_spendable(&alice.pub_key_hash(), 100);
        assert_eq!(short, 30);
    }

    #[test]
    fn test_unknown_key_has_nothing() {
        let alice = KeyPair::generate();
        let (ledger, _) = funded_ledger(&alice);
        let utxo_set = UtxoSet::from_ledger(&ledger).unwrap();

        assert_eq!(utxo_set.balance(&[0; 20]), 0);
        assert!(utxo_set.find_spendable(&[0; 20], 1).1.is_empty());
    }
}
