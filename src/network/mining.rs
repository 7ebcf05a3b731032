// Mining pending transactions into blocks

use crate::core::{Block, Hash256, Transaction};
use crate::error::Result;
use crate::network::message::{InvKind, InvPayload, Message};
use crate::network::node::Node;
use std::sync::Arc;

impl Node {
    /// Start a mining task unless one is already running
    pub fn trigger_mining(self: &Arc<Self>) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_guard) = node.mining.try_lock() else {
                log::debug!("Mining already in progress");
                return;
            };
            if let Err(e) = node.mine_pending().await {
                log::warn!("Mining stopped: {}", e);
            }
        });
    }

    /// Mine rounds until the mempool is empty or nothing in it is minable
    pub async fn mine_pending(&self) -> Result<Vec<Block>> {
        let mut mined = Vec::new();
        while let Some(block) = self.mine_tx().await? {
            mined.push(block);
            if self.mempool.is_empty() {
                break;
            }
        }
        Ok(mined)
    }

    /// One mining round: screen the mempool, mine the valid transactions
    /// together with a coinbase, and announce the block.
    /// Nothing is mined without a miner address or valid transactions.
    pub async fn mine_tx(&self) -> Result<Option<Block>> {
        let Some(miner) = &self.config.miner_address else {
            return Ok(None);
        };
        let reward_to = miner.pub_key_hash()?;

        let candidates = self.mempool.snapshot();
        if candidates.is_empty() {
            return Ok(None);
        }

        let (valid, rejected) = self
            .with_ledger(move |ledger| ledger.select_valid(candidates))
            .await?;
        if !rejected.is_empty() {
            log::warn!("Evicting {} invalid transaction(s) from mempool", rejected.len());
            self.mempool.remove_all(&rejected);
        }
        if valid.is_empty() {
            log::info!("All transactions are invalid! Waiting for new ones...");
            return Ok(None);
        }

        let ids: Vec<Hash256> = valid.iter().map(|tx| tx.id).collect();
        let mut transactions = Vec::with_capacity(valid.len() + 1);
        transactions.push(Transaction::coinbase(reward_to, Vec::new()));
        transactions.extend(valid);

        let utxo_set = Arc::clone(&self.utxo_set);
        let block = self
            .with_ledger(move |ledger| {
                let block = ledger.append(transactions)?;
                if !utxo_set.apply_block(&block) {
                    utxo_set.reindex(ledger)?;
                }
                Ok(block)
            })
            .await?;
        self.mempool.remove_all(&ids);

        log::info!(
            "New block mined: {} ({} transactions)",
            block.hash,
            block.transactions.len()
        );

        for peer in self.other_peers(None) {
            self.send(
                &peer,
                Message::Inv(InvPayload {
                    addr_from: self.address().to_string(),
                    kind: InvKind::Block,
                    items: vec![block.hash],
                }),
            );
        }

        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{Hash256, REWARD, Transaction, TxInput, TxOutput};
    use crate::network::message::{InvKind, InvPayload, Message};
    use crate::network::node::tests::{MINER, RELAY, WALLET, chain_of, test_node};
    use crate::storage::compute_index;
    use crate::storage::ledger::tests::{new_ledger, spend};
    use crate::wallet::KeyPair;

    #[tokio::test]
    async fn test_empty_mempool_mines_nothing() {
        let owner = KeyPair::generate();
        let (node, mut outbox) = test_node(MINER, chain_of(&owner, 0), Some(owner.address()));
        let tip = node.ledger().tip();

        assert!(node.mine_tx().await.unwrap().is_none());
        assert!(node.mine_pending().await.unwrap().is_empty());
        assert_eq!(node.ledger().tip(), tip);
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_without_miner_address_nothing_is_mined() {
        let owner = KeyPair::generate();
        let (node, _outbox) = test_node(WALLET, chain_of(&owner, 0), None);
        let genesis = node.ledger().iter().next().unwrap().unwrap();
        let tx = spend(
            node.ledger(),
            &owner,
            &genesis.transactions[0],
            0,
            vec![TxOutput::new(REWARD, [1; 20])],
        );
        node.mempool().add(tx);

        assert!(node.mine_tx().await.unwrap().is_none());
        assert_eq!(node.ledger().best_height(), Some(0));
        assert_eq!(node.mempool().len(), 1);
    }

    #[tokio::test]
    async fn test_mines_pending_transactions() {
        let owner = KeyPair::generate();
        let miner = KeyPair::generate();
        let alice = KeyPair::generate();
        let (node, mut outbox) = test_node(MINER, chain_of(&owner, 1), Some(miner.address()));

        // spend both coinbases
        let coinbases: Vec<_> = node
            .ledger()
            .iter()
            .map(|block| block.unwrap().transactions[0].clone())
            .collect();
        for coinbase in &coinbases {
            let tx = spend(
                node.ledger(),
                &owner,
                coinbase,
                0,
                vec![TxOutput::new(REWARD, alice.pub_key_hash())],
            );
            node.mempool().add(tx);
        }

        let mined = node.mine_pending().await.unwrap();
        assert_eq!(mined.len(), 1);
        let block = &mined[0];
        assert_eq!(block.transactions.len(), 3);
        assert!(block.transactions[0].is_coinbase());

        assert!(node.mempool().is_empty());
        assert_eq!(node.ledger().tip(), Some(block.hash));
        assert_eq!(node.utxo_set().balance(&alice.pub_key_hash()), 2 * REWARD);
        assert_eq!(node.utxo_set().balance(&miner.pub_key_hash()), REWARD);

        let mut recipients = Vec::new();
        while let Ok(envelope) = outbox.try_recv() {
            assert_eq!(
                envelope.message,
                Message::Inv(InvPayload {
                    addr_from: MINER.to_string(),
                    kind: InvKind::Block,
                    items: vec![block.hash],
                })
            );
            recipients.push(envelope.to);
        }
        assert_eq!(recipients, vec![RELAY.to_string(), WALLET.to_string()]);
    }

    #[tokio::test]
    async fn test_index_behind_ledger_is_rebuilt_after_mining() {
        let owner = KeyPair::generate();
        let miner = KeyPair::generate();
        let (node, _outbox) = test_node(MINER, chain_of(&owner, 0), Some(miner.address()));
        let genesis = node.ledger().iter().next().unwrap().unwrap();

        // a block the index has not seen yet
        node.ledger()
            .append(vec![Transaction::coinbase(owner.pub_key_hash(), Vec::new())])
            .unwrap();
        let tx = spend(
            node.ledger(),
            &owner,
            &genesis.transactions[0],
            0,
            vec![TxOutput::new(REWARD, [1; 20])],
        );
        node.mempool().add(tx);

        assert_eq!(node.mine_pending().await.unwrap().len(), 1);
        assert_eq!(
            *node.utxo_set().snapshot(),
            compute_index(node.ledger()).unwrap()
        );
        assert_eq!(node.utxo_set().balance(&owner.pub_key_hash()), REWARD);
    }

    #[tokio::test]
    async fn test_invalid_transactions_are_evicted() {
        let owner = KeyPair::generate();
        let miner = KeyPair::generate();
        let (node, _outbox) = test_node(MINER, chain_of(&owner, 0), Some(miner.address()));
        let genesis = node.ledger().iter().next().unwrap().unwrap();

        let first = spend(
            node.ledger(),
            &owner,
            &genesis.transactions[0],
            0,
            vec![TxOutput::new(REWARD, [1; 20])],
        );
        let conflict = spend(
            node.ledger(),
            &owner,
            &genesis.transactions[0],
            0,
            vec![TxOutput::new(REWARD, [2; 20])],
        );
        node.mempool().add(first);
        node.mempool().add(conflict);

        let mined = node.mine_pending().await.unwrap();
        assert_eq!(mined.len(), 1);
        assert_eq!(mined[0].transactions.len(), 2);
        assert!(node.mempool().is_empty());
        assert_eq!(node.ledger().best_height(), Some(1));
    }

    #[tokio::test]
    async fn test_only_invalid_transactions_stop_mining() {
        let owner = KeyPair::generate();
        let miner = KeyPair::generate();
        let (node, _outbox) = test_node(MINER, new_ledger(), Some(miner.address()));
        node.ledger().create_genesis(&owner.address()).unwrap();

        let orphan = Transaction::new(
            vec![TxInput::new(Hash256::new([4; 32]), 0)],
            vec![TxOutput::new(1, [1; 20])],
        );
        node.mempool().add(orphan);

        assert!(node.mine_pending().await.unwrap().is_empty());
        assert!(node.mempool().is_empty());
        assert_eq!(node.ledger().best_height(), Some(0));
    }
}
