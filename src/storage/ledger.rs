// Ledger: the hash-linked chain of blocks on top of a block store

use crate::consensus::ProofOfWork;
use crate::core::{Block, Hash256, REWARD, Serializable, Transaction};
use crate::error::{ChainError, Result};
use crate::storage::{BlockStore, OutPoint};
use crate::wallet::Address;
use secp256k1::SecretKey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Coinbase data of the genesis block
pub const GENESIS_DATA: &[u8] = b"First Transaction from Genesis";

/// Most blocks held while their parent is missing
pub const MAX_ORPHANS: usize = 64;

/// Outcome of offering a peer's block to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAcceptance {
    /// Already stored, nothing changed
    Known,
    /// Parent not stored yet; buffered until it arrives
    Orphaned,
    /// Blocks that extended the tip, in chain order: the offered block
    /// first, then any buffered orphans it unlocked
    Connected(Vec<Block>),
}

struct ChainState {
    tip: Option<Hash256>,
    height: Option<u64>,
    orphans: OrphanPool,
}

/// Blocks waiting for their parent.
///
/// Several children may wait on one parent; the oldest arrivals are evicted
/// once more than [`MAX_ORPHANS`] are held.
#[derive(Default)]
struct OrphanPool {
    blocks: HashMap<Hash256, Block>,
    children: HashMap<Hash256, Vec<Hash256>>,
    arrival: VecDeque<Hash256>,
}

impl OrphanPool {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn insert(&mut self, parent: Hash256, block: Block) {
        if self.blocks.contains_key(&block.hash) {
            return;
        }
        self.children.entry(parent).or_default().push(block.hash);
        self.arrival.push_back(block.hash);
        self.blocks.insert(block.hash, block);

        while self.blocks.len() > MAX_ORPHANS {
            let Some(oldest) = self.arrival.front().copied() else {
                break;
            };
            log::debug!("Evicting orphan block {}", oldest);
            self.remove(&oldest);
        }
    }

    fn remove(&mut self, hash: &Hash256) -> Option<Block> {
        self.arrival.retain(|queued| queued != hash);
        let block = self.blocks.remove(hash)?;
        if let Some(parent) = block.prev_hash {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|sibling| sibling != hash);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
        Some(block)
    }

    /// Take every block waiting on `parent`, oldest first
    fn take_children(&mut self, parent: &Hash256) -> Vec<Block> {
        let hashes = self.children.remove(parent).unwrap_or_default();
        hashes.iter().filter_map(|hash| self.remove(hash)).collect()
    }
}

/// Append-only chain of blocks.
///
/// Every write goes through one mutex that is held from screening through
/// mining to persisting, so the tip only ever moves by linear extension.
pub struct Ledger {
    store: Box<dyn BlockStore>,
    state: Mutex<ChainState>,
}

impl Ledger {
    /// Open the ledger over `store`, counting the existing chain
    pub fn open(store: impl BlockStore + 'static) -> Result<Self> {
        let tip = store.tip()?;
        let ledger = Self {
            store: Box::new(store),
            state: Mutex::new(ChainState {
                tip,
                height: None,
                orphans: OrphanPool::default(),
            }),
        };

        let mut blocks = 0u64;
        for block in ledger.iter_from(tip) {
            block?;
            blocks += 1;
        }
        ledger.state().height = blocks.checked_sub(1);

        if let Some(tip) = tip {
            log::info!("Opened chain at height {} (tip {})", blocks - 1, tip);
        }

        Ok(ledger)
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mine the genesis block paying the first reward to `address`
    pub fn create_genesis(&self, address: &Address) -> Result<Block> {
        let mut state = self.state();
        if state.tip.is_some() {
            return Err(ChainError::ChainExists);
        }

        let coinbase = Transaction::coinbase(address.pub_key_hash()?, GENESIS_DATA.to_vec());
        let genesis = Block::genesis(coinbase);
        self.commit(&mut state, &genesis)?;

        log::info!("Genesis created: {}", genesis.hash);
        Ok(genesis)
    }

    /// Screen `transactions`, mine them into a block on the current tip and persist it.
    /// Any invalid transaction fails the whole call before anything is written.
    pub fn append(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let mut state = self.state();
        let tip = state.tip.ok_or(ChainError::NoChain)?;

        Self::check_coinbase_count(transactions.iter().filter(|tx| tx.is_coinbase()).count())?;
        let mut screen = Screen::new(self, Some(tip))?;
        for tx in &transactions {
            screen.admit(tx)?;
        }

        let block = Block::mine(Some(tip), transactions);
        self.commit(&mut state, &block)?;

        log::info!(
            "Appended block {} at height {} ({} transactions)",
            block.hash,
            state.height.unwrap_or_default(),
            block.transactions.len()
        );
        Ok(block)
    }

    /// Offer a block received from a peer.
    ///
    /// The block must carry valid proof of work and extend the current tip. A block
    /// whose parent is stored but is not the tip competes for a filled height and is
    /// rejected. A block whose parent is unknown is buffered until the parent connects;
    /// when it does, the first buffered child that passes screening extends the chain.
    pub fn accept_block(&self, block: Block) -> Result<BlockAcceptance> {
        let mut state = self.state();

        if self.has_block(&block.hash)? {
            return Ok(BlockAcceptance::Known);
        }
        if !ProofOfWork::validate(&block) {
            return Err(ChainError::InvalidProofOfWork(block.hash));
        }

        if block.prev_hash != state.tip {
            return match block.prev_hash {
                Some(prev) if !self.has_block(&prev)? => {
                    log::debug!("Buffering orphan block {} (parent {})", block.hash, prev);
                    state.orphans.insert(prev, block);
                    Ok(BlockAcceptance::Orphaned)
                }
                found => Err(ChainError::BrokenLinkage {
                    expected: state.tip,
                    found,
                }),
            };
        }

        self.connect(&mut state, &block)?;
        let mut connected = vec![block];

        while let Some(tip) = state.tip {
            let children = state.orphans.take_children(&tip);
            let mut extended = false;
            for child in children {
                if extended {
                    log::debug!("Dropping buffered block {}: height already filled", child.hash);
                    continue;
                }
                match self.connect(&mut state, &child) {
                    Ok(()) => {
                        connected.push(child);
                        extended = true;
                    }
                    Err(e) => log::warn!("Dropping buffered block {}: {}", child.hash, e),
                }
            }
            if !extended {
                break;
            }
        }

        Ok(BlockAcceptance::Connected(connected))
    }

    /// Number of blocks buffered while their parent is missing
    pub fn orphan_count(&self) -> usize {
        self.state().orphans.len()
    }

    /// Validate the contents of a block that extends the tip, then persist it
    fn connect(&self, state: &mut ChainState, block: &Block) -> Result<()> {
        if block.is_genesis()
            && (block.transactions.len() != 1 || !block.transactions[0].is_coinbase())
        {
            return Err(ChainError::InvalidBlock(
                "genesis must hold exactly one coinbase transaction".to_string(),
            ));
        }
        Self::check_coinbase_count(block.coinbase_count())?;

        let mut screen = Screen::new(self, state.tip)?;
        for tx in &block.transactions {
            screen.admit(tx)?;
        }

        self.commit(state, block)?;
        log::info!(
            "Added block {} at height {}",
            block.hash,
            state.height.unwrap_or_default()
        );
        Ok(())
    }

    fn check_coinbase_count(coinbases: usize) -> Result<()> {
        if coinbases > 1 {
            return Err(ChainError::InvalidBlock(format!(
                "{} coinbase transactions",
                coinbases
            )));
        }
        Ok(())
    }

    /// Persist the block body, then move the tip
    fn commit(&self, state: &mut ChainState, block: &Block) -> Result<()> {
        if block.prev_hash != state.tip {
            return Err(ChainError::BrokenLinkage {
                expected: state.tip,
                found: block.prev_hash,
            });
        }

        self.store.put(&block.hash, &block.serialize())?;
        self.store.set_tip(&block.hash)?;

        state.tip = Some(block.hash);
        state.height = Some(state.height.map_or(0, |height| height + 1));
        Ok(())
    }

    /// Hash of the most recently appended block
    pub fn tip(&self) -> Option<Hash256> {
        self.state().tip
    }

    /// Blocks from genesis to tip minus one; `None` for an empty ledger
    pub fn best_height(&self) -> Option<u64> {
        self.state().height
    }

    /// Walk from the current tip back to genesis
    pub fn iter(&self) -> BlockIter<'_> {
        self.iter_from(self.tip())
    }

    /// Walk from `start` back to genesis
    pub(crate) fn iter_from(&self, start: Option<Hash256>) -> BlockIter<'_> {
        BlockIter {
            ledger: self,
            next: start,
        }
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.store.get(hash)?.is_some())
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        let data = self
            .store
            .get(hash)?
            .ok_or(ChainError::BlockNotFound(*hash))?;
        Block::deserialize(&data)
    }

    /// All block hashes, tip first
    pub fn block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter().map(|block| block.map(|block| block.hash)).collect()
    }

    /// Linear scan from the tip for the transaction with `id`
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        self.find_transaction_from(self.tip(), id)
    }

    fn find_transaction_from(&self, tip: Option<Hash256>, id: &Hash256) -> Result<Transaction> {
        for block in self.iter_from(tip) {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(ChainError::TransactionNotFound(*id))
    }

    fn prior_transactions(
        &self,
        tip: Option<Hash256>,
        tx: &Transaction,
    ) -> Result<HashMap<Hash256, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            if !prev_txs.contains_key(&input.prev_tx_id) {
                let prev = self.find_transaction_from(tip, &input.prev_tx_id)?;
                prev_txs.insert(prev.id, prev);
            }
        }
        Ok(prev_txs)
    }

    /// Sign every input of `tx` against the outputs it spends on this chain
    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = self.prior_transactions(self.tip(), tx)?;
        tx.sign(secret_key, &prev_txs)
    }

    /// Check the signatures of `tx`. A missing prior transaction is an error.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prior_transactions(self.tip(), tx)?;
        tx.verify(&prev_txs)
    }

    /// Split `candidates` into transactions a block on the current tip may hold
    /// and the IDs of those it may not. Conflicting spends keep the first in order.
    pub fn select_valid(
        &self,
        candidates: Vec<Transaction>,
    ) -> Result<(Vec<Transaction>, Vec<Hash256>)> {
        let mut screen = Screen::new(self, self.tip())?;
        let mut valid = Vec::new();
        let mut rejected = Vec::new();

        for tx in candidates {
            if tx.is_coinbase() {
                rejected.push(tx.id);
                continue;
            }
            match screen.admit(&tx) {
                Ok(()) => valid.push(tx),
                Err(e) if e.is_consensus_violation() || e.is_not_found() => {
                    log::warn!("Rejecting transaction {}: {}", tx.id, e);
                    rejected.push(tx.id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok((valid, rejected))
    }

    /// Outputs consumed by some input on the chain ending at `tip`
    fn spent_outputs(&self, tip: Option<Hash256>) -> Result<HashSet<OutPoint>> {
        let mut spent = HashSet::new();
        for block in self.iter_from(tip) {
            for tx in block?.transactions {
                if tx.is_coinbase() {
                    continue;
                }
                for input in tx.inputs {
                    spent.insert(OutPoint::new(input.prev_tx_id, input.prev_index));
                }
            }
        }
        Ok(spent)
    }

    /// Flush pending writes to disk
    pub fn close(&self) -> Result<()> {
        self.store.flush()
    }
}

/// Transaction admission against one chain state, tracking outputs spent so far
struct Screen<'a> {
    ledger: &'a Ledger,
    tip: Option<Hash256>,
    spent: HashSet<OutPoint>,
}

impl<'a> Screen<'a> {
    fn new(ledger: &'a Ledger, tip: Option<Hash256>) -> Result<Self> {
        Ok(Self {
            ledger,
            tip,
            spent: ledger.spent_outputs(tip)?,
        })
    }

    fn admit(&mut self, tx: &Transaction) -> Result<()> {
        let invalid = |reason: &str| ChainError::InvalidTransaction(tx.id, reason.to_string());

        if tx.id != tx.compute_id() {
            return Err(invalid("id does not match content"));
        }

        if tx.is_coinbase() {
            if tx.outputs.len() != 1 || tx.outputs[0].value != REWARD {
                return Err(invalid("coinbase must pay exactly the block reward"));
            }
            return Ok(());
        }

        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(invalid("no inputs or outputs"));
        }

        let mut outpoints = HashSet::new();
        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.prev_tx_id, input.prev_index);
            if self.spent.contains(&outpoint) || !outpoints.insert(outpoint) {
                return Err(ChainError::DoubleSpend {
                    txid: input.prev_tx_id,
                    index: input.prev_index,
                });
            }
        }

        let prev_txs = self.ledger.prior_transactions(self.tip, tx)?;
        if !tx.verify(&prev_txs)? {
            return Err(invalid("signature verification failed"));
        }

        // verify() established that every referenced output exists
        let input_value = tx
            .inputs
            .iter()
            .map(|input| prev_txs[&input.prev_tx_id].outputs[input.prev_index as usize].value)
            .try_fold(0u64, u64::checked_add)
            .ok_or_else(|| invalid("input value overflow"))?;
        let output_value = tx
            .outputs
            .iter()
            .map(|output| output.value)
            .try_fold(0u64, u64::checked_add)
            .ok_or_else(|| invalid("output value overflow"))?;
        if output_value > input_value {
            return Err(invalid("outputs exceed inputs"));
        }

        self.spent.extend(outpoints);
        Ok(())
    }
}

/// Lazy walk from a starting block back to genesis
pub struct BlockIter<'a> {
    ledger: &'a Ledger,
    next: Option<Hash256>,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.ledger.get_block(&hash) {
            Ok(block) => {
                self.next = block.prev_hash;
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};
    use crate::storage::BlockchainDB;
    use crate::wallet::KeyPair;

    pub(crate) fn new_ledger() -> Ledger {
        Ledger::open(BlockchainDB::memory().unwrap()).unwrap()
    }

    /// Ledger with a genesis block paying `owner`
    pub(crate) fn funded_ledger(owner: &KeyPair) -> (Ledger, Block) {
        let ledger = new_ledger();
        let genesis = ledger.create_genesis(&owner.address()).unwrap();
        (ledger, genesis)
    }

    /// Signed transaction spending output `index` of `prev`
    pub(crate) fn spend(
        ledger: &Ledger,
        owner: &KeyPair,
        prev: &Transaction,
        index: u32,
        outputs: Vec<TxOutput>,
    ) -> Transaction {
        let mut tx = Transaction::new(vec![TxInput::new(prev.id, index)], outputs);
        ledger.sign_transaction(&mut tx, &owner.secret_key).unwrap();
        tx
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = new_ledger();
        assert_eq!(ledger.best_height(), None);
        assert_eq!(ledger.tip(), None);
        assert_eq!(ledger.iter().count(), 0);
        assert!(matches!(
            ledger.append(vec![]),
            Err(ChainError::NoChain)
        ));
    }

    #[test]
    fn test_genesis_creation() {
        let alice = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);

        assert_eq!(ledger.best_height(), Some(0));
        assert_eq!(ledger.tip(), Some(genesis.hash));
        assert!(genesis.is_genesis());
        assert!(matches!(
            ledger.create_genesis(&alice.address()),
            Err(ChainError::ChainExists)
        ));
    }

    #[test]
    fn test_iterator_walks_unbroken_chain() {
        let alice = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);

        for _ in 0..3 {
            ledger
                .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
                .unwrap();
        }
        assert_eq!(ledger.best_height(), Some(3));

        let blocks: Vec<Block> = ledger.iter().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].hash, ledger.tip().unwrap());
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, Some(pair[1].hash));
            assert!(ProofOfWork::validate(&pair[0]));
        }
        assert_eq!(blocks[3].hash, genesis.hash);
        assert!(blocks[3].prev_hash.is_none());

        let hashes = ledger.block_hashes().unwrap();
        assert_eq!(hashes, blocks.iter().map(|b| b.hash).collect::<Vec<_>>());

        // restartable
        assert_eq!(ledger.iter().count(), 4);
    }

    #[test]
    fn test_get_block() {
        let alice = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);

        assert_eq!(ledger.get_block(&genesis.hash).unwrap(), genesis);
        assert!(matches!(
            ledger.get_block(&Hash256::new([1; 32])),
            Err(ChainError::BlockNotFound(_))
        ));
    }

    #[test]
    fn test_append_and_find_transaction() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);
        let coinbase = &genesis.transactions[0];

        let tx = spend(
            &ledger,
            &alice,
            coinbase,
            0,
            vec![
                TxOutput::new(5, bob.pub_key_hash()),
                TxOutput::new(5, alice.pub_key_hash()),
            ],
        );
        assert!(ledger.verify_transaction(&tx).unwrap());

        ledger.append(vec![tx.clone()]).unwrap();
        assert_eq!(ledger.find_transaction(&tx.id).unwrap(), tx);
        assert_eq!(ledger.find_transaction(&coinbase.id).unwrap(), *coinbase);
        assert!(
            ledger
                .find_transaction(&Hash256::new([7; 32]))
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_append_rejects_invalid_transaction_without_writing() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);
        let tip = ledger.tip();

        let mut stolen = Transaction::new(
            vec![TxInput::new(genesis.transactions[0].id, 0)],
            vec![TxOutput::new(10, mallory.pub_key_hash())],
        );
        ledger
            .sign_transaction(&mut stolen, &mallory.secret_key)
            .unwrap();

        let err = ledger
            .append(vec![Transaction::coinbase(mallory.pub_key_hash(), Vec::new()), stolen])
            .unwrap_err();
        assert!(err.is_consensus_violation());
        assert_eq!(ledger.tip(), tip);
        assert_eq!(ledger.best_height(), Some(0));
    }

    #[test]
    fn test_append_rejects_overspend() {
        let alice = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);

        let tx = spend(
            &ledger,
            &alice,
            &genesis.transactions[0],
            0,
            vec![TxOutput::new(REWARD + 1, alice.pub_key_hash())],
        );
        assert!(matches!(
            ledger.append(vec![tx]),
            Err(ChainError::InvalidTransaction(..))
        ));
    }

    #[test]
    fn test_double_spend_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);
        let coinbase = &genesis.transactions[0];

        let first = spend(&ledger, &alice, coinbase, 0, vec![TxOutput::new(10, bob.pub_key_hash())]);
        let second = spend(&ledger, &alice, coinbase, 0, vec![TxOutput::new(9, bob.pub_key_hash())]);

        // both in one candidate
        assert!(matches!(
            ledger.append(vec![first.clone(), second.clone()]),
            Err(ChainError::DoubleSpend { .. })
        ));

        // across blocks
        ledger.append(vec![first]).unwrap();
        assert!(matches!(
            ledger.append(vec![second]),
            Err(ChainError::DoubleSpend { .. })
        ));
        assert_eq!(ledger.best_height(), Some(1));
    }

    #[test]
    fn test_append_rejects_second_coinbase() {
        let alice = KeyPair::generate();
        let (ledger, _) = funded_ledger(&alice);

        let result = ledger.append(vec![
            Transaction::coinbase(alice.pub_key_hash(), Vec::new()),
            Transaction::coinbase(alice.pub_key_hash(), Vec::new()),
        ]);
        assert!(matches!(result, Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_select_valid_drops_conflicts_and_unknown_priors() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);
        let coinbase = &genesis.transactions[0];

        let first = spend(&ledger, &alice, coinbase, 0, vec![TxOutput::new(10, bob.pub_key_hash())]);
        let conflict = spend(&ledger, &alice, coinbase, 0, vec![TxOutput::new(8, bob.pub_key_hash())]);
        let dangling = Transaction::new(
            vec![TxInput::new(Hash256::new([6; 32]), 0)],
            vec![TxOutput::new(1, bob.pub_key_hash())],
        );

        let (valid, rejected) = ledger
            .select_valid(vec![first.clone(), conflict.clone(), dangling.clone()])
            .unwrap();
        assert_eq!(valid, vec![first]);
        assert_eq!(rejected, vec![conflict.id, dangling.id]);
    }

    #[test]
    fn test_competing_block_fails_linkage() {
        let alice = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);

        // mined on genesis but loses the race to a local append
        let competitor = Block::mine(
            Some(genesis.hash),
            vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())],
        );
        let winner = ledger
            .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
            .unwrap();

        let err = ledger.accept_block(competitor).unwrap_err();
        assert!(matches!(err, ChainError::BrokenLinkage { .. }));
        assert_eq!(ledger.tip(), Some(winner.hash));
        assert_eq!(ledger.best_height(), Some(1));
    }

    #[test]
    fn test_accept_block_rejects_bad_pow() {
        let alice = KeyPair::generate();
        let (ledger, genesis) = funded_ledger(&alice);

        let mut block = Block::mine(
            Some(genesis.hash),
            vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())],
        );
        block.nonce += 1;

        assert!(matches!(
            ledger.accept_block(block),
            Err(ChainError::InvalidProofOfWork(_))
        ));
        assert_eq!(ledger.best_height(), Some(0));
    }

    #[test]
    fn test_accept_blocks_out_of_order() {
        let alice = KeyPair::generate();
        let (source, _) = funded_ledger(&alice);
        for _ in 0..3 {
            source
                .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
                .unwrap();
        }

        // tip first, as advertised by an inventory
        let blocks: Vec<Block> = source.iter().collect::<Result<_>>().unwrap();
        let target = new_ledger();

        for block in &blocks[..3] {
            assert_eq!(
                target.accept_block(block.clone()).unwrap(),
                BlockAcceptance::Orphaned
            );
        }
        let mut in_chain_order = blocks.clone();
        in_chain_order.reverse();
        assert_eq!(
            target.accept_block(blocks[3].clone()).unwrap(),
            BlockAcceptance::Connected(in_chain_order)
        );
        assert_eq!(target.orphan_count(), 0);

        assert_eq!(target.tip(), source.tip());
        assert_eq!(target.best_height(), Some(3));
        assert_eq!(
            target.accept_block(blocks[0].clone()).unwrap(),
            BlockAcceptance::Known
        );
    }

    #[test]
    fn test_invalid_orphan_does_not_displace_sibling() {
        let alice = KeyPair::generate();
        let (source, genesis) = funded_ledger(&alice);
        let parent = source
            .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
            .unwrap();
        let child = source
            .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
            .unwrap();

        // valid proof of work on the same parent, but two coinbases
        let junk = Block::mine(
            Some(parent.hash),
            vec![
                Transaction::coinbase(alice.pub_key_hash(), Vec::new()),
                Transaction::coinbase(alice.pub_key_hash(), Vec::new()),
            ],
        );

        let target = new_ledger();
        target.accept_block(genesis).unwrap();
        for block in [junk, child.clone()] {
            assert_eq!(target.accept_block(block).unwrap(), BlockAcceptance::Orphaned);
        }
        assert_eq!(target.orphan_count(), 2);

        assert_eq!(
            target.accept_block(parent.clone()).unwrap(),
            BlockAcceptance::Connected(vec![parent, child])
        );
        assert_eq!(target.tip(), source.tip());
        assert_eq!(target.best_height(), Some(2));
        assert_eq!(target.orphan_count(), 0);
    }

    #[test]
    fn test_orphan_buffer_evicts_oldest() {
        let alice = KeyPair::generate();
        let (source, genesis) = funded_ledger(&alice);
        let parent = source
            .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
            .unwrap();
        let child = source
            .append(vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())])
            .unwrap();

        let target = new_ledger();
        target.accept_block(genesis).unwrap();
        assert_eq!(target.accept_block(child).unwrap(), BlockAcceptance::Orphaned);

        for i in 1..=MAX_ORPHANS {
            let stray = Block::mine(
                Some(Hash256::new([i as u8; 32])),
                vec![Transaction::coinbase(alice.pub_key_hash(), Vec::new())],
            );
            assert_eq!(target.accept_block(stray).unwrap(), BlockAcceptance::Orphaned);
        }
        assert_eq!(target.orphan_count(), MAX_ORPHANS);

        // the child was the oldest entry and is gone
        assert_eq!(
            target.accept_block(parent.clone()).unwrap(),
            BlockAcceptance::Connected(vec![parent])
        );
        assert_eq!(target.best_height(), Some(1));
        assert_eq!(target.orphan_count(), MAX_ORPHANS);
    }

    #[test]
    fn test_second_genesis_rejected() {
        let alice = KeyPair::generate();
        let (ledger, _) = funded_ledger(&alice);

        let other = Block::genesis(Transaction::coinbase(alice.pub_key_hash(), Vec::new()));
        assert!(matches!(
            ledger.accept_block(other),
            Err(ChainError::BrokenLinkage { found: None, .. })
        ));
    }
}
