// Block data structures

use super::serialize::{read_array, read_len, write_varint};
use crate::consensus::ProofOfWork;
use crate::core::{Hash256, Serializable, Transaction};
use crate::error::{ChainError, Result};
use std::io::Read;

/// Block - a nonce-sealed, hash-linked batch of transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Proof-of-work hash of this block
    pub hash: Hash256,
    /// Hash of the previous block, `None` only for genesis
    pub prev_hash: Option<Hash256>,
    /// Transactions in this block, a flat list
    pub transactions: Vec<Transaction>,
    /// Nonce found by the proof-of-work search
    pub nonce: u64,
}

impl Block {
    /// Run proof of work over `transactions` on top of `prev_hash` and seal the result
    pub fn mine(prev_hash: Option<Hash256>, transactions: Vec<Transaction>) -> Self {
        let result = ProofOfWork::new(prev_hash, &transactions).prepare();
        log::debug!(
            "Mined block {} after {} attempts in {:?} ({:.0} H/s)",
            result.hash,
            result.attempts,
            result.duration,
            result.hash_rate()
        );

        Self {
            hash: result.hash,
            prev_hash,
            transactions,
            nonce: result.nonce,
        }
    }

    /// Create the genesis block holding a single coinbase transaction
    pub fn genesis(coinbase: Transaction) -> Self {
        Self::mine(None, vec![coinbase])
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    pub fn coinbase_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.is_coinbase()).count()
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.hash.as_bytes());

        match &self.prev_hash {
            Some(prev) => {
                buf.push(1);
                buf.extend_from_slice(prev.as_bytes());
            }
            None => buf.push(0),
        }

        buf.extend_from_slice(&self.nonce.to_le_bytes());

        write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }

        buf
    }

    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let hash = Hash256::new(read_array(reader)?);

        let prev_hash = match read_array::<R, 1>(reader)?[0] {
            0 => None,
            1 => Some(Hash256::new(read_array(reader)?)),
            flag => {
                return Err(ChainError::Codec(format!("Invalid prev hash flag: {}", flag)));
            }
        };

        let nonce = u64::from_le_bytes(read_array(reader)?);

        let tx_count = read_len(reader)?;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(reader)?);
        }

        Ok(Self {
            hash,
            prev_hash,
            transactions,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{DIFFICULTY, ProofOfWork};
    use crate::core::{TxInput, TxOutput};

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(Transaction::coinbase([1; 20], Vec::new()));

        assert!(genesis.is_genesis());
        assert_eq!(genesis.transactions.len(), 1);
        assert!(genesis.transactions[0].is_coinbase());
        assert!(genesis.hash.leading_zero_bits() >= DIFFICULTY);
        assert!(ProofOfWork::validate(&genesis));
    }

    #[test]
    fn test_block_round_trip() {
        let genesis = Block::genesis(Transaction::coinbase([1; 20], Vec::new()));

        let spend = Transaction::new(
            vec![
                TxInput::new(genesis.transactions[0].id, 0),
                TxInput::new(Hash256::new([5; 32]), 3),
            ],
            vec![TxOutput::new(4, [2; 20]), TxOutput::new(6, [1; 20])],
        );
        let block = Block::mine(
            Some(genesis.hash),
            vec![spend, Transaction::coinbase([3; 20], Vec::new())],
        );

        for original in [genesis, block] {
            let decoded = Block::deserialize(&original.serialize()).unwrap();
            assert_eq!(original, decoded);
        }
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let genesis = Block::genesis(Transaction::coinbase([1; 20], Vec::new()));
        let mut bytes = genesis.serialize();
        bytes.push(0);
        assert!(Block::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_coinbase_count() {
        let block = Block {
            hash: Hash256::zero(),
            prev_hash: None,
            transactions: vec![
                Transaction::coinbase([1; 20], Vec::new()),
                Transaction::coinbase([2; 20], Vec::new()),
            ],
            nonce: 0,
        };
        assert_eq!(block.coinbase_count(), 2);
    }
}
