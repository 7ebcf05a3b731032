// Proof of Work implementation

use crate::core::{Block, Hash256, Serializable, Transaction, sha256};
use std::time::{Duration, Instant};

/// Required number of leading zero bits in every block hash.
/// Fixed: there is no retargeting.
pub const DIFFICULTY: u32 = 12;

/// Difficulty target: a hash meets it when it has at least `bits` leading zero bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub bits: u32,
}

impl Target {
    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    /// Check if a hash meets this target
    #[inline]
    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        hash.leading_zero_bits() >= self.bits
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new(DIFFICULTY)
    }
}

/// Proof-of-work puzzle for one candidate block.
///
/// hash = SHA256(tx_digest || prev_hash || be64(nonce) || be64(difficulty))
pub struct ProofOfWork {
    target: Target,
    /// Everything before the nonce, hashed once per candidate
    prefix: Vec<u8>,
}

impl ProofOfWork {
    pub fn new(prev_hash: Option<Hash256>, transactions: &[Transaction]) -> Self {
        let mut serialized = Vec::new();
        for tx in transactions {
            serialized.extend_from_slice(&tx.serialize());
        }
        let tx_digest = sha256(&serialized);

        let mut prefix = Vec::with_capacity(64);
        prefix.extend_from_slice(tx_digest.as_bytes());
        if let Some(prev) = prev_hash {
            prefix.extend_from_slice(prev.as_bytes());
        }

        Self {
            target: Target::default(),
            prefix,
        }
    }

    fn hash_with_nonce(&self, nonce: u64) -> Hash256 {
        let mut data = Vec::with_capacity(self.prefix.len() + 16);
        data.extend_from_slice(&self.prefix);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&(self.target.bits as u64).to_be_bytes());
        sha256(&data)
    }

    /// Search nonces upward from zero; the first one meeting the target wins
    pub fn prepare(&self) -> MiningResult {
        let start_time = Instant::now();
        let mut nonce = 0u64;

        loop {
            let hash = self.hash_with_nonce(nonce);
            let attempts = nonce + 1;

            if self.target.is_met_by(&hash) {
                return MiningResult {
                    nonce,
                    hash,
                    attempts,
                    duration: start_time.elapsed(),
                };
            }

            // Progress indicator every 100k attempts
            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!(
                    "Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }

            nonce = nonce.wrapping_add(1);
        }
    }

    /// Recompute the hash from the block's fields and recorded nonce.
    /// Valid only when it meets the target and equals the stored hash.
    pub fn validate(block: &Block) -> bool {
        let pow = Self::new(block.prev_hash, &block.transactions);
        let hash = pow.hash_with_nonce(block.nonce);
        pow.target.is_met_by(&hash) && hash == block.hash
    }
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    /// The nonce that was found
    pub nonce: u64,
    /// The resulting hash
    pub hash: Hash256,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64()
    }
}
