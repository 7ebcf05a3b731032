// Error types for ledger, consensus and network operations

use crate::core::Hash256;
use thiserror::Error;

fn fmt_link(hash: &Option<Hash256>) -> String {
    match hash {
        Some(hash) => hash.to_hex(),
        None => "<none>".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Invalid proof of work for block {0}")]
    InvalidProofOfWork(Hash256),

    #[error("Broken hash linkage: expected prev {}, found {}", fmt_link(.expected), fmt_link(.found))]
    BrokenLinkage {
        expected: Option<Hash256>,
        found: Option<Hash256>,
    },

    #[error("Output {txid}:{index} is already spent")]
    DoubleSpend { txid: Hash256, index: u32 },

    #[error("Invalid transaction {0}: {1}")]
    InvalidTransaction(Hash256, String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Block not found: {0}")]
    BlockNotFound(Hash256),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Hash256),

    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Blockchain already exists")]
    ChainExists,

    #[error("No blockchain found, create one first")]
    NoChain,

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] secp256k1::Error),
}

impl ChainError {
    /// Errors that reject a block or transaction on consensus grounds.
    /// The operation that raised them must leave the ledger untouched.
    pub fn is_consensus_violation(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidProofOfWork(_)
                | ChainError::BrokenLinkage { .. }
                | ChainError::DoubleSpend { .. }
                | ChainError::InvalidTransaction(..)
                | ChainError::InvalidBlock(_)
        )
    }

    /// Missing block, transaction or prior output.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChainError::BlockNotFound(_) | ChainError::TransactionNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
