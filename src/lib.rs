// Gossip coin: a minimal proof-of-work UTXO chain synchronised by gossip

pub mod cli;
pub mod consensus;
pub mod core;
pub mod error;
pub mod mempool;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::cli::{Cli, CliHandler};
pub use crate::consensus::{DIFFICULTY, ProofOfWork, Target};
pub use crate::core::{Block, Hash256, REWARD, Transaction, TxInput, TxOutput};
pub use crate::error::{ChainError, Result};
pub use crate::mempool::Mempool;
pub use crate::network::{Message, Node, NodeConfig, Peer, PeerDirectory, StaticPeers};
pub use crate::storage::{BlockStore, BlockchainDB, Ledger, OutPoint, Utxo, UtxoSet};
pub use crate::wallet::{Address, KeyPair, Keystore, TransactionBuilder};
