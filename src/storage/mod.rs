// Storage layer: block store, ledger and UTXO index

mod blockchain_db;
pub(crate) mod ledger;
mod utxo_set;

pub use blockchain_db::{BlockStore, BlockchainDB};
pub use ledger::{BlockAcceptance, BlockIter, GENESIS_DATA, Ledger, MAX_ORPHANS};
pub use utxo_set::{OutPoint, Utxo, UtxoIndex, UtxoSet, compute_index};
