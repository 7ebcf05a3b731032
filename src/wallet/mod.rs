// Wallet and transaction building

mod keystore;
mod tx_builder;

pub use keystore::{ADDRESS_VERSION, Address, KeyPair, Keystore};
pub use tx_builder::TransactionBuilder;
