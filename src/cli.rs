// CLI commands

use crate::consensus::ProofOfWork;
use crate::core::{Block, Serializable, Transaction};
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::network::{
    self, DEFAULT_SEND_TIMEOUT, Message, Node, NodeConfig, StaticPeers, TxPayload,
};
use crate::storage::{BlockchainDB, Ledger, UtxoSet};
use crate::wallet::{Address, Keystore, TransactionBuilder};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Relay node a wallet submits transactions to when no peer is given
pub const DEFAULT_RELAY: &str = "127.0.0.1:3000";

#[derive(Parser, Debug)]
#[command(name = "gossip-coin")]
#[command(about = "Minimal proof-of-work UTXO chain with gossip sync", long_about = None)]
pub struct Cli {
    /// Directory holding the block store and keystore
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mine the genesis block paying its reward to ADDRESS
    CreateChain {
        #[arg(long)]
        address: String,
    },

    /// Get balance for an address
    Balance {
        #[arg(long)]
        address: String,
    },

    /// Send coins between addresses
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction locally instead of submitting it to a peer
        #[arg(long)]
        mine: bool,
        /// Node to submit the transaction to
        #[arg(long)]
        peer: Option<String>,
    },

    /// Print every block from tip to genesis
    PrintChain,

    /// Rebuild the UTXO index
    Reindex,

    /// Wallet commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Run a gossip node
    Node {
        /// Address to listen on, also announced to peers
        #[arg(long)]
        listen: String,
        /// Known peers; the first one is the relay node
        #[arg(long = "peer")]
        peers: Vec<String>,
        /// Reward address; enables mining
        #[arg(long)]
        miner: Option<String>,
        #[arg(long, default_value_t = DEFAULT_SEND_TIMEOUT.as_secs())]
        send_timeout_secs: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum WalletCommands {
    /// Create a new address
    New,

    /// List all addresses
    List,
}

/// CLI handler
pub struct CliHandler {
    data_dir: PathBuf,
    keystore: Keystore,
    keystore_path: PathBuf,
    /// Opened on first use
    ledger: Option<Arc<Ledger>>,
}

impl CliHandler {
    /// Create a new CLI handler
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let keystore_path = data_dir.join("keystore.json");
        log::debug!("Loading keystore from {}", keystore_path.display());
        let keystore = Keystore::open(&keystore_path)?;

        Ok(Self {
            data_dir,
            keystore,
            keystore_path,
            ledger: None,
        })
    }

    fn open_ledger(&mut self) -> Result<Arc<Ledger>> {
        if let Some(ledger) = &self.ledger {
            return Ok(Arc::clone(ledger));
        }

        let store = BlockchainDB::new(self.data_dir.join("blocks"))?;
        let ledger = Arc::new(Ledger::open(store)?);
        self.ledger = Some(Arc::clone(&ledger));
        Ok(ledger)
    }

    /// Open the ledger, failing if no chain has been created yet
    fn open_chain(&mut self) -> Result<Arc<Ledger>> {
        let ledger = self.open_ledger()?;
        if ledger.tip().is_none() {
            return Err(ChainError::NoChain);
        }
        Ok(ledger)
    }

    /// Handle CLI command
    pub fn handle(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::CreateChain { address } => self.create_chain(&Address::parse(&address)?),
            Commands::Balance { address } => {
                let address = Address::parse(&address)?;
                let balance = self.balance(&address)?;
                println!("Balance of '{}': {}", address, balance);
                Ok(())
            }
            Commands::Send {
                from,
                to,
                amount,
                mine,
                peer,
            } => {
                let from = Address::parse(&from)?;
                let to = Address::parse(&to)?;
                if mine {
                    self.send_and_mine(&from, &to, amount)?;
                } else {
                    let peer = peer.as_deref().unwrap_or(DEFAULT_RELAY);
                    self.send_to_peer(&from, &to, amount, peer)?;
                }
                println!("Success!");
                Ok(())
            }
            Commands::PrintChain => self.print_chain(),
            Commands::Reindex => {
                let ledger = self.open_chain()?;
                let utxo_set = UtxoSet::from_ledger(&ledger)?;
                println!(
                    "Done! There are {} transactions in the UTXO set.",
                    utxo_set.count_transactions()
                );
                Ok(())
            }
            Commands::Wallet(cmd) => self.handle_wallet(cmd),
            Commands::Node {
                listen,
                peers,
                miner,
                send_timeout_secs,
            } => self.run_node(listen, peers, miner, send_timeout_secs),
        }
    }

    fn create_chain(&mut self, address: &Address) -> Result<()> {
        let ledger = self.open_ledger()?;
        let genesis = ledger.create_genesis(address)?;
        ledger.close()?;

        println!("Genesis block created");
        println!("  Hash: {}", genesis.hash);
        Ok(())
    }

    /// Sum of unspent outputs locked to `address`
    pub fn balance(&mut self, address: &Address) -> Result<u64> {
        let pub_key_hash = address.pub_key_hash()?;
        let ledger = self.open_chain()?;
        let utxo_set = UtxoSet::from_ledger(&ledger)?;
        Ok(utxo_set.balance(&pub_key_hash))
    }

    fn build_transaction(
        &self,
        ledger: &Ledger,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<Transaction> {
        let utxo_set = UtxoSet::from_ledger(ledger)?;
        TransactionBuilder::new(&self.keystore, &utxo_set, ledger).build(from, to, amount)
    }

    /// Build the payment and mine it into a block paying the reward to the sender
    pub fn send_and_mine(&mut self, from: &Address, to: &Address, amount: u64) -> Result<Block> {
        let ledger = self.open_chain()?;
        let tx = self.build_transaction(&ledger, from, to, amount)?;

        let coinbase = Transaction::coinbase(from.pub_key_hash()?, Vec::new());
        let block = ledger.append(vec![coinbase, tx])?;
        ledger.close()?;

        log::info!("Mined block {}", block.hash);
        Ok(block)
    }

    fn send_to_peer(&mut self, from: &Address, to: &Address, amount: u64, peer: &str) -> Result<()> {
        let ledger = self.open_chain()?;
        let tx = self.build_transaction(&ledger, from, to, amount)?;

        let message = Message::Tx(TxPayload {
            addr_from: "0.0.0.0:0".to_string(),
            transaction: tx.serialize(),
        });

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(network::send_message(peer, &message, DEFAULT_SEND_TIMEOUT))?;

        log::info!("Submitted transaction {} to {}", tx.id, peer);
        Ok(())
    }

    fn print_chain(&mut self) -> Result<()> {
        let ledger = self.open_chain()?;

        for block in ledger.iter() {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            match block.prev_hash {
                Some(prev) => println!("Prev. block: {}", prev),
                None => println!("Prev. block: (genesis)"),
            }
            println!("Nonce: {}", block.nonce);
            println!("PoW: {}", ProofOfWork::validate(&block));

            for tx in &block.transactions {
                println!("--- Transaction {}:", tx.id);
                for (i, input) in tx.inputs.iter().enumerate() {
                    if input.is_coinbase() {
                        println!("     Input {}: coinbase", i);
                    } else {
                        println!(
                            "     Input {}: {}:{}",
                            i, input.prev_tx_id, input.prev_index
                        );
                    }
                }
                for (i, output) in tx.outputs.iter().enumerate() {
                    println!(
                        "     Output {}: {} -> {}",
                        i,
                        output.value,
                        Address::from_pub_key_hash(&output.pub_key_hash)
                    );
                }
            }
            println!();
        }

        Ok(())
    }

    /// Handle wallet commands
    fn handle_wallet(&mut self, cmd: WalletCommands) -> Result<()> {
        match cmd {
            WalletCommands::New => {
                let address = self.keystore.new_address();
                self.keystore.save(&self.keystore_path)?;
                println!("New address: {}", address);
                Ok(())
            }
            WalletCommands::List => {
                println!("Addresses ({}):", self.keystore.count());
                for address in self.keystore.list_addresses() {
                    println!("  {}", address);
                }
                Ok(())
            }
        }
    }

    fn run_node(
        &mut self,
        listen: String,
        peers: Vec<String>,
        miner: Option<String>,
        send_timeout_secs: u64,
    ) -> Result<()> {
        let mut config = NodeConfig::new(listen);
        config.miner_address = miner.as_deref().map(Address::parse).transpose()?;
        config.send_timeout = Duration::from_secs(send_timeout_secs);

        if let Some(miner) = &config.miner_address {
            log::info!("Mining is on. Address to receive rewards: {}", miner);
        }

        let ledger = self.open_ledger()?;
        let utxo_set = Arc::new(UtxoSet::from_ledger(&ledger)?);
        let (node, outbox) = Node::new(
            config,
            ledger,
            utxo_set,
            Arc::new(Mempool::new()),
            Arc::new(StaticPeers::new(peers)),
        );

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(node.run(outbox))
    }

    /// Addresses held by the keystore
    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }
}
