// Network node - gossip protocol and chain synchronisation

use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::network::message::{
    BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    PROTOCOL_VERSION, TxPayload, VersionPayload,
};
use crate::network::peer::{Peer, PeerDirectory, send_message};
use crate::storage::{BlockAcceptance, Ledger, UtxoSet};
use crate::wallet::Address;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Pending transactions needed before a miner starts a block
pub const MINING_THRESHOLD: usize = 2;

/// How long one outbound delivery may take
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listening address, also the identity announced to peers
    pub address: String,
    /// Reward address; mining is enabled when set
    pub miner_address: Option<Address>,
    pub send_timeout: Duration,
}

impl NodeConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            miner_address: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Outbound message waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub message: Message,
}

/// Network node
pub struct Node {
    pub(super) config: NodeConfig,
    pub(super) ledger: Arc<Ledger>,
    pub(super) utxo_set: Arc<UtxoSet>,
    pub(super) mempool: Arc<Mempool>,
    pub(super) peers: Arc<dyn PeerDirectory>,
    /// Block hashes announced by a peer and not yet requested
    in_transit: Mutex<Vec<Hash256>>,
    /// Held while a mining task runs
    pub(super) mining: tokio::sync::Mutex<()>,
    outbox: UnboundedSender<Envelope>,
}

impl Node {
    /// Create a node. Messages it sends are queued on the returned receiver;
    /// hand it to [`deliver`] to put them on the wire.
    pub fn new(
        config: NodeConfig,
        ledger: Arc<Ledger>,
        utxo_set: Arc<UtxoSet>,
        mempool: Arc<Mempool>,
        peers: Arc<dyn PeerDirectory>,
    ) -> (Arc<Self>, UnboundedReceiver<Envelope>) {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let node = Arc::new(Self {
            config,
            ledger,
            utxo_set,
            mempool,
            peers,
            in_transit: Mutex::new(Vec::new()),
            mining: tokio::sync::Mutex::new(()),
            outbox,
        });
        (node, outbox_rx)
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn utxo_set(&self) -> &Arc<UtxoSet> {
        &self.utxo_set
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// Queue `message` for `to`
    pub(super) fn send(&self, to: &str, message: Message) {
        log::debug!("Queueing {} for {}", message.command(), to);
        let envelope = Envelope {
            to: to.to_string(),
            message,
        };
        if self.outbox.send(envelope).is_err() {
            log::warn!("Outbox closed, dropping message for {}", to);
        }
    }

    /// Live peers other than this node and `except`
    pub(super) fn other_peers(&self, except: Option<&str>) -> Vec<String> {
        self.peers
            .live_peers()
            .into_iter()
            .filter(|peer| peer != self.address() && Some(peer.as_str()) != except)
            .collect()
    }

    /// The relay node is the first live peer
    fn is_relay(&self) -> bool {
        self.peers.live_peers().first().map(String::as_str) == Some(self.address())
    }

    fn version_message(&self) -> Message {
        Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            best_height: self.ledger.best_height(),
            addr_from: self.address().to_string(),
        })
    }

    /// Introduce ourselves to the relay node
    pub fn announce(&self) {
        if let Some(relay) = self.peers.live_peers().first() {
            if relay != self.address() {
                log::info!("Announcing to relay node {}", relay);
                self.send(relay, self.version_message());
            }
        }
    }

    /// Run `f` against the ledger on the blocking pool
    pub(super) async fn with_ledger<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Ledger) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| ChainError::Network(format!("blocking task failed: {}", e)))?
    }

    /// Rebuild the UTXO index from the ledger
    pub(super) async fn reindex(&self) -> Result<()> {
        let utxo_set = Arc::clone(&self.utxo_set);
        self.with_ledger(move |ledger| utxo_set.reindex(ledger))
            .await
    }

    /// Dispatch one inbound message
    pub async fn handle(self: &Arc<Self>, message: Message) -> Result<()> {
        log::debug!(
            "Received {} from {}",
            message.command(),
            message.addr_from()
        );

        match message {
            Message::Version(payload) => self.handle_version(payload),
            Message::GetBlocks(payload) => self.handle_get_blocks(payload).await,
            Message::Inv(payload) => self.handle_inv(payload).await,
            Message::GetData(payload) => self.handle_get_data(payload).await,
            Message::Block(payload) => self.handle_block(payload).await,
            Message::Tx(payload) => self.handle_tx(payload),
        }
    }

    fn handle_version(&self, payload: VersionPayload) -> Result<()> {
        let local = self.ledger.best_height();
        let remote = payload.best_height;

        if local < remote {
            log::info!(
                "Peer {} is ahead ({:?} > {:?}), requesting blocks",
                payload.addr_from,
                remote,
                local
            );
            self.send(
                &payload.addr_from,
                Message::GetBlocks(GetBlocksPayload {
                    addr_from: self.address().to_string(),
                }),
            );
        } else if local > remote {
            self.send(&payload.addr_from, self.version_message());
        }

        Ok(())
    }

    async fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<()> {
        let items = self.with_ledger(|ledger| ledger.block_hashes()).await?;
        self.send(
            &payload.addr_from,
            Message::Inv(InvPayload {
                addr_from: self.address().to_string(),
                kind: InvKind::Block,
                items,
            }),
        );
        Ok(())
    }

    async fn handle_inv(&self, payload: InvPayload) -> Result<()> {
        log::info!(
            "Received inventory with {} {:?} item(s) from {}",
            payload.items.len(),
            payload.kind,
            payload.addr_from
        );

        match payload.kind {
            InvKind::Block => {
                let items = payload.items;
                let missing = self
                    .with_ledger(move |ledger| {
                        let mut missing = Vec::new();
                        for hash in items {
                            if !ledger.has_block(&hash)? {
                                missing.push(hash);
                            }
                        }
                        Ok(missing)
                    })
                    .await?;

                let next = {
                    let mut in_transit = self
                        .in_transit
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    *in_transit = missing;
                    if in_transit.is_empty() {
                        None
                    } else {
                        Some(in_transit.remove(0))
                    }
                };

                if let Some(hash) = next {
                    self.request(&payload.addr_from, InvKind::Block, hash);
                }
            }
            InvKind::Tx => {
                if let Some(id) = payload.items.first() {
                    if !self.mempool.contains(id) {
                        self.request(&payload.addr_from, InvKind::Tx, *id);
                    }
                }
            }
        }

        Ok(())
    }

    fn request(&self, to: &str, kind: InvKind, id: Hash256) {
        self.send(
            to,
            Message::GetData(GetDataPayload {
                addr_from: self.address().to_string(),
                kind,
                id,
            }),
        );
    }

    async fn handle_get_data(&self, payload: GetDataPayload) -> Result<()> {
        let addr_from = self.address().to_string();

        match payload.kind {
            InvKind::Block => {
                let id = payload.id;
                match self.with_ledger(move |ledger| ledger.get_block(&id)).await {
                    Ok(block) => self.send(
                        &payload.addr_from,
                        Message::Block(BlockPayload {
                            addr_from,
                            block: block.serialize(),
                        }),
                    ),
                    Err(e) if e.is_not_found() => {
                        log::warn!("Peer {} asked for unknown block {}", payload.addr_from, id);
                    }
                    Err(e) => return Err(e),
                }
            }
            InvKind::Tx => match self.mempool.get(&payload.id) {
                Some(tx) => self.send(
                    &payload.addr_from,
                    Message::Tx(TxPayload {
                        addr_from,
                        transaction: tx.serialize(),
                    }),
                ),
                None => {
                    log::warn!(
                        "Peer {} asked for unknown transaction {}",
                        payload.addr_from,
                        payload.id
                    );
                }
            },
        }

        Ok(())
    }

    async fn handle_block(&self, payload: BlockPayload) -> Result<()> {
        let block = Block::deserialize(&payload.block)?;
        let hash = block.hash;

        match self.with_ledger(move |ledger| ledger.accept_block(block)).await {
            Ok(BlockAcceptance::Connected(blocks)) => {
                log::info!("Added block {} ({} connected)", hash, blocks.len());
                let mined: Vec<Hash256> = blocks
                    .iter()
                    .flat_map(|block| block.transactions.iter().map(|tx| tx.id))
                    .collect();
                self.mempool.remove_all(&mined);
            }
            Ok(BlockAcceptance::Orphaned) => log::debug!(
                "Block {} waits for its parent ({} buffered)",
                hash,
                self.ledger.orphan_count()
            ),
            Ok(BlockAcceptance::Known) => log::debug!("Block {} already stored", hash),
            Err(e) if e.is_consensus_violation() => {
                log::warn!("Rejected block {} from {}: {}", hash, payload.addr_from, e);
            }
            Err(e) => return Err(e),
        }

        let next = {
            let mut in_transit = self
                .in_transit
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if in_transit.is_empty() {
                None
            } else {
                Some(in_transit.remove(0))
            }
        };

        match next {
            Some(hash) => self.request(&payload.addr_from, InvKind::Block, hash),
            None => self.reindex().await?,
        }

        Ok(())
    }

    fn handle_tx(self: &Arc<Self>, payload: TxPayload) -> Result<()> {
        let tx = Transaction::deserialize(&payload.transaction)?;
        let id = tx.id;
        self.mempool.add(tx);

        if self.is_relay() {
            for peer in self.other_peers(Some(&payload.addr_from)) {
                self.send(
                    &peer,
                    Message::Inv(InvPayload {
                        addr_from: self.address().to_string(),
                        kind: InvKind::Tx,
                        items: vec![id],
                    }),
                );
            }
        } else if self.mempool.len() >= MINING_THRESHOLD && self.config.miner_address.is_some() {
            self.trigger_mining();
        }

        Ok(())
    }

    /// Accept connections until shutdown is requested, then flush the ledger
    pub async fn run(self: Arc<Self>, outbox: UnboundedReceiver<Envelope>) -> Result<()> {
        let listener = TcpListener::bind(self.address()).await?;
        log::info!("Node listening on {}", self.address());

        let delivery = tokio::spawn(deliver(outbox, self.config.send_timeout));
        self.announce();

        let result = tokio::select! {
            result = self.accept_loop(listener) => result,
            _ = shutdown_signal() => {
                log::info!("Shutting down node {}", self.address());
                Ok(())
            }
        };

        delivery.abort();
        self.ledger.close()?;
        result
    }

    async fn accept_loop(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New connection from {}", addr);

            let node = Arc::clone(self);
            tokio::spawn(async move {
                node.serve(Peer::new(stream, addr.to_string())).await;
            });
        }
    }

    /// Read messages off one connection, handling each in its own task
    async fn serve(self: Arc<Self>, mut peer: Peer) {
        loop {
            match peer.receive_message().await {
                Ok(Some(message)) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        let command = message.command();
                        if let Err(e) = node.handle(message).await {
                            log::warn!("Failed to handle {}: {}", command, e);
                        }
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to receive message from {}: {}", peer.addr(), e);
                    break;
                }
            }
        }
    }
}

/// Drain the outbox, sending each envelope over its own connection
pub async fn deliver(mut outbox: UnboundedReceiver<Envelope>, timeout: Duration) {
    while let Some(envelope) = outbox.recv().await {
        tokio::spawn(async move {
            if let Err(e) = send_message(&envelope.to, &envelope.message, timeout).await {
                log::warn!(
                    "Dropped {} for {}: {}",
                    envelope.message.command(),
                    envelope.to,
                    e
                );
            }
        });
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                log::error!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
