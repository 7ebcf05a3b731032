// Peer connection management

use crate::error::{ChainError, Result};
use crate::network::message::{HEADER_LENGTH, Message};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Source of the peers a node gossips with
pub trait PeerDirectory: Send + Sync {
    /// Reachable peer addresses. The first entry is the relay node.
    fn live_peers(&self) -> Vec<String>;
}

/// Fixed peer list taken from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticPeers {
    peers: Vec<String>,
}

impl StaticPeers {
    pub fn new(peers: Vec<String>) -> Self {
        Self { peers }
    }
}

impl PeerDirectory for StaticPeers {
    fn live_peers(&self) -> Vec<String> {
        self.peers.clone()
    }
}

/// Peer connection
pub struct Peer {
    addr: String,
    stream: TcpStream,
}

impl Peer {
    /// Wrap an accepted TCP stream
    pub fn new(stream: TcpStream, addr: String) -> Self {
        Self { addr, stream }
    }

    /// Connect to a peer
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ChainError::Network(format!("failed to connect to {}: {}", addr, e)))?;

        Ok(Self::new(stream, addr.to_string()))
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        let data = message.serialize()?;
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive the next message; `None` once the peer has closed the connection
    pub async fn receive_message(&mut self) -> Result<Option<Message>> {
        let mut header = [0u8; HEADER_LENGTH];
        match self.stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let (command, payload_len) = Message::parse_header(&header)?;

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            self.stream.read_exact(&mut payload).await?;
        }

        Message::from_payload(&command, &payload).map(Some)
    }

    /// Get peer address
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

/// Deliver one message over a fresh connection, giving up after `timeout`
pub async fn send_message(addr: &str, message: &Message, timeout: Duration) -> Result<()> {
    let delivery = async {
        let mut peer = Peer::connect(addr).await?;
        peer.send_message(message).await
    };

    tokio::time::timeout(timeout, delivery)
        .await
        .map_err(|_| ChainError::Network(format!("timed out sending to {}", addr)))?
}
