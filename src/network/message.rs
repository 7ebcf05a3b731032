// Network protocol messages

use crate::core::Hash256;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};

/// Protocol version announced in `version` messages
pub const PROTOCOL_VERSION: u32 = 1;

/// Width of the NUL-padded command field
pub const COMMAND_LENGTH: usize = 12;

/// Command plus little-endian payload length
pub const HEADER_LENGTH: usize = COMMAND_LENGTH + 4;

/// Largest payload a peer may send
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Inventory type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvKind {
    Block,
    Tx,
}

/// Version message: sender's chain height, used to decide who syncs from whom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: u32,
    /// `None` when the sender has no chain yet
    pub best_height: Option<u64>,
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

/// Inventory announcement. Block inventories list hashes tip first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Hash256,
}

/// Block body in its binary encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

/// Transaction body in its binary encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayload {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
}

impl Message {
    /// Wire command name
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    /// Listening address of the node that sent the message
    pub fn addr_from(&self) -> &str {
        match self {
            Message::Version(p) => &p.addr_from,
            Message::GetBlocks(p) => &p.addr_from,
            Message::Inv(p) => &p.addr_from,
            Message::GetData(p) => &p.addr_from,
            Message::Block(p) => &p.addr_from,
            Message::Tx(p) => &p.addr_from,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::Version(p) => serde_json::to_vec(p)?,
            Message::GetBlocks(p) => serde_json::to_vec(p)?,
            Message::Inv(p) => serde_json::to_vec(p)?,
            Message::GetData(p) => serde_json::to_vec(p)?,
            Message::Block(p) => serde_json::to_vec(p)?,
            Message::Tx(p) => serde_json::to_vec(p)?,
        };
        Ok(payload)
    }

    /// Encode as a full frame: command[12] || u32 LE length || payload
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ChainError::Codec(format!(
                "payload of {} bytes exceeds limit",
                payload.len()
            )));
        }

        let mut bytes = Vec::with_capacity(HEADER_LENGTH + payload.len());

        // Message type (12 bytes, padded with zeros)
        let mut command = [0u8; COMMAND_LENGTH];
        let name = self.command().as_bytes();
        command[..name.len()].copy_from_slice(name);
        bytes.extend_from_slice(&command);

        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        Ok(bytes)
    }

    /// Split a frame header into command name and payload length
    pub fn parse_header(header: &[u8; HEADER_LENGTH]) -> Result<(String, usize)> {
        let command = std::str::from_utf8(&header[..COMMAND_LENGTH])
            .map_err(|e| ChainError::Codec(format!("invalid command: {}", e)))?
            .trim_end_matches('\0')
            .to_string();

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[COMMAND_LENGTH..]);
        let payload_len = u32::from_le_bytes(len_bytes) as usize;

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ChainError::Codec(format!(
                "payload of {} bytes exceeds limit",
                payload_len
            )));
        }

        Ok((command, payload_len))
    }

    /// Decode the payload of a `command` message
    pub fn from_payload(command: &str, payload: &[u8]) -> Result<Self> {
        let message = match command {
            "version" => Message::Version(serde_json::from_slice(payload)?),
            "getblocks" => Message::GetBlocks(serde_json::from_slice(payload)?),
            "inv" => Message::Inv(serde_json::from_slice(payload)?),
            "getdata" => Message::GetData(serde_json::from_slice(payload)?),
            "block" => Message::Block(serde_json::from_slice(payload)?),
            "tx" => Message::Tx(serde_json::from_slice(payload)?),
            other => {
                return Err(ChainError::Codec(format!("unknown command: {:?}", other)));
            }
        };
        Ok(message)
    }

    /// Decode one complete frame
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let header: &[u8; HEADER_LENGTH] = data
            .get(..HEADER_LENGTH)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| ChainError::Codec("message too short".to_string()))?;
        let (command, payload_len) = Self::parse_header(header)?;

        let payload = &data[HEADER_LENGTH..];
        if payload.len() != payload_len {
            return Err(ChainError::Codec(format!(
                "payload length {} does not match header {}",
                payload.len(),
                payload_len
            )));
        }

        Self::from_payload(&command, payload)
    }
}
