// P2P networking

mod message;
mod mining;
mod node;
mod peer;

pub use message::{
    BlockPayload, COMMAND_LENGTH, GetBlocksPayload, GetDataPayload, HEADER_LENGTH, InvKind,
    InvPayload, MAX_PAYLOAD_SIZE, Message, PROTOCOL_VERSION, TxPayload, VersionPayload,
};
pub use node::{DEFAULT_SEND_TIMEOUT, Envelope, MINING_THRESHOLD, Node, NodeConfig, deliver};
pub use peer::{Peer, PeerDirectory, StaticPeers, send_message};
