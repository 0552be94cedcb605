//! Network message types for P2P communication
//!
//! Three messages drive chain reconciliation. On the wire each is a JSON
//! object `{"type": 0|1|2, "data": [...]}` where `data` is present only for
//! a chain response.

use crate::core::Block;
use serde::{Deserialize, Serialize};

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = *b"PWCH";

/// Largest accepted message body in bytes
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

const QUERY_LATEST: u8 = 0;
const QUERY_ALL: u8 = 1;
const RESPONSE_CHAIN: u8 = 2;

/// Network message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMessage", try_from = "WireMessage")]
pub enum Message {
    /// Ask for the peer's tip block
    QueryLatest,
    /// Ask for the peer's whole chain
    QueryAll,
    /// A single tip block or a full chain
    ResponseChain(Vec<Block>),
}

/// JSON shape of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Vec<Block>>,
}

impl From<Message> for WireMessage {
    fn from(msg: Message) -> Self {
        match msg {
            Message::QueryLatest => WireMessage {
                kind: QUERY_LATEST,
                data: None,
            },
            Message::QueryAll => WireMessage {
                kind: QUERY_ALL,
                data: None,
            },
            Message::ResponseChain(blocks) => WireMessage {
                kind: RESPONSE_CHAIN,
                data: Some(blocks),
            },
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        match wire.kind {
            QUERY_LATEST => Ok(Message::QueryLatest),
            QUERY_ALL => Ok(Message::QueryAll),
            RESPONSE_CHAIN => Ok(Message::ResponseChain(wire.data.unwrap_or_default())),
            other => Err(format!("unknown message type {}", other)),
        }
    }
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::QueryLatest => "QueryLatest",
            Message::QueryAll => "QueryAll",
            Message::ResponseChain(_) => "ResponseChain",
        }
    }
}
