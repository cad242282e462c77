//! Definition of Tipwatch bus messages

use crate::queries::{
    mining::{MiningStateQuery, MiningStateQueryResponse},
    transactions::{TransactionsStateQuery, TransactionsStateQueryResponse},
};
use crate::types::*;
use crate::BlockHash;

/// Batch of headers announced by a peer
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct HeadersMessage {
    pub headers: Vec<BlockHeader>,
}

/// Full block body
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockMessage {
    pub block: Block,
}

/// Advisory claim that a block is invalid, carrying the body it is judged by
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InvalidBlockMessage {
    /// Identity of the block the claim is about
    pub hash: BlockHash,

    /// Claimed body
    pub block: Block,
}

/// Loose transaction
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TxMessage {
    pub tx: Transaction,
}

/// Request for objects by inventory
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct GetDataMessage {
    pub inventory: Vec<Inventory>,
}

/// Messages exchanged with peers, as delivered by (or handed to) the peer
/// network interface
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum NetworkMessage {
    Headers(HeadersMessage),
    Block(BlockMessage),
    InvalidBlock(InvalidBlockMessage),
    Tx(TxMessage),
    GetData(GetDataMessage),
}

/// A block newly connected to the best validated chain
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockConnectedMessage {
    pub height: u64,
    pub block: Block,
}

/// Tip reference carried by chain events
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TipMessage {
    pub hash: BlockHash,
    pub height: u64,
}

/// Events published by the chain tracker
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ChainMessage {
    BlockConnected(BlockConnectedMessage),
    BestBlockChanged(TipMessage),
    MiningTipChanged(TipMessage),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum StateQuery {
    Mining(MiningStateQuery),
    Transactions(TransactionsStateQuery),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum StateQueryResponse {
    Mining(MiningStateQueryResponse),
    Transactions(TransactionsStateQueryResponse),
}

// === Global message enum ===
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    None(()), // Just so we have a simple default

    // Peer messages, inbound and outbound
    Network(NetworkMessage),

    // Chain tracker events
    Chain(ChainMessage),

    // Request-response
    StateQuery(StateQuery),
    StateQueryResponse(StateQueryResponse),
}

impl Default for Message {
    fn default() -> Self {
        Self::None(())
    }
}

// Casts from specific messages
impl From<NetworkMessage> for Message {
    fn from(msg: NetworkMessage) -> Self {
        Message::Network(msg)
    }
}

impl From<ChainMessage> for Message {
    fn from(msg: ChainMessage) -> Self {
        Message::Chain(msg)
    }
}
