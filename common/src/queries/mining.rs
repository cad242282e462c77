use crate::queries::errors::QueryError;
use crate::{Block, BlockHash, ChainWork};

pub const DEFAULT_MINING_QUERY_TOPIC: (&str, &str) = ("mining-query-topic", "node.query.mining");

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum MiningStateQuery {
    /// Where to mine next. `headfirst: None` mines only on fully validated
    /// blocks, `Some(0)` on any eligible header, `Some(n)` on headers
    /// received within the last `n` seconds.
    GetBlockTemplate { headfirst: Option<u64> },
    GetBestBlockHash,
    GetBlockCount,
    GetChainTips,
    SubmitBlock { block: Block },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum MiningStateQueryResponse {
    BlockTemplate(BlockTemplate),
    BestBlockHash(BlockHash),
    BlockCount(u64),
    ChainTips(Vec<ChainTipInfo>),
    BlockSubmitted(SubmitBlockResult),
    Error(QueryError),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockTemplate {
    /// Block the new block builds on
    pub previous_block_hash: BlockHash,

    /// Height of the block to be mined
    pub height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChainTipStatus {
    HeadersOnly,
    ValidFork,
    Active,
    Invalid,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChainTipInfo {
    pub hash: BlockHash,
    pub height: u64,
    pub chain_work: ChainWork,
    pub status: ChainTipStatus,

    /// Currently selected for head-first mining
    pub mining: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubmitBlockResult {
    pub hash: BlockHash,

    /// `None` when accepted, otherwise the rejection reason
    pub rejection: Option<String>,
}
