//! Block representation within the chain tree.

use std::time::Instant;

use tipwatch_common::{Block, BlockHash, BlockHeader, ChainWork};

/// Where a tip is in the header-then-body lifecycle.
///
/// Transitions are one-way: `HeaderOnly` becomes either `BodyValid` or
/// `BodyInvalid` and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipStatus {
    /// Header known with valid proof of work; body not yet validated.
    HeaderOnly,
    /// Body received and passed validation.
    BodyValid,
    /// Body received and failed validation.
    BodyInvalid,
}

/// A node in the chain tree: a header, and its body once received.
#[derive(Debug, Clone)]
pub struct CandidateTip {
    /// Header identity hash (arena key).
    pub hash: BlockHash,
    pub header: BlockHeader,
    pub height: u64,
    /// Work of the chain ending here, inclusive.
    pub chain_work: ChainWork,
    /// `None` for the root.
    pub parent: Option<BlockHash>,
    pub children: Vec<BlockHash>,
    /// Body, kept once validated either way.
    pub body: Option<Block>,
    pub status: TipStatus,
    /// Arrival order, for tie-breaks.
    pub seq: u64,
    pub received_at: Instant,
    /// BodyValid with every ancestor BodyValid.
    pub connected: bool,
    /// Why validation failed.
    pub rejection: Option<String>,
}

impl CandidateTip {
    /// Create a header-only tip with no children.
    pub fn new(
        header: BlockHeader,
        height: u64,
        chain_work: ChainWork,
        seq: u64,
        received_at: Instant,
    ) -> Self {
        let hash = header.hash();
        let parent = Some(header.prev_block_hash);
        Self {
            hash,
            header,
            height,
            chain_work,
            parent,
            children: Vec::new(),
            body: None,
            status: TipStatus::HeaderOnly,
            seq,
            received_at,
            connected: false,
            rejection: None,
        }
    }

    /// May be mined on, as far as this tip alone is concerned.
    pub fn is_eligible(&self) -> bool {
        self.status != TipStatus::BodyInvalid
    }
}
