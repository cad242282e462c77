//! Core type definitions for Tipwatch

use crate::crypto::{double_sha256, merkle_root, merkle_root_checked};
use crate::encoding::ConsensusEncoder;
use crate::hash::{BlockHash, Hash, TxHash};
use serde::{Deserialize, Serialize};

/// Size of an encoded block header
pub const HEADER_SIZE: usize = 80;

/// Reference to a transaction output
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction that created the output
    pub hash: TxHash,

    /// Output index within that transaction
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: TxHash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The outpoint a coinbase input refers to
    pub fn null() -> Self {
        Self {
            hash: Hash::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash.is_zero()
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Output being spent
    pub previous_output: OutPoint,

    /// Unlocking script
    #[serde(with = "hex_bytes")]
    pub script_sig: Vec<u8>,

    pub sequence: u32,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value in base units
    pub value: u64,

    /// Locking script
    #[serde(with = "hex_bytes")]
    pub script_pubkey: Vec<u8>,
}

/// Transaction - immutable once constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Consensus encoding
    pub fn encode(&self) -> Vec<u8> {
        let mut e = ConsensusEncoder::new();
        self.encode_into(&mut e);
        e.to_vec()
    }

    fn encode_into(&self, e: &mut ConsensusEncoder) {
        e.push_i32(self.version);
        e.push_compact_size(self.inputs.len() as u64);
        for input in &self.inputs {
            e.push_bytes(input.previous_output.hash.as_ref());
            e.push_u32(input.previous_output.index);
            e.push_var_bytes(&input.script_sig);
            e.push_u32(input.sequence);
        }
        e.push_compact_size(self.outputs.len() as u64);
        for output in &self.outputs {
            e.push_u64(output.value);
            e.push_var_bytes(&output.script_pubkey);
        }
        e.push_u32(self.lock_time);
    }

    /// Transaction id
    pub fn hash(&self) -> TxHash {
        double_sha256(&self.encode())
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        self.encode().len()
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Outpoints spent by this transaction, in input order
    pub fn spent_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().map(|input| &input.previous_output)
    }

    /// Sum of output values, `None` on overflow
    pub fn value_out(&self) -> Option<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }
}

/// Block header - immutable once received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,

    /// Hash of the block this one builds on
    pub prev_block_hash: BlockHash,

    /// Commitment to the block's transactions
    pub merkle_root: Hash<32>,

    /// Seconds since the Unix epoch
    pub timestamp: u32,

    /// Compact proof-of-work target
    pub bits: u32,

    pub nonce: u32,
}

impl BlockHeader {
    /// The 80-byte consensus encoding
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut e = ConsensusEncoder::with_capacity(HEADER_SIZE);
        e.push_i32(self.version);
        e.push_bytes(self.prev_block_hash.as_ref());
        e.push_bytes(self.merkle_root.as_ref());
        e.push_u32(self.timestamp);
        e.push_u32(self.bits);
        e.push_u32(self.nonce);

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&e.to_vec());
        out
    }

    /// Block identity hash
    pub fn hash(&self) -> BlockHash {
        double_sha256(&self.encode())
    }
}

/// Full block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Merkle root computed from the transactions carried in the body
    pub fn compute_merkle_root(&self) -> Hash<32> {
        let ids: Vec<TxHash> = self.transactions.iter().map(Transaction::hash).collect();
        merkle_root(&ids)
    }

    /// True if the body is the one the header commits to. A body whose
    /// transaction list is a merkle mutation never matches, even when it
    /// reproduces the root.
    pub fn body_matches_header(&self) -> bool {
        if self.transactions.is_empty() {
            return false;
        }
        let ids: Vec<TxHash> = self.transactions.iter().map(Transaction::hash).collect();
        let (root, mutated) = merkle_root_checked(&ids);
        !mutated && root == self.header.merkle_root
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        let mut e = ConsensusEncoder::new();
        e.push_bytes(&self.header.encode());
        e.push_compact_size(self.transactions.len() as u64);
        let header_len = e.len();
        header_len + self.transactions.iter().map(Transaction::size).sum::<usize>()
    }
}

/// Kind of object announced or requested between peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryKind {
    Transaction,
    Block,
}

/// Inventory vector entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inventory {
    pub kind: InventoryKind,
    pub hash: Hash<32>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
