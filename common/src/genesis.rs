//! Genesis headers the chain tracker can be rooted at

use crate::hash::Hash;
use crate::pow::REGTEST_POW_LIMIT_BITS;
use crate::types::BlockHeader;

/// Merkle root of the genesis coinbase, in header byte order
const GENESIS_MERKLE_ROOT: [u8; 32] = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f,
    0x61, 0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e,
    0x5e, 0x4a,
];

/// Regression-test network genesis header
pub fn regtest_genesis_header() -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block_hash: Hash::ZERO,
        merkle_root: Hash::new(GENESIS_MERKLE_ROOT),
        timestamp: 1_296_688_602,
        bits: REGTEST_POW_LIMIT_BITS,
        nonce: 2,
    }
}

/// Look up a genesis header by network name
pub fn genesis_for_network(name: &str) -> Option<BlockHeader> {
    match name {
        "regtest" => Some(regtest_genesis_header()),
        _ => None,
    }
}
