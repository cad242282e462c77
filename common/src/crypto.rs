//! Hash functions used for block and transaction identities

use crate::hash::Hash;
use sha2::{Digest, Sha256};

/// SHA-256 applied twice
pub fn double_sha256(data: &[u8]) -> Hash<32> {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash::new(second.into())
}

/// Merkle root over a list of leaf hashes.
///
/// Odd-length levels duplicate their last entry. An empty list gives the
/// zero hash.
pub fn merkle_root(leaves: &[Hash<32>]) -> Hash<32> {
    merkle_root_checked(leaves).0
}

/// Merkle root plus whether any level held two identical adjacent entries.
///
/// Such a list hashes to the same root as a shorter one with the duplicate
/// dropped, so a body built from it cannot be trusted to be the one the root
/// commits to.
pub fn merkle_root_checked(leaves: &[Hash<32>]) -> (Hash<32>, bool) {
    if leaves.is_empty() {
        return (Hash::ZERO, false);
    }

    let mut mutated = false;
    let mut level: Vec<Hash<32>> = leaves.to_vec();
    while level.len() > 1 {
        mutated |= level.chunks(2).any(|pair| pair.len() == 2 && pair[0] == pair[1]);
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut concat = [0u8; 64];
                concat[..32].copy_from_slice(pair[0].as_ref());
                concat[32..].copy_from_slice(pair[1].as_ref());
                double_sha256(&concat)
            })
            .collect();
    }
    (level[0], mutated)
}
