//! Proof-of-work primitives: compact targets, header checks and chain work

use crate::hash::BlockHash;
use dashu_int::UBig;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Regression-test proof-of-work limit - half of all hashes satisfy it
pub const REGTEST_POW_LIMIT_BITS: u32 = 0x207f_ffff;

/// Reasons a compact target is unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactTargetError {
    #[error("negative target in bits {0:#010x}")]
    Negative(u32),

    #[error("target overflows 256 bits in bits {0:#010x}")]
    Overflow(u32),

    #[error("zero target in bits {0:#010x}")]
    Zero(u32),

    #[error("target of bits {0:#010x} is easier than the proof-of-work limit")]
    AboveLimit(u32),
}

/// Expand compact `bits` into a full 256-bit target
pub fn target_from_compact(bits: u32) -> Result<UBig, CompactTargetError> {
    let size = bits >> 24;
    let word = bits & 0x007f_ffff;

    if word != 0 && (bits & 0x0080_0000) != 0 {
        return Err(CompactTargetError::Negative(bits));
    }
    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(CompactTargetError::Overflow(bits));
    }

    let target = if size <= 3 {
        UBig::from(word >> (8 * (3 - size)))
    } else {
        UBig::from(word) << (8 * (size as usize - 3))
    };

    if target == UBig::ZERO {
        return Err(CompactTargetError::Zero(bits));
    }
    Ok(target)
}

/// Header hash interpreted as a little-endian 256-bit integer
pub fn hash_to_int(hash: &BlockHash) -> UBig {
    UBig::from_be_bytes(&hash.to_be_int_bytes())
}

/// Check a header hash against its claimed target and the network limit
pub fn check_proof_of_work(
    hash: &BlockHash,
    bits: u32,
    limit: &UBig,
) -> Result<bool, CompactTargetError> {
    let target = target_from_compact(bits)?;
    if &target > limit {
        return Err(CompactTargetError::AboveLimit(bits));
    }
    Ok(hash_to_int(hash) <= target)
}

/// Expected number of hashes to meet `bits`: 2^256 / (target + 1)
pub fn work_from_compact(bits: u32) -> ChainWork {
    match target_from_compact(bits) {
        Ok(target) => ChainWork((UBig::ONE << 256) / (target + UBig::ONE)),
        Err(_) => ChainWork::zero(),
    }
}

/// Cumulative proof of work of a chain, orderable
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainWork(UBig);

impl ChainWork {
    pub fn zero() -> Self {
        Self(UBig::ZERO)
    }

    pub fn from_u64(work: u64) -> Self {
        Self(UBig::from(work))
    }

    /// Work of a chain extended by `other`
    pub fn plus(&self, other: &ChainWork) -> ChainWork {
        ChainWork(&self.0 + &other.0)
    }

    pub fn to_hex(&self) -> String {
        let bytes = self.0.to_be_bytes();
        if bytes.is_empty() {
            "00".to_string()
        } else {
            hex::encode(bytes)
        }
    }
}

impl Default for ChainWork {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChainWork").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ChainWork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainWork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Ok(ChainWork(UBig::from_be_bytes(&bytes)))
    }
}
