//! Consensus constants and size rules

/// 1 March 2016 00:00:00 UTC - block size limit rises from 1MB to 20MB
pub const TWENTY_MEG_FORK_TIME: u64 = 1_456_790_400;

/// The maximum allowed size for a serialized transaction, in bytes
pub const MAX_TRANSACTION_SIZE: usize = 1_000_000;

/// Largest amount any single output or transaction may carry
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// The maximum allowed size for a serialized block, in bytes
pub fn max_block_size(block_timestamp: u64) -> usize {
    if block_timestamp < TWENTY_MEG_FORK_TIME {
        1_000_000
    } else {
        20_000_000
    }
}
