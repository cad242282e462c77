//! Observer trait for chain tree events.

use tipwatch_common::{Block, BlockHash, BlockHeader};

/// Callback receiver for chain tree events.
///
/// The owning module implements this trait to translate tree events into
/// peer relay and `chain.events` publications.
pub trait ChainTreeObserver {
    /// A header passed proof-of-work and linkage checks and joined the tree.
    fn header_accepted(&self, header: &BlockHeader);

    /// A header-only tip needs its body fetched.
    fn block_wanted(&self, hash: BlockHash);

    /// A block joined the best validated chain.
    ///
    /// Called in strictly ascending height order with no gaps.
    fn block_connected(&self, height: u64, block: &Block);

    /// This node found a block invalid. Peers should be told.
    fn block_rejected(&self, hash: BlockHash, block: &Block);

    /// The best validated tip moved.
    fn best_block_changed(&self, hash: BlockHash, height: u64);

    /// The active mining tip moved.
    fn mining_tip_changed(&self, hash: BlockHash, height: u64);
}
