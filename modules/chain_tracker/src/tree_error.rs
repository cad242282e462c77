//! Error types for chain tree operations.

use tipwatch_common::BlockHash;

/// Errors returned by [`ChainTree`](crate::chain_tree::ChainTree) operations.
///
/// All of them are local to the submitted item; none leaves the tree in a
/// partially updated state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainTrackerError {
    /// The header's hash does not meet its target, or the target is unusable.
    #[error("invalid proof of work: {hash}")]
    InvalidProofOfWork { hash: BlockHash },

    /// The header's parent is not known. Fetch the parent and retry.
    #[error("unknown parent {parent} of {hash}")]
    UnknownParent { hash: BlockHash, parent: BlockHash },

    /// The block body failed validation. Terminal for this block.
    #[error("block {hash} failed validation: {reason}")]
    ValidationFailure { hash: BlockHash, reason: String },

    /// The body does not reproduce the header's merkle commitment.
    #[error("block {hash} body does not match its header")]
    MutatedBody { hash: BlockHash },

    /// An out-of-band invalid-block notice that could not be checked.
    #[error("untrusted advisory for {hash}: {reason}")]
    UntrustedAdvisory { hash: BlockHash, reason: String },

    /// The validator never returned a verdict; the block stays unvalidated.
    #[error("validation of {hash} did not complete: {reason}")]
    ValidationAborted { hash: BlockHash, reason: String },

    /// A block hash referenced by an operation is not in the tree.
    #[error("block not in tree: {hash}")]
    BlockNotInTree { hash: BlockHash },
}
