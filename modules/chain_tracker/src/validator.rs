//! Header and block validity checks consumed by the chain tree.

use std::collections::HashSet;

use dashu_int::UBig;
use tipwatch_common::{
    consensus::max_block_size,
    pow::{check_proof_of_work, target_from_compact, work_from_compact, CompactTargetError},
    validation::{check_transaction, ValidationError, ValidationStatus},
    Block, BlockHeader, ChainWork,
};
use tracing::debug;

/// Validity capability the chain tree delegates to.
///
/// `validate_block` may be slow; the tracker calls it without holding the
/// tree lock.
pub trait ChainValidator: Send + Sync {
    /// Proof-of-work check on a header alone
    fn is_valid_header(&self, header: &BlockHeader) -> bool;

    /// Full check of a block whose body reproduces its header
    fn validate_block(&self, block: &Block) -> ValidationStatus;

    /// Work contributed by one header
    fn work(&self, header: &BlockHeader) -> ChainWork;
}

/// Proof-of-work header checks plus context-free block checks
pub struct ProofOfWorkValidator {
    pow_limit: UBig,
}

impl ProofOfWorkValidator {
    /// Validator for a network whose easiest allowed target is `limit_bits`
    pub fn new(limit_bits: u32) -> Result<Self, CompactTargetError> {
        Ok(Self {
            pow_limit: target_from_compact(limit_bits)?,
        })
    }

    fn check_block(&self, block: &Block) -> Result<(), ValidationError> {
        let Some(first) = block.transactions.first() else {
            return Err(ValidationError::Empty);
        };
        if !first.is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }
        if let Some(index) = block.transactions.iter().skip(1).position(|tx| tx.is_coinbase()) {
            return Err(ValidationError::MultipleCoinbase(index + 1));
        }

        if block.compute_merkle_root() != block.header.merkle_root {
            return Err(ValidationError::BadMerkleRoot);
        }

        let size = block.size();
        let limit = max_block_size(block.header.timestamp as u64);
        if size > limit {
            return Err(ValidationError::OversizedBlock { size, limit });
        }

        let coinbase_hash = first.hash();
        let mut ids = HashSet::new();
        let mut spent = HashSet::new();
        for tx in &block.transactions {
            check_transaction(tx)?;

            let hash = tx.hash();
            if !ids.insert(hash) {
                return Err(ValidationError::DuplicateTransaction(hash));
            }

            if tx.is_coinbase() {
                continue;
            }
            for outpoint in tx.spent_outpoints() {
                // Outputs of this block's coinbase are at best 0 blocks deep
                if outpoint.hash == coinbase_hash {
                    return Err(ValidationError::PrematureCoinbaseSpend { tx: hash });
                }
                if !spent.insert(*outpoint) {
                    return Err(ValidationError::DoubleSpend(*outpoint));
                }
            }
        }

        Ok(())
    }
}

impl ChainValidator for ProofOfWorkValidator {
    fn is_valid_header(&self, header: &BlockHeader) -> bool {
        match check_proof_of_work(&header.hash(), header.bits, &self.pow_limit) {
            Ok(valid) => valid,
            Err(e) => {
                debug!("Header {} has unusable target: {e}", header.hash());
                false
            }
        }
    }

    fn validate_block(&self, block: &Block) -> ValidationStatus {
        match self.check_block(block) {
            Ok(()) => ValidationStatus::Go,
            Err(e) => ValidationStatus::NoGo(e),
        }
    }

    fn work(&self, header: &BlockHeader) -> ChainWork {
        work_from_compact(header.bits)
    }
}
