//! Validation results for Tipwatch block checks

use std::collections::HashSet;

use thiserror::Error;

use crate::consensus::{MAX_MONEY, MAX_TRANSACTION_SIZE};
use crate::{OutPoint, Transaction, TxHash};

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Error)]
pub enum ValidationError {
    #[error("block has no transactions")]
    Empty,

    #[error("first transaction is not a coinbase")]
    MissingCoinbase,

    #[error("more than one coinbase, second at index {0}")]
    MultipleCoinbase(usize),

    #[error("merkle root does not match transactions")]
    BadMerkleRoot,

    #[error("block size {size} exceeds limit {limit}")]
    OversizedBlock { size: usize, limit: usize },

    #[error("transaction {tx} size {size} exceeds limit")]
    OversizedTransaction { tx: TxHash, size: usize },

    #[error("transaction {0} has no inputs or no outputs")]
    EmptyTransaction(TxHash),

    #[error("transaction {0} output value out of range")]
    BadOutputValue(TxHash),

    #[error("transaction {0} appears twice")]
    DuplicateTransaction(TxHash),

    #[error("outpoint {}:{} spent twice", .0.hash, .0.index)]
    DoubleSpend(OutPoint),

    #[error("transaction {tx} spends coinbase of the same block")]
    PrematureCoinbaseSpend { tx: TxHash },
}

/// Validation status
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ValidationStatus {
    /// All good
    Go,

    /// Error
    NoGo(ValidationError),
}

/// Context-free checks on a single transaction
pub fn check_transaction(tx: &Transaction) -> Result<(), ValidationError> {
    let hash = tx.hash();
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(ValidationError::EmptyTransaction(hash));
    }

    let size = tx.size();
    if size > MAX_TRANSACTION_SIZE {
        return Err(ValidationError::OversizedTransaction { tx: hash, size });
    }

    if tx.outputs.iter().any(|o| o.value > MAX_MONEY) {
        return Err(ValidationError::BadOutputValue(hash));
    }
    match tx.value_out() {
        Some(total) if total <= MAX_MONEY => {}
        _ => return Err(ValidationError::BadOutputValue(hash)),
    }

    let mut seen = HashSet::new();
    for outpoint in tx.spent_outpoints() {
        if !seen.insert(*outpoint) {
            return Err(ValidationError::DoubleSpend(*outpoint));
        }
    }

    Ok(())
}
