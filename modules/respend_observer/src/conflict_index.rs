//! Index of every transaction seen spending each outpoint.

use std::collections::HashMap;

use tipwatch_common::{OutPoint, Transaction, TxHash};

/// Outpoint to spending transactions, in the order they were seen.
///
/// Holds admitted and rejected transactions alike. A hash is listed under an
/// outpoint exactly when that transaction spends it.
#[derive(Debug, Default)]
pub struct ConflictIndex {
    spenders: HashMap<OutPoint, Vec<TxHash>>,
}

impl ConflictIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transactions seen spending `outpoint`
    pub fn spenders(&self, outpoint: &OutPoint) -> &[TxHash] {
        self.spenders.get(outpoint).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record every input of `tx`. Returns false if it was already indexed.
    pub fn insert(&mut self, tx_hash: TxHash, tx: &Transaction) -> bool {
        let mut added = false;
        for outpoint in tx.spent_outpoints() {
            let spenders = self.spenders.entry(*outpoint).or_default();
            if !spenders.contains(&tx_hash) {
                spenders.push(tx_hash);
                added = true;
            }
        }
        added
    }

    /// Number of distinct outpoints indexed
    pub fn len(&self) -> usize {
        self.spenders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spenders.is_empty()
    }
}
