//! Pool of unconfirmed transactions without replacement.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tipwatch_common::{
    validation::{check_transaction, ValidationError},
    Block, OutPoint, Transaction, TxHash,
};
use tracing::debug;

/// Why a transaction was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("transaction {0} already in mempool")]
    AlreadyInMempool(TxHash),

    #[error("coinbase {0} is only valid in a block")]
    Coinbase(TxHash),

    #[error("malformed transaction: {0}")]
    Malformed(#[from] ValidationError),

    #[error("transaction {tx} spends {}:{} already spent by {existing}", .outpoint.hash, .outpoint.index)]
    Conflict {
        tx: TxHash,
        outpoint: OutPoint,
        existing: TxHash,
    },
}

/// Admitted transactions plus the spend map used to find conflicts and
/// descendants
#[derive(Debug, Default)]
pub struct Mempool {
    txs: HashMap<TxHash, (u64, Transaction)>,
    /// Outpoint to the mempool transaction spending it
    next_tx: HashMap<OutPoint, TxHash>,
    next_seq: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transaction unless it is present, malformed or spends an
    /// outpoint a mempool transaction already spends. The first spend wins.
    pub fn try_admit(&mut self, tx: &Transaction) -> Result<(), AdmissionError> {
        let hash = tx.hash();
        if self.txs.contains_key(&hash) {
            return Err(AdmissionError::AlreadyInMempool(hash));
        }
        if tx.is_coinbase() {
            return Err(AdmissionError::Coinbase(hash));
        }
        check_transaction(tx)?;

        for outpoint in tx.spent_outpoints() {
            if let Some(existing) = self.next_tx.get(outpoint) {
                return Err(AdmissionError::Conflict {
                    tx: hash,
                    outpoint: *outpoint,
                    existing: *existing,
                });
            }
        }

        for outpoint in tx.spent_outpoints() {
            self.next_tx.insert(*outpoint, hash);
        }
        self.txs.insert(hash, (self.next_seq, tx.clone()));
        self.next_seq += 1;
        Ok(())
    }

    /// Remove a transaction, and with `recursive` everything spending its
    /// outputs. Returns the removed transactions.
    pub fn remove(&mut self, hash: &TxHash, recursive: bool) -> Vec<Transaction> {
        let mut removed = Vec::new();
        let mut stack = vec![*hash];
        while let Some(h) = stack.pop() {
            let Some((_, tx)) = self.txs.remove(&h) else {
                continue;
            };
            for outpoint in tx.spent_outpoints() {
                self.next_tx.remove(outpoint);
            }
            if recursive {
                for index in 0..tx.outputs.len() as u32 {
                    if let Some(child) = self.next_tx.get(&OutPoint::new(h, index)) {
                        stack.push(*child);
                    }
                }
            }
            removed.push(tx);
        }
        removed
    }

    /// Remove every mempool transaction spending an outpoint `tx` spends,
    /// with descendants
    pub fn remove_conflicts(&mut self, tx: &Transaction) -> Vec<Transaction> {
        let hash = tx.hash();
        let conflicting: Vec<TxHash> = tx
            .spent_outpoints()
            .filter_map(|outpoint| self.next_tx.get(outpoint).copied())
            .filter(|spender| *spender != hash)
            .collect();

        conflicting.iter().flat_map(|spender| self.remove(spender, true)).collect()
    }

    /// Drop transactions confirmed by `block` and those conflicting with it.
    /// Returns the hashes of everything removed.
    pub fn remove_for_block(&mut self, block: &Block) -> Vec<TxHash> {
        let mut removed = Vec::new();
        for tx in &block.transactions {
            let hash = tx.hash();
            removed.extend(self.remove(&hash, false).iter().map(Transaction::hash));
            for conflict in self.remove_conflicts(tx) {
                debug!("Removed {} conflicting with confirmed {hash}", conflict.hash());
                removed.push(conflict.hash());
            }
        }
        removed
    }

    pub fn lookup(&self, hash: &TxHash) -> Option<&Transaction> {
        self.txs.get(hash).map(|(_, tx)| tx)
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.txs.contains_key(hash)
    }

    /// Hashes of all transactions, in order of admission
    pub fn query_hashes(&self) -> Vec<TxHash> {
        let ordered: BTreeMap<u64, TxHash> =
            self.txs.iter().map(|(hash, (seq, _))| (*seq, *hash)).collect();
        ordered.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipwatch_common::Hash;
    use tipwatch_test_utils::{address_script, coinbase, create_block, spend, BASE_TIME};

    fn funding(n: u8) -> OutPoint {
        OutPoint::new(Hash::new([n; 32]), 0)
    }

    fn pay(inputs: &[OutPoint], to: u8) -> Transaction {
        spend(inputs, &[(1000, address_script(to))])
    }

    #[test]
    fn admits_independent_transactions_in_order() {
        let mut pool = Mempool::new();
        let a = pay(&[funding(1)], 1);
        let b = pay(&[funding(2)], 2);
        pool.try_admit(&a).unwrap();
        pool.try_admit(&b).unwrap();

        assert_eq!(pool.query_hashes(), vec![a.hash(), b.hash()]);
        assert_eq!(pool.lookup(&a.hash()), Some(&a));
        assert_eq!(pool.try_admit(&a), Err(AdmissionError::AlreadyInMempool(a.hash())));
    }

    #[test]
    fn first_spend_wins() {
        let mut pool = Mempool::new();
        let first = pay(&[funding(1)], 1);
        let second = pay(&[funding(1)], 2);
        pool.try_admit(&first).unwrap();

        assert_eq!(
            pool.try_admit(&second),
            Err(AdmissionError::Conflict {
                tx: second.hash(),
                outpoint: funding(1),
                existing: first.hash()
            })
        );
        assert!(!pool.contains(&second.hash()));
    }

    #[test]
    fn refuses_coinbase_and_malformed() {
        let mut pool = Mempool::new();
        let cb = coinbase(1);
        assert_eq!(pool.try_admit(&cb), Err(AdmissionError::Coinbase(cb.hash())));

        let no_outputs = spend(&[funding(1)], &[]);
        assert!(matches!(pool.try_admit(&no_outputs), Err(AdmissionError::Malformed(_))));
        assert!(pool.is_empty());
    }

    #[test]
    fn recursive_remove_takes_descendants() {
        let mut pool = Mempool::new();
        let parent = pay(&[funding(1)], 1);
        let child = pay(&[OutPoint::new(parent.hash(), 0)], 2);
        let grandchild = pay(&[OutPoint::new(child.hash(), 0)], 3);
        for tx in [&parent, &child, &grandchild] {
            pool.try_admit(tx).unwrap();
        }

        let shallow = {
            let mut copy = Mempool::new();
            for tx in [&parent, &child, &grandchild] {
                copy.try_admit(tx).unwrap();
            }
            copy.remove(&parent.hash(), false).len()
        };
        assert_eq!(shallow, 1);

        let removed = pool.remove(&parent.hash(), true);
        assert_eq!(removed.len(), 3);
        assert!(pool.is_empty());
        // Freed outpoint can be spent again
        pool.try_admit(&pay(&[funding(1)], 4)).unwrap();
    }

    #[test]
    fn block_removes_confirmed_and_conflicting() {
        let mut pool = Mempool::new();
        let unrelated = pay(&[funding(3)], 3);
        let ours = pay(&[funding(1)], 1);
        let ours_child = pay(&[OutPoint::new(ours.hash(), 0)], 2);
        let confirmed = pay(&[funding(2)], 2);
        for tx in [&unrelated, &ours, &ours_child, &confirmed] {
            pool.try_admit(tx).unwrap();
        }

        // Block confirms `confirmed` and a respend of `ours`
        let respend = pay(&[funding(1)], 9);
        let block = create_block(
            Hash::ZERO,
            vec![coinbase(1), confirmed.clone(), respend],
            BASE_TIME,
        );
        let mut removed = pool.remove_for_block(&block);
        removed.sort();
        let mut expected = vec![confirmed.hash(), ours.hash(), ours_child.hash()];
        expected.sort();

        assert_eq!(removed, expected);
        assert_eq!(pool.query_hashes(), vec![unrelated.hash()]);
    }
}
