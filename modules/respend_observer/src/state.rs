//! Respend records built from the conflict index.

use std::collections::{HashMap, HashSet};

use tipwatch_common::{validation::check_transaction, Transaction, TxHash};
use tracing::{debug, info};

use crate::conflict_index::ConflictIndex;
use crate::relevance::Relevance;

/// What observing one transaction found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub tx_hash: TxHash,

    /// Whether the mempool took it
    pub admitted: bool,

    /// Previously seen transactions spending any of the same outpoints
    pub conflicts: Vec<TxHash>,

    /// Primary transactions whose respend record gained this transaction
    pub recorded_against: Vec<TxHash>,

    /// First respend seen for at least one of its outpoints
    pub first_respend: bool,

    /// False for malformed transactions and coinbases, which are ignored
    pub indexed: bool,
}

impl Observation {
    /// Relay admitted transactions, and the first respend of an outpoint so
    /// peers hear about the double spend
    pub fn should_relay(&self) -> bool {
        self.indexed && (self.admitted || self.first_respend)
    }
}

/// Conflict index plus the append-only respend record of each primary
#[derive(Debug, Default)]
pub struct RespendState {
    index: ConflictIndex,
    respends: HashMap<TxHash, Vec<TxHash>>,
    primaries: HashSet<TxHash>,
    /// Every transaction indexed so far
    seen: HashSet<TxHash>,
    relevance: Relevance,
}

impl RespendState {
    pub fn new(relevance: Relevance) -> Self {
        Self {
            relevance,
            ..Self::default()
        }
    }

    /// Record `tx` against every earlier primary it conflicts with, then
    /// index its inputs whether or not the mempool admitted it.
    pub fn observe(&mut self, tx: &Transaction, admitted: bool) -> Observation {
        let tx_hash = tx.hash();
        let mut observation = Observation {
            tx_hash,
            admitted,
            ..Observation::default()
        };

        if tx.is_coinbase() {
            return observation;
        }
        if let Err(e) = check_transaction(tx) {
            debug!("Not indexing {tx_hash}: {e}");
            return observation;
        }

        for outpoint in tx.spent_outpoints() {
            let spenders = self.index.spenders(outpoint);
            if spenders.contains(&tx_hash) {
                continue;
            }
            if spenders.len() == 1 {
                observation.first_respend = true;
            }

            for other in spenders {
                if !observation.conflicts.contains(other) {
                    observation.conflicts.push(*other);
                }
                if !self.primaries.contains(other) {
                    continue;
                }
                let record = self.respends.entry(*other).or_default();
                if !record.contains(&tx_hash) {
                    record.push(tx_hash);
                    observation.recorded_against.push(*other);
                    info!("Respend of {other} observed: {tx_hash}");
                }
            }
        }

        if self.relevance.is_relevant(tx) {
            self.primaries.insert(tx_hash);
        }
        self.index.insert(tx_hash, tx);
        self.seen.insert(tx_hash);
        observation.indexed = true;
        observation
    }

    /// Track respends of `tx_hash` from now on
    pub fn watch(&mut self, tx_hash: TxHash) {
        self.primaries.insert(tx_hash);
    }

    pub fn has_seen(&self, tx_hash: &TxHash) -> bool {
        self.seen.contains(tx_hash)
    }

    pub fn is_primary(&self, tx_hash: &TxHash) -> bool {
        self.primaries.contains(tx_hash)
    }

    /// Conflicting transactions recorded for `tx_hash`, in order observed
    pub fn respends(&self, tx_hash: &TxHash) -> Vec<TxHash> {
        self.respends.get(tx_hash).cloned().unwrap_or_default()
    }

    pub fn index(&self) -> &ConflictIndex {
        &self.index
    }
}
