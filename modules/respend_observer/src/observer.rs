//! Shared, lock-guarded respend observer and mempool.

use tipwatch_common::{queries::transactions::TransactionInfo, Block, Transaction, TxHash};
use tokio::sync::{Mutex, RwLock};

use crate::mempool::{AdmissionError, Mempool};
use crate::relevance::Relevance;
use crate::state::{Observation, RespendState};

/// Outcome of offering a transaction to the node
#[derive(Debug, Clone)]
pub struct Processed {
    pub admission: Result<(), AdmissionError>,
    pub observation: Observation,
}

/// Single writer, many readers over the respend state and mempool.
///
/// Each mutation updates both under the writer lock, so readers never see
/// a transaction admitted but not yet indexed.
pub struct RespendObserver {
    state: RwLock<RespendState>,
    mempool: RwLock<Mempool>,
    writer: Mutex<()>,
}

impl RespendObserver {
    pub fn new(relevance: Relevance) -> Self {
        Self {
            state: RwLock::new(RespendState::new(relevance)),
            mempool: RwLock::new(Mempool::new()),
            writer: Mutex::new(()),
        }
    }

    /// Try the mempool, then observe the transaction whatever the outcome.
    pub async fn process_transaction(&self, tx: &Transaction) -> Processed {
        let _writer = self.writer.lock().await;
        let mut mempool = self.mempool.write().await;
        let mut state = self.state.write().await;

        let admission = mempool.try_admit(tx);
        let observation = state.observe(tx, admission.is_ok());
        Processed {
            admission,
            observation,
        }
    }

    /// Observe a transaction whose admission was decided elsewhere.
    pub async fn observe_transaction(&self, tx: &Transaction, admitted: bool) -> Observation {
        let _writer = self.writer.lock().await;
        self.state.write().await.observe(tx, admitted)
    }

    /// Evict confirmed and conflicting transactions. Confirmed transactions
    /// are also observed, so a mined respend is still recorded.
    pub async fn block_connected(&self, block: &Block) -> Vec<TxHash> {
        let _writer = self.writer.lock().await;
        let mut mempool = self.mempool.write().await;
        let mut state = self.state.write().await;

        for tx in &block.transactions {
            state.observe(tx, false);
        }
        mempool.remove_for_block(block)
    }

    pub async fn watch(&self, tx_hash: TxHash) {
        let _writer = self.writer.lock().await;
        self.state.write().await.watch(tx_hash);
    }

    pub async fn get_respends(&self, tx_hash: &TxHash) -> Vec<TxHash> {
        self.state.read().await.respends(tx_hash)
    }

    /// `None` if the transaction was never seen
    pub async fn transaction_info(&self, tx_hash: &TxHash) -> Option<TransactionInfo> {
        let mempool = self.mempool.read().await;
        let state = self.state.read().await;

        let in_mempool = mempool.contains(tx_hash);
        if !in_mempool && !state.has_seen(tx_hash) {
            return None;
        }
        Some(TransactionInfo {
            tx_hash: *tx_hash,
            in_mempool,
            respends_observed: state.respends(tx_hash),
        })
    }

    pub async fn mempool_hashes(&self) -> Vec<TxHash> {
        self.mempool.read().await.query_hashes()
    }
}
