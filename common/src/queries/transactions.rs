use crate::queries::errors::QueryError;
use crate::{Transaction, TxHash};

pub const DEFAULT_TRANSACTIONS_QUERY_TOPIC: (&str, &str) =
    ("transactions-query-topic", "node.query.transactions");

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum TransactionsStateQuery {
    GetTransaction { tx_hash: TxHash },
    GetRespends { tx_hash: TxHash },
    GetMempool,
    SendRawTransaction { tx: Transaction },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum TransactionsStateQueryResponse {
    Transaction(TransactionInfo),
    Respends(Vec<TxHash>),
    Mempool(Vec<TxHash>),
    TransactionSent(SendTransactionResult),
    Error(QueryError),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionInfo {
    pub tx_hash: TxHash,

    /// Currently held in the mempool
    pub in_mempool: bool,

    /// Conflicting transactions seen after this one, in order of observation
    pub respends_observed: Vec<TxHash>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SendTransactionResult {
    pub tx_hash: TxHash,

    /// `None` when admitted, otherwise the rejection reason
    pub rejection: Option<String>,
}
