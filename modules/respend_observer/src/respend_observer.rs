//! Tipwatch respend observer module for Caryatid
//! Indexes every transaction seen and records double spends of watched ones

pub mod conflict_index;
pub mod mempool;
pub mod observer;
pub mod relevance;
pub mod state;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use caryatid_sdk::{module, Context};
use config::Config;
use tipwatch_common::{
    messages::{ChainMessage, Message, NetworkMessage, StateQuery, StateQueryResponse, TxMessage},
    queries::{
        errors::QueryError,
        transactions::{
            SendTransactionResult, TransactionInfo, TransactionsStateQuery,
            TransactionsStateQueryResponse, DEFAULT_TRANSACTIONS_QUERY_TOPIC,
        },
    },
    Transaction, TxHash,
};
use tracing::{debug, error, info, info_span, Instrument};

use observer::{Processed, RespendObserver};
use relevance::Relevance;

const DEFAULT_SUBSCRIBE_TOPIC: &str = "network.inbound.transactions";
const DEFAULT_CHAIN_TOPIC: &str = "chain.events";
const DEFAULT_RELAY_TOPIC: &str = "network.outbound";

/// Respend observer module
/// Parameterised by the outer message enum used on the bus
#[module(
    message_type(Message),
    name = "respend-observer",
    description = "Double-spend observer and mempool"
)]
pub struct RespendObserverModule;

impl RespendObserverModule {
    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        // Get configuration
        let subscribe_topic =
            config.get_string("subscribe-topic").unwrap_or(DEFAULT_SUBSCRIBE_TOPIC.to_string());
        info!("Creating transaction subscriber on '{subscribe_topic}'");

        let chain_topic =
            config.get_string("chain-topic").unwrap_or(DEFAULT_CHAIN_TOPIC.to_string());
        info!("Creating chain event subscriber on '{chain_topic}'");

        let relay_topic = config.get_string("relay-topic").unwrap_or(DEFAULT_RELAY_TOPIC.to_string());
        info!("Relaying to peers on '{relay_topic}'");

        let query_topic = config
            .get_string(DEFAULT_TRANSACTIONS_QUERY_TOPIC.0)
            .unwrap_or(DEFAULT_TRANSACTIONS_QUERY_TOPIC.1.to_string());
        info!("Handling transaction queries on '{query_topic}'");

        let watched_scripts = config.get::<Vec<String>>("watched-scripts").unwrap_or_default();
        let relevance = parse_relevance(&watched_scripts)?;
        match &relevance {
            Relevance::TrackAll => info!("Tracking respends of every transaction"),
            Relevance::WatchedScripts(scripts) => {
                info!("Tracking respends of transactions paying {} scripts", scripts.len())
            }
        }

        let observer = Arc::new(RespendObserver::new(relevance));
        let watched_txs = config.get::<Vec<String>>("watched-transactions").unwrap_or_default();
        for tx_hash in parse_tx_hashes(&watched_txs)? {
            info!("Watching {tx_hash}");
            observer.watch(tx_hash).await;
        }

        // Queries, including locally sent transactions
        let query_observer = observer.clone();
        let query_context = context.clone();
        let query_relay_topic = relay_topic.clone();
        context.handle(&query_topic, move |message| {
            let observer = query_observer.clone();
            let context = query_context.clone();
            let relay_topic = query_relay_topic.clone();
            async move {
                let Message::StateQuery(StateQuery::Transactions(query)) = message.as_ref() else {
                    return Arc::new(Message::StateQueryResponse(StateQueryResponse::Transactions(
                        TransactionsStateQueryResponse::Error(QueryError::invalid_request(
                            "Invalid message for respend-observer",
                        )),
                    )));
                };

                let response = handle_transactions_query(&observer, &context, &relay_topic, query).await;
                Arc::new(Message::StateQueryResponse(StateQueryResponse::Transactions(response)))
            }
        });

        let mut tx_subscription = context.subscribe(&subscribe_topic).await?;
        let mut chain_subscription = context.subscribe(&chain_topic).await?;

        context.clone().run(async move {
            loop {
                tokio::select! {
                    result = tx_subscription.read() => {
                        let Ok((_, message)) = result else {
                            error!("Transaction message read failed");
                            return;
                        };

                        let Message::Network(NetworkMessage::Tx(msg)) = message.as_ref() else {
                            debug!("Ignoring non-transaction message");
                            continue;
                        };

                        let span = info_span!("respend_observer", tx = %msg.tx.hash());
                        async {
                            let processed = observer.process_transaction(&msg.tx).await;
                            log_processed(&processed);
                            relay_if_wanted(&context, &relay_topic, &msg.tx, &processed).await;
                        }
                        .instrument(span)
                        .await;
                    }

                    result = chain_subscription.read() => {
                        let Ok((_, message)) = result else {
                            error!("Chain message read failed");
                            return;
                        };

                        let Message::Chain(ChainMessage::BlockConnected(msg)) = message.as_ref() else {
                            continue;
                        };

                        let span = info_span!("respend_observer", height = msg.height);
                        async {
                            let removed = observer.block_connected(&msg.block).await;
                            if !removed.is_empty() {
                                debug!("Removed {} transactions from the mempool", removed.len());
                            }
                        }
                        .instrument(span)
                        .await;
                    }
                }
            }
        });

        Ok(())
    }
}

/// Hex output scripts to a relevance filter; an empty list tracks everything.
fn parse_relevance(scripts: &[String]) -> Result<Relevance> {
    let decoded = scripts
        .iter()
        .map(|s| hex::decode(s).map_err(|e| anyhow!("Bad watched script '{s}': {e}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(Relevance::from_scripts(decoded))
}

fn parse_tx_hashes(hashes: &[String]) -> Result<Vec<TxHash>> {
    hashes
        .iter()
        .map(|s| s.parse::<TxHash>().map_err(|e| anyhow!("Bad watched transaction '{s}': {e}")))
        .collect()
}

fn log_processed(processed: &Processed) {
    let observation = &processed.observation;
    if let Err(e) = &processed.admission {
        debug!("Not admitted: {e}");
    }
    if !observation.conflicts.is_empty() {
        info!(
            "{} conflicts with {} earlier transactions",
            observation.tx_hash,
            observation.conflicts.len()
        );
    }
}

async fn relay_if_wanted(
    context: &Arc<Context<Message>>,
    relay_topic: &str,
    tx: &Transaction,
    processed: &Processed,
) {
    if !processed.observation.should_relay() {
        return;
    }
    let msg = Arc::new(Message::Network(NetworkMessage::Tx(TxMessage { tx: tx.clone() })));
    context
        .message_bus
        .publish(relay_topic, msg)
        .await
        .unwrap_or_else(|e| error!("Failed to publish to {relay_topic}: {e}"));
}

fn transaction_response(
    tx_hash: &TxHash,
    info: Option<TransactionInfo>,
) -> TransactionsStateQueryResponse {
    match info {
        Some(info) => TransactionsStateQueryResponse::Transaction(info),
        None => TransactionsStateQueryResponse::Error(QueryError::not_found(format!(
            "transaction {tx_hash}"
        ))),
    }
}

async fn handle_transactions_query(
    observer: &RespendObserver,
    context: &Arc<Context<Message>>,
    relay_topic: &str,
    query: &TransactionsStateQuery,
) -> TransactionsStateQueryResponse {
    match query {
        TransactionsStateQuery::GetTransaction { tx_hash } => {
            transaction_response(tx_hash, observer.transaction_info(tx_hash).await)
        }

        TransactionsStateQuery::GetRespends { tx_hash } => {
            TransactionsStateQueryResponse::Respends(observer.get_respends(tx_hash).await)
        }

        TransactionsStateQuery::GetMempool => {
            TransactionsStateQueryResponse::Mempool(observer.mempool_hashes().await)
        }

        TransactionsStateQuery::SendRawTransaction { tx } => {
            let processed = observer.process_transaction(tx).await;
            log_processed(&processed);
            relay_if_wanted(context, relay_topic, tx, &processed).await;
            TransactionsStateQueryResponse::TransactionSent(SendTransactionResult {
                tx_hash: processed.observation.tx_hash,
                rejection: processed.admission.err().map(|e| e.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_list_tracks_everything() {
        assert!(matches!(parse_relevance(&[]).unwrap(), Relevance::TrackAll));
    }

    #[test]
    fn scripts_are_hex_decoded() {
        let relevance = parse_relevance(&["76a914".to_string()]).unwrap();
        match relevance {
            Relevance::WatchedScripts(scripts) => {
                assert!(scripts.contains(&vec![0x76, 0xa9, 0x14]))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_relevance(&["not hex".to_string()]).is_err());
    }

    #[test]
    fn unknown_transaction_is_reported_not_found() {
        let tx_hash = TxHash::new([0xcd; 32]);
        match transaction_response(&tx_hash, None) {
            TransactionsStateQueryResponse::Error(e) => {
                assert_eq!(e, QueryError::not_found(format!("transaction {tx_hash}")));
                assert!(e.to_string().starts_with("Not found: transaction cdcd"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let info = TransactionInfo {
            tx_hash,
            in_mempool: true,
            respends_observed: vec![],
        };
        assert!(matches!(
            transaction_response(&tx_hash, Some(info)),
            TransactionsStateQueryResponse::Transaction(t) if t.in_mempool
        ));
    }

    #[test]
    fn watched_transactions_must_be_full_hashes() {
        let text = "ab".repeat(32);
        assert_eq!(parse_tx_hashes(&[text]).unwrap(), vec![TxHash::new([0xab; 32])]);
        assert!(parse_tx_hashes(&["abcd".to_string()]).is_err());
    }
}
