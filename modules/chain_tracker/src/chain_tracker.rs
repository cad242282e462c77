//! Tipwatch chain tracker module for Caryatid
//! Tracks header-first mining candidates alongside the best validated chain

pub mod candidate_tip;
pub mod chain_tree;
pub mod tracker;
pub mod tree_error;
pub mod tree_observer;
pub mod validator;

use std::sync::{Arc, PoisonError};

use anyhow::{anyhow, Result};
use caryatid_sdk::{module, Context};
use config::Config;
use tipwatch_common::{
    genesis::genesis_for_network,
    messages::{
        BlockConnectedMessage, BlockMessage, ChainMessage, GetDataMessage, HeadersMessage,
        InvalidBlockMessage, Message, NetworkMessage, StateQuery, StateQueryResponse, TipMessage,
    },
    queries::{
        errors::QueryError,
        mining::{
            MiningStateQuery, MiningStateQueryResponse, SubmitBlockResult,
            DEFAULT_MINING_QUERY_TOPIC,
        },
    },
    Block, BlockHash, BlockHeader, Inventory, InventoryKind,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use chain_tree::{ChainTree, TemplateMode};
use tracker::ChainTracker;
use tree_error::ChainTrackerError;
use tree_observer::ChainTreeObserver;
use validator::ProofOfWorkValidator;

const DEFAULT_SUBSCRIBE_TOPIC: &str = "network.inbound.blocks";
const DEFAULT_RELAY_TOPIC: &str = "network.outbound";
const DEFAULT_PUBLISH_CHAIN_TOPIC: &str = "chain.events";
const DEFAULT_RETENTION_DEPTH: i64 = 288;
const DEFAULT_POW_LIMIT_BITS: i64 = 0x207f_ffff;
const DEFAULT_NETWORK: &str = "regtest";

/// Events emitted by the chain tree observer, queued for async publishing.
enum ObserverEvent {
    HeaderAccepted(BlockHeader),
    BlockWanted(BlockHash),
    BlockConnected { height: u64, block: Block },
    BlockRejected { hash: BlockHash, block: Block },
    BestBlockChanged { hash: BlockHash, height: u64 },
    MiningTipChanged { hash: BlockHash, height: u64 },
}

/// Shared event queue between the observer and the publishing side.
type EventQueue = Arc<std::sync::Mutex<Vec<ObserverEvent>>>;

/// Observer that queues tree events for later async publishing.
struct QueueObserver {
    events: EventQueue,
}

impl QueueObserver {
    fn push(&self, event: ObserverEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

impl ChainTreeObserver for QueueObserver {
    fn header_accepted(&self, header: &BlockHeader) {
        self.push(ObserverEvent::HeaderAccepted(header.clone()));
    }

    fn block_wanted(&self, hash: BlockHash) {
        self.push(ObserverEvent::BlockWanted(hash));
    }

    fn block_connected(&self, height: u64, block: &Block) {
        self.push(ObserverEvent::BlockConnected {
            height,
            block: block.clone(),
        });
    }

    fn block_rejected(&self, hash: BlockHash, block: &Block) {
        self.push(ObserverEvent::BlockRejected {
            hash,
            block: block.clone(),
        });
    }

    fn best_block_changed(&self, hash: BlockHash, height: u64) {
        self.push(ObserverEvent::BestBlockChanged { hash, height });
    }

    fn mining_tip_changed(&self, hash: BlockHash, height: u64) {
        self.push(ObserverEvent::MiningTipChanged { hash, height });
    }
}

/// Topics events are published on
#[derive(Clone)]
struct Topics {
    relay: String,
    chain: String,
}

/// Chain tracker module
/// Parameterised by the outer message enum used on the bus
#[module(
    message_type(Message),
    name = "chain-tracker",
    description = "Header-first chain tracker"
)]
pub struct ChainTrackerModule;

impl ChainTrackerModule {
    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        // Get configuration
        let subscribe_topic =
            config.get_string("subscribe-topic").unwrap_or(DEFAULT_SUBSCRIBE_TOPIC.to_string());
        info!("Creating block and header subscriber on '{subscribe_topic}'");

        let topics = Topics {
            relay: config.get_string("relay-topic").unwrap_or(DEFAULT_RELAY_TOPIC.to_string()),
            chain: config
                .get_string("publish-chain-topic")
                .unwrap_or(DEFAULT_PUBLISH_CHAIN_TOPIC.to_string()),
        };
        info!("Relaying to peers on '{}'", topics.relay);
        info!("Publishing chain events on '{}'", topics.chain);

        let mining_query_topic = config
            .get_string(DEFAULT_MINING_QUERY_TOPIC.0)
            .unwrap_or(DEFAULT_MINING_QUERY_TOPIC.1.to_string());
        info!("Handling mining queries on '{mining_query_topic}'");

        let retention_depth = config_u64(&config, "retention-depth", DEFAULT_RETENTION_DEPTH)?;
        info!("Retention depth {retention_depth}");

        let pow_limit_bits = config_u32(&config, "pow-limit-bits", DEFAULT_POW_LIMIT_BITS)?;
        let network = config.get_string("network").unwrap_or(DEFAULT_NETWORK.to_string());
        let genesis = genesis_for_network(&network)
            .ok_or_else(|| anyhow!("No genesis header for network '{network}'"))?;
        info!("Rooted at {network} genesis {}", genesis.hash());

        // Create the chain tree with a queue-based observer
        let event_queue: EventQueue = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observer = Box::new(QueueObserver {
            events: event_queue.clone(),
        });
        let validator = Arc::new(ProofOfWorkValidator::new(pow_limit_bits)?);
        let tree = ChainTree::new(genesis, 0, retention_depth, validator, observer);
        let tracker = Arc::new(ChainTracker::new(tree));

        // Mining queries, including submitted blocks
        let query_tracker = tracker.clone();
        let query_events = event_queue.clone();
        let query_context = context.clone();
        let query_topics = topics.clone();
        context.handle(&mining_query_topic, move |message| {
            let tracker = query_tracker.clone();
            let events = query_events.clone();
            let context = query_context.clone();
            let topics = query_topics.clone();
            async move {
                let Message::StateQuery(StateQuery::Mining(query)) = message.as_ref() else {
                    return Arc::new(Message::StateQueryResponse(StateQueryResponse::Mining(
                        MiningStateQueryResponse::Error(QueryError::invalid_request(
                            "Invalid message for chain-tracker",
                        )),
                    )));
                };

                let response = handle_mining_query(&tracker, query).await;
                publish_messages(&context, collect_observer_events(&events, &topics)).await;
                Arc::new(Message::StateQueryResponse(StateQueryResponse::Mining(response)))
            }
        });

        // Subscribe for inbound headers, blocks and advisories
        let mut subscription = context.subscribe(&subscribe_topic).await?;

        context.clone().run(async move {
            loop {
                let Ok((_, message)) = subscription.read().await else {
                    error!("Network message read failed");
                    return;
                };

                let Message::Network(network_message) = message.as_ref() else {
                    debug!("Ignoring non-network message");
                    continue;
                };

                let span = info_span!("chain_tracker", height = tracker.best_block().await.1);
                handle_network_message(&tracker, network_message).instrument(span).await;

                let pruned = tracker.prune().await;
                if pruned > 0 {
                    debug!("Pruned {pruned} tips");
                }

                publish_messages(&context, collect_observer_events(&event_queue, &topics)).await;
            }
        });

        Ok(())
    }
}

/// Integer setting that must fit a `u64`
fn config_u64(config: &Config, key: &str, default: i64) -> Result<u64> {
    let value = config.get_int(key).unwrap_or(default);
    u64::try_from(value).map_err(|_| anyhow!("'{key}' must not be negative, got {value}"))
}

/// Integer setting that must fit a `u32`
fn config_u32(config: &Config, key: &str, default: i64) -> Result<u32> {
    let value = config.get_int(key).unwrap_or(default);
    u32::try_from(value).map_err(|_| anyhow!("'{key}' must fit in 32 bits, got {value}"))
}

/// Single dispatch for everything peers send the chain tracker.
async fn handle_network_message(tracker: &ChainTracker, message: &NetworkMessage) {
    match message {
        NetworkMessage::Headers(headers) => {
            for header in &headers.headers {
                if let Err(e) = tracker.submit_header(header.clone()).await {
                    log_rejection(&e);
                }
            }
        }

        NetworkMessage::Block(msg) => {
            if let Err(e) = tracker.submit_block(msg.block.clone()).await {
                log_rejection(&e);
            }
        }

        NetworkMessage::InvalidBlock(msg) => {
            match tracker.report_external_invalid(msg.hash, msg.block.clone()).await {
                Ok(()) => info!("Block {} reported invalid but validates", msg.hash),
                Err(e) => log_rejection(&e),
            }
        }

        NetworkMessage::Tx(_) | NetworkMessage::GetData(_) => {
            debug!("Ignoring message not for the chain tracker");
        }
    }
}

/// Item-level failures never stop processing; only log them.
fn log_rejection(e: &ChainTrackerError) {
    match e {
        ChainTrackerError::UnknownParent { .. } | ChainTrackerError::UntrustedAdvisory { .. } => {
            debug!("{e}")
        }
        _ => warn!("{e}"),
    }
}

async fn handle_mining_query(
    tracker: &ChainTracker,
    query: &MiningStateQuery,
) -> MiningStateQueryResponse {
    match query {
        MiningStateQuery::GetBlockTemplate { headfirst } => MiningStateQueryResponse::BlockTemplate(
            tracker.mining_template(TemplateMode::from_headfirst(*headfirst)).await,
        ),

        MiningStateQuery::GetBestBlockHash => {
            MiningStateQueryResponse::BestBlockHash(tracker.best_block().await.0)
        }

        MiningStateQuery::GetBlockCount => {
            MiningStateQueryResponse::BlockCount(tracker.best_block().await.1)
        }

        MiningStateQuery::GetChainTips => {
            MiningStateQueryResponse::ChainTips(tracker.chain_tips().await)
        }

        MiningStateQuery::SubmitBlock { block } => {
            let hash = block.hash();
            let rejection = match tracker.submit_block(block.clone()).await {
                Ok(()) => None,
                Err(e) => {
                    log_rejection(&e);
                    Some(e.to_string())
                }
            };
            MiningStateQueryResponse::BlockSubmitted(SubmitBlockResult { hash, rejection })
        }
    }
}

/// Drain observer events and resolve them into publishable messages.
///
/// Sync function - does not hold the queue lock across await points.
fn collect_observer_events(event_queue: &EventQueue, topics: &Topics) -> Vec<(String, Arc<Message>)> {
    let events: Vec<ObserverEvent> =
        event_queue.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();

    let mut headers = Vec::new();
    let mut wanted = Vec::new();
    let mut messages = Vec::new();
    let relay = |msg: NetworkMessage| (topics.relay.clone(), Arc::new(Message::Network(msg)));
    let chain = |msg: ChainMessage| (topics.chain.clone(), Arc::new(Message::Chain(msg)));

    for event in events {
        match event {
            ObserverEvent::HeaderAccepted(header) => headers.push(header),
            ObserverEvent::BlockWanted(hash) => wanted.push(Inventory {
                kind: InventoryKind::Block,
                hash,
            }),
            ObserverEvent::BlockConnected { height, block } => {
                messages.push(relay(NetworkMessage::Block(BlockMessage {
                    block: block.clone(),
                })));
                messages.push(chain(ChainMessage::BlockConnected(BlockConnectedMessage {
                    height,
                    block,
                })));
            }
            ObserverEvent::BlockRejected { hash, block } => {
                messages.push(relay(NetworkMessage::InvalidBlock(InvalidBlockMessage {
                    hash,
                    block,
                })));
            }
            ObserverEvent::BestBlockChanged { hash, height } => {
                messages.push(chain(ChainMessage::BestBlockChanged(TipMessage { hash, height })));
            }
            ObserverEvent::MiningTipChanged { hash, height } => {
                messages.push(chain(ChainMessage::MiningTipChanged(TipMessage { hash, height })));
            }
        }
    }

    // Announce and fetch before anything that depends on them
    let mut batched = Vec::new();
    if !headers.is_empty() {
        batched.push(relay(NetworkMessage::Headers(HeadersMessage { headers })));
    }
    if !wanted.is_empty() {
        batched.push(relay(NetworkMessage::GetData(GetDataMessage { inventory: wanted })));
    }
    batched.extend(messages);
    batched
}

/// Publish a batch of collected messages to the bus.
async fn publish_messages(context: &Arc<Context<Message>>, messages: Vec<(String, Arc<Message>)>) {
    for (topic, msg) in messages {
        context
            .message_bus
            .publish(&topic, msg)
            .await
            .unwrap_or_else(|e| error!("Failed to publish to {topic}: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics {
            relay: "out".to_string(),
            chain: "chain".to_string(),
        }
    }

    fn queue_with(events: Vec<ObserverEvent>) -> EventQueue {
        Arc::new(std::sync::Mutex::new(events))
    }

    #[test]
    fn headers_and_fetches_are_batched_first() {
        let (header, hash) = tipwatch_test_utils::genesis();
        let block = tipwatch_test_utils::valid_block(hash, 1);
        let queue = queue_with(vec![
            ObserverEvent::BlockConnected {
                height: 1,
                block: block.clone(),
            },
            ObserverEvent::HeaderAccepted(header.clone()),
            ObserverEvent::BlockWanted(hash),
            ObserverEvent::HeaderAccepted(block.header.clone()),
        ]);

        let messages = collect_observer_events(&queue, &topics());
        assert_eq!(messages.len(), 4);
        assert!(matches!(
            messages[0].1.as_ref(),
            Message::Network(NetworkMessage::Headers(h)) if h.headers.len() == 2
        ));
        assert!(matches!(
            messages[1].1.as_ref(),
            Message::Network(NetworkMessage::GetData(d)) if d.inventory[0].hash == hash
        ));
        assert_eq!(messages[2].0, "out");
        assert!(matches!(messages[2].1.as_ref(), Message::Network(NetworkMessage::Block(_))));
        assert_eq!(messages[3].0, "chain");
        assert!(matches!(
            messages[3].1.as_ref(),
            Message::Chain(ChainMessage::BlockConnected(c)) if c.height == 1
        ));
        assert!(queue.lock().unwrap().is_empty());
    }

    #[test]
    fn integer_settings_are_range_checked() {
        let config = Config::builder()
            .set_override("retention-depth", -1)
            .unwrap()
            .set_override("pow-limit-bits", 0x1_0000_0000i64)
            .unwrap()
            .build()
            .unwrap();

        assert!(config_u64(&config, "retention-depth", DEFAULT_RETENTION_DEPTH).is_err());
        assert!(config_u32(&config, "pow-limit-bits", DEFAULT_POW_LIMIT_BITS).is_err());

        let empty = Config::builder().build().unwrap();
        assert_eq!(config_u64(&empty, "retention-depth", DEFAULT_RETENTION_DEPTH).unwrap(), 288);
        assert_eq!(
            config_u32(&empty, "pow-limit-bits", DEFAULT_POW_LIMIT_BITS).unwrap(),
            0x207f_ffff
        );
    }

    #[test]
    fn rejected_block_is_relayed_with_its_body() {
        let (_, g) = tipwatch_test_utils::genesis();
        let bad = tipwatch_test_utils::invalid_block(g, 1);
        let queue = queue_with(vec![ObserverEvent::BlockRejected {
            hash: bad.hash(),
            block: bad.clone(),
        }]);

        let messages = collect_observer_events(&queue, &topics());
        assert_eq!(messages.len(), 1);
        match messages[0].1.as_ref() {
            Message::Network(NetworkMessage::InvalidBlock(msg)) => {
                assert_eq!(msg.hash, bad.hash());
                assert_eq!(msg.block, bad);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
