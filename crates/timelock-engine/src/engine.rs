//! `Engine`: wires the components together and owns their background tasks.
//!
//! ```text
//!                 ┌──────────────── Engine::start ────────────────┐
//!  webhook POST ──► WebhookIngestor ─┐                            │
//!  poll tick ─────► PollSyncEngine ──┼─► FlowMutator ─► FlowStore │
//!  raw log ───────► LogProcessor ────┘        │                   │
//!  promote tick ──► StatusPromoter ───────────┘                   │
//!                                             └─► NotificationDispatcher ─► Notifiers
//!                 └───────────────────────────────────────────────┘
//! ```
//!
//! Every task observes one shared `CancellationToken`; [`EngineHandle::stop`]
//! fires it and waits for the tasks to finish their current unit of work.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use timelock_core::{
    Clock, ContractRegistry, FlowStore, MemoryContractRegistry, Notifier, SystemClock,
};
use timelock_evm::{ChainEventDecoder, ChainProcessor, ProcessorRegistry};
use timelock_rpc::RpcGateway;
use timelock_storage::MemoryFlowStore;

use crate::config::{EngineConfig, RegistrySeed, StorageBackend, StorageConfig};
use crate::error::EngineError;
use crate::indexer::{GraphqlIndexerClient, IndexerClient};
use crate::log_processor::LogProcessor;
use crate::mutator::FlowMutator;
use crate::normalizer::EventNormalizer;
use crate::notifications::{LogNotifier, NotificationDispatcher};
use crate::promoter::StatusPromoter;
use crate::sync::PollSyncEngine;
use crate::webhook::{self, WebhookIngestor};

// ─── Collaborator setup ──────────────────────────────────────────────────────

/// Open the configured flow store.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn FlowStore>, EngineError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryFlowStore::new())),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| EngineError::Config("sqlite storage requires a path".into()))?;
            let store = timelock_storage::SqliteFlowStore::open(path).await?;
            info!(path, "sqlite flow store opened");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => Err(EngineError::Config(
            "sqlite storage requested but this build lacks the `sqlite` feature".into(),
        )),
    }
}

/// In-memory registry holding the configured contracts and webhook secrets.
pub fn seeded_registry(seed: &RegistrySeed) -> Arc<MemoryContractRegistry> {
    Arc::new(MemoryContractRegistry::seeded(
        seed.contracts.iter().cloned(),
        seed.secret_bindings(),
    ))
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn FlowStore>,
    registry: Arc<dyn ContractRegistry>,
    clock: Arc<dyn Clock>,
    notifiers: Vec<Arc<dyn Notifier>>,
    indexers: HashMap<u64, Arc<dyn IndexerClient>>,
    processors: Vec<Arc<dyn ChainProcessor>>,
}

impl Engine {
    /// An engine over the given store and registry. Status changes are
    /// logged through [`LogNotifier`] unless notifiers are added.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn FlowStore>,
        registry: Arc<dyn ContractRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            clock: Arc::new(SystemClock),
            notifiers: Vec::new(),
            indexers: HashMap::new(),
            processors: Vec::new(),
        }
    }

    /// Store and registry taken from the configuration itself.
    pub async fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let store = open_store(&config.storage).await?;
        let registry = seeded_registry(&config.registry);
        Ok(Self::new(config, store, registry))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Use `indexer` for `chain_id` instead of a GraphQL client on the
    /// configured URL.
    pub fn with_indexer(mut self, chain_id: u64, indexer: Arc<dyn IndexerClient>) -> Self {
        self.indexers.insert(chain_id, indexer);
        self
    }

    /// Use `processor` for its chain instead of one built from the RPC config.
    pub fn with_processor(mut self, processor: Arc<dyn ChainProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build every component and spawn the background tasks.
    pub async fn start(self) -> Result<EngineHandle, EngineError> {
        let Engine {
            config,
            store,
            registry,
            clock,
            mut notifiers,
            indexers: indexer_overrides,
            processors: processor_overrides,
        } = self;
        config.validate()?;

        let normalizer = config
            .chains
            .iter()
            .fold(EventNormalizer::new(), |n, c| {
                n.with_grace_period(c.chain_id, c.grace_period_secs)
            });
        let indexers = build_indexers(&config, indexer_overrides)?;
        let processors = build_processors(&config, processor_overrides)?;

        if notifiers.is_empty() {
            notifiers.push(Arc::new(LogNotifier));
        }
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (dispatcher, worker) =
            NotificationDispatcher::spawn(config.notification_queue, notifiers, cancel.clone());
        tasks.push(worker);

        let mutator = Arc::new(
            FlowMutator::new(store, registry, clock).with_notifications(dispatcher),
        );
        let promoter = Arc::new(StatusPromoter::new(
            mutator.clone(),
            config.promotion_batch_size,
            config.promotion_interval(),
        ));
        let sync = Arc::new(PollSyncEngine::new(
            indexers,
            mutator.clone(),
            normalizer.clone(),
            promoter.clone(),
            config.indexer_result_limit,
            config.poll_interval(),
        ));
        let ingestor = Arc::new(WebhookIngestor::new(normalizer, mutator.clone()));
        let log_processor = Arc::new(LogProcessor::new(Arc::new(processors), mutator.clone()));

        let webhook_addr = if config.webhook.enabled {
            match webhook::serve(config.webhook.listen, ingestor.clone(), cancel.clone()).await {
                Ok((addr, task)) => {
                    tasks.push(task);
                    Some(addr)
                }
                Err(e) => {
                    cancel.cancel();
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        tasks.push(tokio::spawn(promoter.clone().run(cancel.clone())));
        if sync.chain_ids().is_empty() {
            info!("no indexer configured, poll sync disabled");
        } else {
            tasks.push(tokio::spawn(sync.clone().run(cancel.clone())));
        }

        info!(
            chains = config.chains.len(),
            webhook = ?webhook_addr,
            "engine started"
        );
        Ok(EngineHandle {
            cancel,
            tasks,
            webhook_addr,
            mutator,
            promoter,
            sync,
            ingestor,
            log_processor,
        })
    }
}

fn build_indexers(
    config: &EngineConfig,
    mut overrides: HashMap<u64, Arc<dyn IndexerClient>>,
) -> Result<HashMap<u64, Arc<dyn IndexerClient>>, EngineError> {
    let timeout = Duration::from_millis(config.rpc.request_timeout_ms);
    let mut indexers = HashMap::new();
    for chain in &config.chains {
        if let Some(indexer) = overrides.remove(&chain.chain_id) {
            indexers.insert(chain.chain_id, indexer);
        } else if let Some(url) = &chain.indexer_url {
            let client = GraphqlIndexerClient::new(url.clone(), timeout)?;
            indexers.insert(chain.chain_id, Arc::new(client) as Arc<dyn IndexerClient>);
        }
    }
    for chain_id in overrides.keys() {
        warn!(chain_id, "indexer override for unconfigured chain ignored");
    }
    Ok(indexers)
}

fn build_processors(
    config: &EngineConfig,
    overrides: Vec<Arc<dyn ChainProcessor>>,
) -> Result<ProcessorRegistry, EngineError> {
    let rpc_chains: Vec<_> = config
        .chains
        .iter()
        .filter(|c| !c.rpc_urls.is_empty())
        .collect();
    let gateway = Arc::new(RpcGateway::from_urls(
        config.rpc.gateway_config(),
        rpc_chains.iter().map(|c| (c.chain_id, c.rpc_urls.clone())),
    )?);

    let mut builder = ProcessorRegistry::builder();
    for chain in rpc_chains {
        let decoder = ChainEventDecoder::new().with_grace_period(chain.grace_period_secs);
        builder = builder.with_chain(
            chain.chain_id,
            decoder,
            gateway.clone(),
            chain.recovery_schemes.clone(),
        );
    }
    for processor in overrides {
        builder = builder.with(processor);
    }
    Ok(builder.build())
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// A running engine.
pub struct EngineHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    webhook_addr: Option<SocketAddr>,
    mutator: Arc<FlowMutator>,
    promoter: Arc<StatusPromoter>,
    sync: Arc<PollSyncEngine>,
    ingestor: Arc<WebhookIngestor>,
    log_processor: Arc<LogProcessor>,
}

impl EngineHandle {
    pub fn mutator(&self) -> &Arc<FlowMutator> {
        &self.mutator
    }

    pub fn promoter(&self) -> &Arc<StatusPromoter> {
        &self.promoter
    }

    pub fn sync(&self) -> &Arc<PollSyncEngine> {
        &self.sync
    }

    pub fn ingestor(&self) -> &Arc<WebhookIngestor> {
        &self.ingestor
    }

    pub fn log_processor(&self) -> &Arc<LogProcessor> {
        &self.log_processor
    }

    /// Where the webhook route is listening, if enabled.
    pub fn webhook_addr(&self) -> Option<SocketAddr> {
        self.webhook_addr
    }

    /// First error of the most recent poll tick.
    pub fn last_poll_error(&self) -> Option<String> {
        self.sync.last_error()
    }

    /// Token the background tasks observe.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal every task and wait for them to finish.
    pub async fn stop(self) {
        info!("engine stopping");
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
        info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, WebhookConfig};
    use timelock_core::{ContractEntry, Standard};

    fn config() -> EngineConfig {
        EngineConfig {
            chains: vec![ChainConfig {
                chain_id: 1,
                name: "mainnet".into(),
                rpc_urls: vec!["http://127.0.0.1:8545".into()],
                indexer_url: None,
                recovery_schemes: Vec::new(),
                grace_period_secs: 1_209_600,
            }],
            registry: RegistrySeed {
                contracts: vec![ContractEntry {
                    standard: Standard::Compound,
                    chain_id: 1,
                    address: "0xc0".into(),
                    active: true,
                }],
                secrets: Vec::new(),
            },
            webhook: WebhookConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn starts_and_stops() {
        let engine = Engine::from_config(config()).await.unwrap();
        let handle = engine.start().await.unwrap();
        assert!(handle.webhook_addr().is_none());
        assert!(handle.sync().chain_ids().is_empty());
        assert!(handle.last_poll_error().is_none());
        let token = handle.cancellation_token();
        handle.stop().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_start() {
        let mut cfg = config();
        cfg.poll_interval_secs = 0;
        let engine = Engine::new(
            cfg,
            Arc::new(MemoryFlowStore::new()),
            Arc::new(MemoryContractRegistry::new()),
        );
        assert!(matches!(engine.start().await, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn webhook_binds_ephemeral_port() {
        let mut cfg = config();
        cfg.webhook = WebhookConfig {
            enabled: true,
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        let handle = Engine::from_config(cfg).await.unwrap().start().await.unwrap();
        let addr = handle.webhook_addr().unwrap();
        assert_ne!(addr.port(), 0);
        handle.stop().await;
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn sqlite_needs_feature() {
        let cfg = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: Some("flows.db".into()),
        };
        assert!(matches!(open_store(&cfg).await, Err(EngineError::Config(_))));
    }
}
