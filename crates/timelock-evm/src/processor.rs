//! Per-chain log processors.
//!
//! A [`ChainProcessor`] bundles what it takes to turn a raw log of one chain
//! into an enriched event. The [`ProcessorRegistry`] maps chain ids to
//! processors and is built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use timelock_core::TransactionEvent;
use timelock_rpc::RpcGateway;

use crate::decoder::ChainEventDecoder;
use crate::enrich::{EnrichmentPipeline, SenderSource};
use crate::error::{DecodeError, EnrichError};
use crate::log::RawLog;
use crate::recovery::RecoveryScheme;

#[async_trait]
pub trait ChainProcessor: Send + Sync {
    fn chain_id(&self) -> u64;

    fn decode(&self, log: &RawLog) -> Result<TransactionEvent, DecodeError>;

    async fn enrich(
        &self,
        event: &mut TransactionEvent,
        cancel: &CancellationToken,
    ) -> Result<(), EnrichError>;
}

/// Processor for chains whose nodes report the signer as `from`.
pub struct EvmChainProcessor {
    chain_id: u64,
    decoder: ChainEventDecoder,
    pipeline: EnrichmentPipeline,
}

impl EvmChainProcessor {
    pub fn new(chain_id: u64, decoder: ChainEventDecoder, gateway: Arc<RpcGateway>) -> Self {
        Self {
            chain_id,
            decoder,
            pipeline: EnrichmentPipeline::new(gateway, SenderSource::NodeReported),
        }
    }
}

#[async_trait]
impl ChainProcessor for EvmChainProcessor {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn decode(&self, log: &RawLog) -> Result<TransactionEvent, DecodeError> {
        self.decoder.decode(self.chain_id, log)
    }

    async fn enrich(
        &self,
        event: &mut TransactionEvent,
        cancel: &CancellationToken,
    ) -> Result<(), EnrichError> {
        self.pipeline.enrich(event, cancel).await
    }
}

/// Processor for L2s: the sender is recovered from the signature, trying
/// the chain's configured schemes in order.
pub struct L2ChainProcessor {
    chain_id: u64,
    decoder: ChainEventDecoder,
    pipeline: EnrichmentPipeline,
}

impl L2ChainProcessor {
    pub fn new(
        chain_id: u64,
        decoder: ChainEventDecoder,
        gateway: Arc<RpcGateway>,
        schemes: Vec<RecoveryScheme>,
    ) -> Self {
        Self {
            chain_id,
            decoder,
            pipeline: EnrichmentPipeline::new(gateway, SenderSource::Recover(schemes)),
        }
    }
}

#[async_trait]
impl ChainProcessor for L2ChainProcessor {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn decode(&self, log: &RawLog) -> Result<TransactionEvent, DecodeError> {
        self.decoder.decode(self.chain_id, log)
    }

    async fn enrich(
        &self,
        event: &mut TransactionEvent,
        cancel: &CancellationToken,
    ) -> Result<(), EnrichError> {
        self.pipeline.enrich(event, cancel).await
    }
}

/// chain id → processor. Immutable once built.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<u64, Arc<dyn ChainProcessor>>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::default()
    }

    pub fn get(&self, chain_id: u64) -> Option<Arc<dyn ChainProcessor>> {
        self.processors.get(&chain_id).cloned()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.processors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Default)]
pub struct ProcessorRegistryBuilder {
    processors: HashMap<u64, Arc<dyn ChainProcessor>>,
}

impl ProcessorRegistryBuilder {
    /// Register a processor; a later registration for the same chain wins.
    pub fn with(mut self, processor: Arc<dyn ChainProcessor>) -> Self {
        self.processors.insert(processor.chain_id(), processor);
        self
    }

    /// Pick the processor kind from the chain's recovery configuration:
    /// no schemes means the node-reported sender is trusted.
    pub fn with_chain(
        self,
        chain_id: u64,
        decoder: ChainEventDecoder,
        gateway: Arc<RpcGateway>,
        schemes: Vec<RecoveryScheme>,
    ) -> Self {
        let processor: Arc<dyn ChainProcessor> = if schemes.is_empty() {
            Arc::new(EvmChainProcessor::new(chain_id, decoder, gateway))
        } else {
            Arc::new(L2ChainProcessor::new(chain_id, decoder, gateway, schemes))
        };
        self.with(processor)
    }

    pub fn build(self) -> ProcessorRegistry {
        ProcessorRegistry {
            processors: self.processors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timelock_rpc::GatewayConfig;

    #[test]
    fn registry_selects_by_chain() {
        let gw = Arc::new(RpcGateway::new(GatewayConfig::default(), []));
        let registry = ProcessorRegistry::builder()
            .with_chain(1, ChainEventDecoder::new(), gw.clone(), vec![])
            .with_chain(10, ChainEventDecoder::new(), gw, vec![RecoveryScheme::Eip1559])
            .build();
        assert_eq!(registry.chain_ids(), vec![1, 10]);
        assert_eq!(registry.get(10).unwrap().chain_id(), 10);
        assert!(registry.get(56).is_none());
    }
}
