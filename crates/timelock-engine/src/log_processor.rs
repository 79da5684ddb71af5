//! Raw chain logs → flow mutations.
//!
//! Used for rescans and for chains without indexer coverage: the chain's
//! processor decodes and enriches the log, then the mutator applies it
//! like any push event.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use timelock_core::TransactionEvent;
use timelock_evm::{ProcessorRegistry, RawLog};

use crate::error::LogError;
use crate::mutator::{FlowMutator, MutationOutcome};

pub struct LogProcessor {
    processors: Arc<ProcessorRegistry>,
    mutator: Arc<FlowMutator>,
}

impl LogProcessor {
    pub fn new(processors: Arc<ProcessorRegistry>, mutator: Arc<FlowMutator>) -> Self {
        Self {
            processors,
            mutator,
        }
    }

    /// Decode and enrich `log` without touching the store.
    pub async fn decode(
        &self,
        chain_id: u64,
        log: &RawLog,
        cancel: &CancellationToken,
    ) -> Result<TransactionEvent, LogError> {
        let processor = self
            .processors
            .get(chain_id)
            .ok_or(LogError::UnknownChain { chain_id })?;
        let mut event = processor.decode(log)?;
        processor.enrich(&mut event, cancel).await?;
        debug!(
            chain_id,
            kind = %event.kind,
            flow_id = %event.flow_id,
            tx = %event.tx_hash,
            "log decoded"
        );
        Ok(event)
    }

    /// Decode, enrich and apply `log`.
    pub async fn apply(
        &self,
        chain_id: u64,
        log: &RawLog,
        cancel: &CancellationToken,
    ) -> Result<MutationOutcome, LogError> {
        let event = self.decode(chain_id, log, cancel).await?;
        Ok(self.mutator.apply_event(&event).await?)
    }
}
