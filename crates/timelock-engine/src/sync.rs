//! `PollSyncEngine`: periodic full resync against the indexer.
//!
//! ```text
//! tick ──► JoinSet ─┬─ chain 1: per standard: active contracts ─► one batched query ─► normalize ─► apply_snapshot
//!                   ├─ chain 10: …
//!                   └─ chain 137: …
//! ```
//!
//! Chains run concurrently and fail independently; the first error of a
//! tick is reported once every chain has finished. Inside a chain, a flow
//! that fails to normalize or persist is logged and skipped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use timelock_core::{Standard, StatusChange};

use crate::error::SyncError;
use crate::indexer::{FlowRecord, IndexerClient};
use crate::mutator::{FlowMutator, MutationOutcome};
use crate::normalizer::EventNormalizer;
use crate::promoter::StatusPromoter;

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub fetched: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncStats {
    fn merge(&mut self, other: SyncStats) {
        self.fetched += other.fetched;
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct PollSyncEngine {
    indexers: BTreeMap<u64, Arc<dyn IndexerClient>>,
    mutator: Arc<FlowMutator>,
    normalizer: EventNormalizer,
    promoter: Arc<StatusPromoter>,
    result_limit: usize,
    interval: Duration,
    last_error: Mutex<Option<String>>,
}

impl PollSyncEngine {
    pub fn new(
        indexers: impl IntoIterator<Item = (u64, Arc<dyn IndexerClient>)>,
        mutator: Arc<FlowMutator>,
        normalizer: EventNormalizer,
        promoter: Arc<StatusPromoter>,
        result_limit: usize,
        interval: Duration,
    ) -> Self {
        Self {
            indexers: indexers.into_iter().collect(),
            mutator,
            normalizer,
            promoter,
            result_limit: result_limit.max(1),
            interval,
            last_error: Mutex::new(None),
        }
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.indexers.keys().copied().collect()
    }

    /// First error of the most recent tick, if it had one.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn record_error(&self, error: Option<&SyncError>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error.map(ToString::to_string);
        }
    }

    fn indexer(&self, chain_id: u64) -> Result<&Arc<dyn IndexerClient>, SyncError> {
        self.indexers
            .get(&chain_id)
            .ok_or(SyncError::UnknownChain { chain_id })
    }

    /// One full resync of every chain.
    pub async fn sync_all(self: &Arc<Self>) -> Result<SyncStats, SyncError> {
        let mut tasks = JoinSet::new();
        for &chain_id in self.indexers.keys() {
            let engine = Arc::clone(self);
            tasks.spawn(async move { (chain_id, engine.sync_chain(chain_id).await) });
        }

        let mut total = SyncStats::default();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok((_, r)) => r,
                Err(e) => {
                    warn!(error = %e, "chain sync task failed");
                    // The chain id is lost with the task; 0 marks it unknown.
                    Err(SyncError::TaskFailed { chain_id: 0 })
                }
            };
            match result {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    warn!(chain_id = e.chain_id(), error = %e, "chain sync failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.record_error(first_error.as_ref());
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Resync every active contract of one chain, one query per standard.
    pub async fn sync_chain(&self, chain_id: u64) -> Result<SyncStats, SyncError> {
        let indexer = self.indexer(chain_id)?;
        let mut stats = SyncStats::default();
        for standard in Standard::ALL {
            let contracts = self
                .mutator
                .registry()
                .list_active_contracts(standard, chain_id)
                .await
                .map_err(|source| SyncError::Flow { chain_id, source })?;
            if contracts.is_empty() {
                continue;
            }
            let records = indexer
                .flows_by_contracts(standard, &contracts, self.result_limit)
                .await
                .map_err(|source| SyncError::Indexer { chain_id, source })?;
            if records.len() >= self.result_limit {
                warn!(
                    chain_id,
                    standard = %standard,
                    limit = self.result_limit,
                    "indexer result limit reached, some flows may be missing"
                );
            }
            stats.merge(self.apply_records(chain_id, &records).await);
        }
        debug!(chain_id, ?stats, "chain sync complete");
        Ok(stats)
    }

    async fn apply_records(&self, chain_id: u64, records: &[FlowRecord]) -> SyncStats {
        let mut stats = SyncStats {
            fetched: records.len(),
            ..Default::default()
        };
        for record in records {
            let snapshot = match self.normalizer.normalize_record(chain_id, record) {
                Ok(s) => s,
                Err(e) => {
                    warn!(chain_id, flow_id = record.id(), error = %e, "skipping malformed flow");
                    stats.failed += 1;
                    continue;
                }
            };
            match self.mutator.apply_snapshot(snapshot).await {
                Ok(MutationOutcome::Skipped(_)) => stats.skipped += 1,
                Ok(MutationOutcome::Unchanged(_)) => stats.unchanged += 1,
                Ok(MutationOutcome::Applied { .. }) => stats.applied += 1,
                Err(e) => {
                    warn!(chain_id, flow_id = record.id(), error = %e, "failed to persist flow");
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// Resync one contract now, then run the promoter's check on it.
    pub async fn resync_contract(
        &self,
        chain_id: u64,
        standard: Standard,
        contract: &str,
    ) -> Result<(SyncStats, Vec<StatusChange>), SyncError> {
        let indexer = self.indexer(chain_id)?;
        let contract = contract.to_ascii_lowercase();
        let records = indexer
            .flows_by_contracts(standard, std::slice::from_ref(&contract), self.result_limit)
            .await
            .map_err(|source| SyncError::Indexer { chain_id, source })?;
        let stats = self.apply_records(chain_id, &records).await;
        let promoted = self
            .promoter
            .check_contract(chain_id, &contract)
            .await
            .map_err(|source| SyncError::Flow { chain_id, source })?;
        info!(chain_id, contract = %contract, ?stats, promoted = promoted.len(), "contract resynced");
        Ok((stats, promoted))
    }

    /// Import the single flow queued by `tx_hash`. `None` if the indexer
    /// does not know it.
    pub async fn resync_transaction(
        &self,
        chain_id: u64,
        standard: Standard,
        tx_hash: &str,
    ) -> Result<Option<MutationOutcome>, SyncError> {
        let indexer = self.indexer(chain_id)?;
        let tx_hash = tx_hash.to_ascii_lowercase();
        let Some(record) = indexer
            .transaction_by_hash(standard, &tx_hash)
            .await
            .map_err(|source| SyncError::Indexer { chain_id, source })?
        else {
            debug!(chain_id, tx = %tx_hash, "transaction unknown to indexer");
            return Ok(None);
        };
        let snapshot = self
            .normalizer
            .normalize_record(chain_id, &record)
            .map_err(|source| SyncError::Flow { chain_id, source })?;
        let outcome = self
            .mutator
            .apply_snapshot(snapshot)
            .await
            .map_err(|source| SyncError::Flow { chain_id, source })?;
        Ok(Some(outcome))
    }

    /// Resync every `interval` until `cancel` fires. A tick in progress is
    /// never interrupted.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            chains = ?self.chain_ids(),
            interval_secs = self.interval.as_secs(),
            "poll sync started"
        );
        loop {
            match self.sync_all().await {
                Ok(stats) => info!(?stats, "poll sync tick complete"),
                Err(e) => warn!(error = %e, "poll sync tick finished with errors"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("poll sync stopped");
    }
}
