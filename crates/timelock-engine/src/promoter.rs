//! `StatusPromoter`: time-driven status sweep.
//!
//! Each tick asks the store for flows whose deadline has passed (most
//! overdue first, bounded batch) and advances each through the mutator.
//! One flow's failure is logged and does not stop the sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use timelock_core::store::needs_promotion;
use timelock_core::{FlowError, FlowKey, Standard, StatusChange};

use crate::mutator::FlowMutator;

pub struct StatusPromoter {
    mutator: Arc<FlowMutator>,
    batch_size: usize,
    interval: Duration,
}

impl StatusPromoter {
    pub fn new(mutator: Arc<FlowMutator>, batch_size: usize, interval: Duration) -> Self {
        Self {
            mutator,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    /// One sweep. Returns the status changes made.
    ///
    /// Overdue flows of unregistered or inactive contracts do not count
    /// toward the batch: the candidate window widens past them until
    /// `batch_size` promotable flows are found or the store runs out.
    pub async fn tick(&self) -> Result<Vec<StatusChange>, FlowError> {
        let now = self.mutator.clock().now();
        let keys = self.promotable(now).await?;
        Ok(self.promote_all(&keys).await)
    }

    async fn promotable(&self, now: DateTime<Utc>) -> Result<Vec<FlowKey>, FlowError> {
        let registry = self.mutator.registry();
        let mut active: HashMap<(Standard, u64, String), bool> = HashMap::new();
        let mut window = self.batch_size;
        loop {
            let due = self
                .mutator
                .store()
                .list_needing_promotion(now, window)
                .await?;
            let exhausted = due.len() < window;

            let mut keys = Vec::with_capacity(self.batch_size);
            let mut passed = 0usize;
            for flow in due {
                if keys.len() == self.batch_size {
                    break;
                }
                let contract = (flow.key.standard, flow.key.chain_id, flow.key.contract.clone());
                let is_active = match active.get(&contract) {
                    Some(known) => *known,
                    None => {
                        let known = registry
                            .is_platform_contract(contract.0, contract.1, &contract.2)
                            .await?;
                        active.insert(contract, known);
                        known
                    }
                };
                if is_active {
                    keys.push(flow.key);
                } else {
                    passed += 1;
                }
            }

            if keys.len() == self.batch_size || exhausted {
                if passed > 0 {
                    debug!(passed, "overdue flows of inactive contracts left in place");
                }
                return Ok(keys);
            }
            window = window.saturating_mul(2);
        }
    }

    /// Promote every due flow of one contract, regardless of batch size.
    pub async fn check_contract(
        &self,
        chain_id: u64,
        contract: &str,
    ) -> Result<Vec<StatusChange>, FlowError> {
        let now = self.mutator.clock().now();
        let keys: Vec<FlowKey> = self
            .mutator
            .store()
            .list_by_contract(chain_id, contract)
            .await?
            .into_iter()
            .filter(|f| needs_promotion(f, now))
            .map(|f| f.key)
            .collect();
        Ok(self.promote_all(&keys).await)
    }

    async fn promote_all(&self, keys: &[FlowKey]) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for key in keys {
            match self.mutator.promote(key).await {
                Ok(c) => changes.extend(c),
                Err(e) => warn!(key = %key, error = %e, "promotion failed"),
            }
        }
        changes
    }

    /// Sweep every `interval` until `cancel` fires. A sweep in progress is
    /// never interrupted.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), batch = self.batch_size, "status promoter started");
        loop {
            match self.tick().await {
                Ok(changes) if !changes.is_empty() => {
                    info!(promoted = changes.len(), "promotion sweep complete")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "promotion sweep failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("status promoter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use timelock_core::{
        Clock, ContractEntry, EventKind, FlowStatus, ManualClock, MemoryContractRegistry,
        TransactionEvent,
    };
    use timelock_storage::MemoryFlowStore;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn setup(batch: usize) -> (StatusPromoter, Arc<FlowMutator>, Arc<ManualClock>) {
        let (promoter, m, clock, _) = setup_with_registry(batch);
        (promoter, m, clock)
    }

    fn setup_with_registry(
        batch: usize,
    ) -> (StatusPromoter, Arc<FlowMutator>, Arc<ManualClock>, Arc<MemoryContractRegistry>) {
        let registry = Arc::new(MemoryContractRegistry::new());
        for contract in ["0xc1", "0xc2"] {
            registry.register(ContractEntry {
                standard: Standard::Compound,
                chain_id: 1,
                address: contract.into(),
                active: true,
            });
        }
        let clock = Arc::new(ManualClock::new(t0()));
        let mutator = Arc::new(FlowMutator::new(
            Arc::new(MemoryFlowStore::new()),
            registry.clone(),
            clock.clone(),
        ));
        let promoter = StatusPromoter::new(mutator.clone(), batch, Duration::from_secs(60));
        (promoter, mutator, clock, registry)
    }

    async fn queue(m: &FlowMutator, contract: &str, flow: &str, eta_in: i64) {
        let mut ev = TransactionEvent::new(EventKind::Queue, Standard::Compound, 1, contract, flow, "0xq");
        ev.eta = Some(m.clock().now() + ChronoDuration::seconds(eta_in));
        ev.grace_period = Some(1_000);
        m.apply_event(&ev).await.unwrap();
    }

    #[tokio::test]
    async fn tick_promotes_overdue_in_batches() {
        let (promoter, m, clock) = setup(2);
        queue(&m, "0xc1", "0x1", 30).await;
        queue(&m, "0xc1", "0x2", 10).await;
        queue(&m, "0xc1", "0x3", 20).await;
        queue(&m, "0xc1", "0x4", 5_000).await;

        assert!(promoter.tick().await.unwrap().is_empty());
        clock.advance(ChronoDuration::seconds(100));

        let first: Vec<_> = promoter.tick().await.unwrap().into_iter().map(|c| c.flow_id).collect();
        assert_eq!(first, vec!["0x2", "0x3"]);
        let second: Vec<_> = promoter.tick().await.unwrap().into_iter().map(|c| c.flow_id).collect();
        assert_eq!(second, vec!["0x1"]);
        assert!(promoter.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ready_compound_flows_expire() {
        let (promoter, m, clock) = setup(10);
        queue(&m, "0xc1", "0x1", 10).await;
        clock.advance(ChronoDuration::seconds(20));
        promoter.tick().await.unwrap();
        clock.advance(ChronoDuration::seconds(1_000));
        let changes = promoter.tick().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_status, Some(FlowStatus::Ready));
        assert_eq!(changes[0].new_status, FlowStatus::Expired);
    }

    #[tokio::test]
    async fn check_contract_is_scoped() {
        let (promoter, m, clock) = setup(1);
        queue(&m, "0xc1", "0x1", 10).await;
        queue(&m, "0xc1", "0x2", 10).await;
        queue(&m, "0xc2", "0x3", 10).await;
        clock.advance(ChronoDuration::seconds(11));

        let changes = promoter.check_contract(1, "0xC1").await.unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.contract == "0xc1"));
    }

    #[tokio::test]
    async fn inactive_contract_flows_do_not_block_the_batch() {
        let (promoter, m, clock, registry) = setup_with_registry(1);
        queue(&m, "0xc1", "0x1", 10).await;
        queue(&m, "0xc1", "0x2", 15).await;
        queue(&m, "0xc2", "0x3", 20).await;
        queue(&m, "0xc2", "0x4", 25).await;
        registry.deactivate(Standard::Compound, 1, "0xc1");
        clock.advance(ChronoDuration::seconds(100));

        let first: Vec<_> = promoter.tick().await.unwrap().into_iter().map(|c| c.flow_id).collect();
        assert_eq!(first, vec!["0x3"]);
        let second: Vec<_> = promoter.tick().await.unwrap().into_iter().map(|c| c.flow_id).collect();
        assert_eq!(second, vec!["0x4"]);
        assert!(promoter.tick().await.unwrap().is_empty());

        let parked = m
            .store()
            .get(&FlowKey::new(Standard::Compound, 1, "0xc1", "0x1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parked.status, FlowStatus::Waiting);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (promoter, _m, _clock) = setup(10);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::new(promoter).run(cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }
}
