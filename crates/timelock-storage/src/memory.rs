//! In-memory flow store.
//!
//! All data is lost when the process exits.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use timelock_core::store::{eta_order, needs_promotion};
use timelock_core::{Flow, FlowError, FlowKey, FlowPatch, FlowStatus, FlowStore, UpsertOutcome};

#[derive(Default)]
pub struct MemoryFlowStore {
    flows: Mutex<HashMap<FlowKey, Flow>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<FlowKey, Flow>>, FlowError> {
        self.flows
            .lock()
            .map_err(|e| FlowError::Storage(format!("flow map poisoned: {e}")))
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn upsert(
        &self,
        key: &FlowKey,
        patch: FlowPatch,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, FlowError> {
        let mut flows = self.lock()?;
        match flows.get_mut(key) {
            Some(existing) => {
                if patch.merge_into(existing, now) {
                    Ok(UpsertOutcome::Merged(existing.clone()))
                } else {
                    Ok(UpsertOutcome::Unchanged(existing.clone()))
                }
            }
            None => {
                let flow = patch.into_flow(key.clone(), now);
                flows.insert(key.clone(), flow.clone());
                tracing::debug!(key = %key, status = %flow.status, "flow created");
                Ok(UpsertOutcome::Created(flow))
            }
        }
    }

    async fn set_status(
        &self,
        key: &FlowKey,
        previous: FlowStatus,
        next: FlowStatus,
        now: DateTime<Utc>,
    ) -> Result<Flow, FlowError> {
        let mut flows = self.lock()?;
        let flow = flows.get_mut(key).ok_or_else(|| FlowError::NotFound {
            key: key.to_string(),
        })?;
        flow.status = next;
        flow.updated_at = now;
        tracing::debug!(key = %key, from = %previous, to = %next, "flow status written");
        Ok(flow.clone())
    }

    async fn get(&self, key: &FlowKey) -> Result<Option<Flow>, FlowError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn list_needing_promotion(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Flow>, FlowError> {
        let mut out: Vec<Flow> = self
            .lock()?
            .values()
            .filter(|f| needs_promotion(f, now))
            .cloned()
            .collect();
        out.sort_by(eta_order);
        out.truncate(limit);
        Ok(out)
    }

    async fn list_by_contract(
        &self,
        chain_id: u64,
        contract: &str,
    ) -> Result<Vec<Flow>, FlowError> {
        let contract = contract.to_ascii_lowercase();
        let mut out: Vec<Flow> = self
            .lock()?
            .values()
            .filter(|f| f.key.chain_id == chain_id && f.key.contract == contract)
            .cloned()
            .collect();
        out.sort_by(eta_order);
        Ok(out)
    }
}
