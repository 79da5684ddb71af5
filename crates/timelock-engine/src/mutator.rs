//! `FlowMutator`: the only writer of flow state.
//!
//! Every read-then-write sequence runs under a per-key lock, so push
//! deliveries, poll results and promotions for the same flow serialize while
//! different flows proceed in parallel.
//!
//! | Input                        | Effect                                              |
//! |------------------------------|-----------------------------------------------------|
//! | Queue, unseen flow           | create `waiting`                                    |
//! | Queue, known flow            | merge fields, status unchanged                      |
//! | Execute/Cancel, live flow    | merge fields, status → `executed`/`cancelled`       |
//! | Execute/Cancel, terminal     | no-op                                               |
//! | Execute/Cancel, unseen flow  | create directly in the terminal status              |
//! | Poll snapshot                | merge fields, status per `reconcile_polled_status`  |

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use timelock_core::status::{promotion_target, reconcile_polled_status};
use timelock_core::{
    Clock, ContractRegistry, EventKind, Flow, FlowError, FlowKey, FlowSnapshot, FlowStore,
    StatusChange, TransactionEvent, UpsertOutcome,
};

use crate::notifications::NotificationDispatcher;

const LOCK_STRIPES: usize = 64;

/// Fixed pool of async mutexes; a key always maps to the same stripe.
struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new(n: usize) -> Self {
        Self {
            stripes: (0..n.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn lock(&self, key: &FlowKey) -> MutexGuard<'_, ()> {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        let idx = (h.finish() % self.stripes.len() as u64) as usize;
        self.stripes[idx].lock().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Contract unknown to the registry or inactive.
    UnregisteredContract,
    /// The emitting transaction reverted.
    FailedTransaction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Skipped(SkipReason),
    Unchanged(Flow),
    /// The flow was written; `change` is set when its status changed.
    Applied {
        flow: Flow,
        change: Option<StatusChange>,
    },
}

impl MutationOutcome {
    pub fn flow(&self) -> Option<&Flow> {
        match self {
            Self::Skipped(_) => None,
            Self::Unchanged(f) | Self::Applied { flow: f, .. } => Some(f),
        }
    }

    pub fn status_change(&self) -> Option<&StatusChange> {
        match self {
            Self::Applied { change, .. } => change.as_ref(),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

pub struct FlowMutator {
    store: Arc<dyn FlowStore>,
    registry: Arc<dyn ContractRegistry>,
    clock: Arc<dyn Clock>,
    notifications: Option<NotificationDispatcher>,
    locks: KeyLocks,
}

impl FlowMutator {
    pub fn new(
        store: Arc<dyn FlowStore>,
        registry: Arc<dyn ContractRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            notifications: None,
            locks: KeyLocks::new(LOCK_STRIPES),
        }
    }

    pub fn with_notifications(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.notifications = Some(dispatcher);
        self
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<dyn ContractRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn is_registered(&self, key: &FlowKey) -> Result<bool, FlowError> {
        let registered = self
            .registry
            .is_platform_contract(key.standard, key.chain_id, &key.contract)
            .await?;
        if !registered {
            info!(
                standard = %key.standard,
                chain_id = key.chain_id,
                contract = %key.contract,
                flow_id = %key.flow_id,
                "contract not registered, skipping"
            );
        }
        Ok(registered)
    }

    fn emit(&self, change: &StatusChange) {
        if let Some(n) = &self.notifications {
            n.dispatch(change.clone());
        }
    }

    fn created(&self, outcome: UpsertOutcome) -> MutationOutcome {
        let flow = outcome.into_flow();
        info!(key = %flow.key, status = %flow.status, "flow created");
        let change = StatusChange::for_flow(&flow, None);
        self.emit(&change);
        MutationOutcome::Applied {
            flow,
            change: Some(change),
        }
    }

    /// Apply one lifecycle event.
    pub async fn apply_event(&self, event: &TransactionEvent) -> Result<MutationOutcome, FlowError> {
        let key = event.key();
        if event.tx_succeeded == Some(false) {
            debug!(key = %key, tx = %event.tx_hash, "transaction reverted, skipping");
            return Ok(MutationOutcome::Skipped(SkipReason::FailedTransaction));
        }
        if !self.is_registered(&key).await? {
            return Ok(MutationOutcome::Skipped(SkipReason::UnregisteredContract));
        }

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();
        let patch = event.to_patch();

        let Some(current) = self.store.get(&key).await? else {
            let outcome = self.store.upsert(&key, patch, now).await?;
            return Ok(self.created(outcome));
        };

        if event.kind == EventKind::Queue {
            return Ok(match self.store.upsert(&key, patch, now).await? {
                UpsertOutcome::Unchanged(flow) => MutationOutcome::Unchanged(flow),
                other => MutationOutcome::Applied {
                    flow: other.into_flow(),
                    change: None,
                },
            });
        }

        if current.status.is_terminal() {
            debug!(
                key = %key,
                status = %current.status,
                event = %event.kind,
                "flow already terminal, ignoring"
            );
            return Ok(MutationOutcome::Unchanged(current));
        }

        let target = event.kind.target_status();
        self.store.upsert(&key, patch, now).await?;
        let flow = self
            .store
            .set_status(&key, current.status, target, now)
            .await?;
        info!(key = %key, from = %current.status, to = %target, tx = %event.tx_hash, "flow status changed");
        let change = StatusChange::for_flow(&flow, Some(current.status));
        self.emit(&change);
        Ok(MutationOutcome::Applied {
            flow,
            change: Some(change),
        })
    }

    /// Apply a poll snapshot. Every set field overwrites; the status only
    /// moves where `reconcile_polled_status` allows.
    pub async fn apply_snapshot(&self, snapshot: FlowSnapshot) -> Result<MutationOutcome, FlowError> {
        let FlowSnapshot {
            key,
            status: polled,
            mut patch,
        } = snapshot;
        if !self.is_registered(&key).await? {
            return Ok(MutationOutcome::Skipped(SkipReason::UnregisteredContract));
        }

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();
        patch.status = Some(polled);

        let Some(current) = self.store.get(&key).await? else {
            let outcome = self.store.upsert(&key, patch, now).await?;
            return Ok(self.created(outcome));
        };

        let target = reconcile_polled_status(Some(current.status), polled);
        let merged = self.store.upsert(&key, patch, now).await?;
        if target == current.status {
            if polled != current.status {
                debug!(key = %key, local = %current.status, polled = %polled, "keeping local status");
            }
            return Ok(match merged {
                UpsertOutcome::Unchanged(flow) => MutationOutcome::Unchanged(flow),
                other => MutationOutcome::Applied {
                    flow: other.into_flow(),
                    change: None,
                },
            });
        }

        let flow = self
            .store
            .set_status(&key, current.status, target, now)
            .await?;
        info!(key = %key, from = %current.status, to = %target, "flow status changed by poll");
        let change = StatusChange::for_flow(&flow, Some(current.status));
        self.emit(&change);
        Ok(MutationOutcome::Applied {
            flow,
            change: Some(change),
        })
    }

    /// Advance `key` through every promotion due now. A flow past both its
    /// eta and its expiry goes `waiting → ready → expired` in one call.
    pub async fn promote(&self, key: &FlowKey) -> Result<Vec<StatusChange>, FlowError> {
        if !self.is_registered(key).await? {
            return Ok(Vec::new());
        }
        let _guard = self.locks.lock(key).await;
        let now = self.clock.now();
        let Some(mut flow) = self.store.get(key).await? else {
            return Ok(Vec::new());
        };

        let mut changes = Vec::new();
        while let Some(next) = promotion_target(&flow, now) {
            let previous = flow.status;
            flow = self.store.set_status(key, previous, next, now).await?;
            info!(key = %key, from = %previous, to = %next, "flow promoted");
            let change = StatusChange::for_flow(&flow, Some(previous));
            self.emit(&change);
            changes.push(change);
        }
        Ok(changes)
    }
}
