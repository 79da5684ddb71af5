//! Flow persistence trait.
//!
//! The store exclusively owns persisted flow state. Implementations live in
//! `timelock-storage` (`MemoryFlowStore`, `SqliteFlowStore`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FlowError;
use crate::types::{Flow, FlowKey, FlowPatch, FlowStatus};

/// Result of a create-or-merge.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// No flow existed for the key; one was inserted.
    Created(Flow),
    /// An existing flow had at least one field changed.
    Merged(Flow),
    /// The patch carried nothing new.
    Unchanged(Flow),
}

impl UpsertOutcome {
    pub fn flow(&self) -> &Flow {
        match self {
            Self::Created(f) | Self::Merged(f) | Self::Unchanged(f) => f,
        }
    }

    pub fn into_flow(self) -> Flow {
        match self {
            Self::Created(f) | Self::Merged(f) | Self::Unchanged(f) => f,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Idempotent keyed storage of flows.
///
/// Implementations must be safe under concurrent calls for different keys.
/// Read-then-write on the same key is serialized by the caller (the engine's
/// mutator holds a per-key lock).
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Insert the flow if absent, otherwise merge the fields `patch` sets.
    ///
    /// Merging never blanks an existing value and never changes status;
    /// `patch.status` is only used when the flow is created.
    async fn upsert(
        &self,
        key: &FlowKey,
        patch: FlowPatch,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, FlowError>;

    /// Unconditionally write `next`. `previous` is the status the caller
    /// observed, used for logging. Fails with `NotFound` if the key is absent.
    async fn set_status(
        &self,
        key: &FlowKey,
        previous: FlowStatus,
        next: FlowStatus,
        now: DateTime<Utc>,
    ) -> Result<Flow, FlowError>;

    /// Fetch a flow. Absence is `Ok(None)`.
    async fn get(&self, key: &FlowKey) -> Result<Option<Flow>, FlowError>;

    /// `waiting` flows with `eta <= now`, and compound `ready` flows with
    /// `expired_at <= now`, ordered by eta ascending and truncated to `limit`.
    async fn list_needing_promotion(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Flow>, FlowError>;

    /// All flows of one contract (both standards), ordered by eta ascending.
    async fn list_by_contract(&self, chain_id: u64, contract: &str)
        -> Result<Vec<Flow>, FlowError>;
}

/// Whether `flow` belongs in a `list_needing_promotion` result at `now`.
///
/// Shared by store implementations that filter in process.
pub fn needs_promotion(flow: &Flow, now: DateTime<Utc>) -> bool {
    crate::status::promotion_target(flow, now).is_some()
}

/// Ordering used by the listing queries: eta ascending, flows without an
/// eta last, then by key for a stable result.
pub fn eta_order(a: &Flow, b: &Flow) -> std::cmp::Ordering {
    match (a.eta, b.eta) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
    .then_with(|| a.key.cmp(&b.key))
}
