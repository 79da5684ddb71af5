//! Status-change notification trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::types::{Flow, FlowStatus, Standard};

/// A single status transition, as delivered to notifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub standard: Standard,
    pub chain_id: u64,
    pub contract: String,
    pub flow_id: String,
    /// `None` when the transition created the flow.
    pub old_status: Option<FlowStatus>,
    pub new_status: FlowStatus,
    pub tx_hash: Option<String>,
    pub initiator: Option<String>,
}

impl StatusChange {
    /// Describe the transition of `flow` from `old_status` to its current status.
    pub fn for_flow(flow: &Flow, old_status: Option<FlowStatus>) -> Self {
        Self {
            standard: flow.key.standard,
            chain_id: flow.key.chain_id,
            contract: flow.key.contract.clone(),
            flow_id: flow.key.flow_id.clone(),
            old_status,
            new_status: flow.status,
            tx_hash: flow.status_tx_hash().map(str::to_string),
            initiator: flow.initiator.clone(),
        }
    }
}

/// A notification channel (mail, chat webhook, ...).
///
/// Delivery is best-effort: the engine logs errors and never retries.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, change: &StatusChange) -> Result<(), FlowError>;

    /// Human-readable channel name for logs.
    fn name(&self) -> &str;
}
