//! Flow status state machine.
//!
//! ```text
//!   (queue) ─► waiting ──eta──► ready ──expiredAt──► expired   (compound only)
//!                 │               │
//!                 ├───────────────┴──► executed
//!                 └───────────────┴──► cancelled
//! ```

use chrono::{DateTime, Utc};

use crate::types::{Flow, FlowStatus, Standard};

/// Returns `true` if `from → to` is an edge of the lifecycle graph for `standard`.
pub fn can_transition(standard: Standard, from: FlowStatus, to: FlowStatus) -> bool {
    use FlowStatus::*;
    match (from, to) {
        (Waiting, Ready) => true,
        (Ready, Expired) => standard.has_expiry(),
        (Waiting | Ready, Executed | Cancelled) => true,
        _ => false,
    }
}

/// The single next status the promoter should move `flow` to at `now`, if any.
///
/// The promoter applies this repeatedly, so a flow whose eta and expiry have
/// both elapsed goes `waiting → ready → expired` in one sweep.
pub fn promotion_target(flow: &Flow, now: DateTime<Utc>) -> Option<FlowStatus> {
    match flow.status {
        FlowStatus::Waiting => match flow.eta {
            Some(eta) if eta <= now => Some(FlowStatus::Ready),
            _ => None,
        },
        FlowStatus::Ready if flow.key.standard.has_expiry() => match flow.expired_at {
            Some(exp) if exp <= now => Some(FlowStatus::Expired),
            _ => None,
        },
        _ => None,
    }
}

/// Decide the status to keep when a poll result meets the local record.
///
/// The indexer only ever reports `waiting`, `executed` or `cancelled`; it
/// knows nothing of `ready`/`expired`. A polled `waiting` therefore never
/// downgrades a locally promoted flow, and nothing moves a flow out of a
/// terminal status.
pub fn reconcile_polled_status(local: Option<FlowStatus>, polled: FlowStatus) -> FlowStatus {
    match local {
        None => polled,
        Some(local) if local.is_terminal() => local,
        Some(local) if local.is_derived() && polled == FlowStatus::Waiting => local,
        Some(local) if local == polled => local,
        Some(local) => {
            if can_transition(Standard::Compound, local, polled) {
                polled
            } else {
                local
            }
        }
    }
}
