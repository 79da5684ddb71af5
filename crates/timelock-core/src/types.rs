//! Shared types for the flow pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;

// ─── Standard ─────────────────────────────────────────────────────────────────

/// The timelock contract standard a flow follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Standard {
    /// Compound `Timelock` (queue / execute / cancel, with a grace period).
    Compound,
    /// OpenZeppelin `TimelockController` (schedule / execute / cancel, no expiry).
    Openzeppelin,
}

impl Standard {
    pub const ALL: [Standard; 2] = [Standard::Compound, Standard::Openzeppelin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compound => "compound",
            Self::Openzeppelin => "openzeppelin",
        }
    }

    /// Only the compound standard has a grace period after which a queued
    /// operation expires.
    pub fn has_expiry(&self) -> bool {
        matches!(self, Self::Compound)
    }
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Standard {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compound" => Ok(Self::Compound),
            "openzeppelin" | "oz" => Ok(Self::Openzeppelin),
            other => Err(FlowError::MalformedPayload(format!("unknown standard '{other}'"))),
        }
    }
}

// ─── FlowStatus ───────────────────────────────────────────────────────────────

/// Lifecycle status of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Queued / scheduled, eta not reached yet.
    Waiting,
    /// Eta elapsed; executable.
    Ready,
    /// Grace period elapsed without execution (compound only).
    Expired,
    Executed,
    Cancelled,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Expired => "expired",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` for states with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled | Self::Expired)
    }

    /// Returns `true` for states only ever computed locally; the indexer has
    /// no concept of them.
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Ready | Self::Expired)
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "waiting" | "queued" | "scheduled" => Ok(Self::Waiting),
            "ready" => Ok(Self::Ready),
            "expired" => Ok(Self::Expired),
            "executed" => Ok(Self::Executed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(FlowError::MalformedPayload(format!("unknown status '{other}'"))),
        }
    }
}

// ─── Hex canonicalization ────────────────────────────────────────────────────

/// Canonicalize a hash/address/bytes field to `0x`-prefixed lowercase hex.
///
/// Accepts `0x`, `0X` and the `\x` bytea prefix used by the push source.
pub fn canonical_hex(raw: &str) -> Result<String, FlowError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .or_else(|| trimmed.strip_prefix("\\x"))
        .unwrap_or(trimmed);
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FlowError::MalformedPayload(format!("invalid hex value '{raw}'")));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

// ─── FlowKey ─────────────────────────────────────────────────────────────────

/// Uniqueness key of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub standard: Standard,
    pub chain_id: u64,
    /// Contract address, `0x`-prefixed lowercase.
    pub contract: String,
    /// Upstream flow identity, `0x`-prefixed lowercase.
    pub flow_id: String,
}

impl FlowKey {
    /// Build a key, lowercasing the address and flow id.
    pub fn new(
        standard: Standard,
        chain_id: u64,
        contract: impl Into<String>,
        flow_id: impl Into<String>,
    ) -> Self {
        Self {
            standard,
            chain_id,
            contract: contract.into().to_ascii_lowercase(),
            flow_id: flow_id.into().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.standard, self.chain_id, self.contract, self.flow_id
        )
    }
}

// ─── Flow ────────────────────────────────────────────────────────────────────

/// The canonical lifecycle record of one timelock operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(flatten)]
    pub key: FlowKey,
    pub status: FlowStatus,
    pub queue_tx_hash: Option<String>,
    pub execute_tx_hash: Option<String>,
    pub cancel_tx_hash: Option<String>,
    pub initiator: Option<String>,
    pub target: Option<String>,
    /// Wei amount as a decimal string.
    pub value: Option<String>,
    pub call_data: Option<Vec<u8>>,
    /// Compound only.
    pub function_signature: Option<String>,
    /// OpenZeppelin only.
    pub predecessor: Option<String>,
    /// OpenZeppelin only.
    pub salt: Option<String>,
    /// OpenZeppelin scheduling delay in seconds.
    pub delay: Option<u64>,
    /// Compound grace period in seconds.
    pub grace_period: Option<u64>,
    pub queue_block_number: Option<u64>,
    pub queued_at: Option<DateTime<Utc>>,
    pub eta: Option<DateTime<Utc>>,
    /// Compound only.
    pub expired_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// The transaction hash that caused the current status, if known.
    pub fn status_tx_hash(&self) -> Option<&str> {
        match self.status {
            FlowStatus::Executed => self.execute_tx_hash.as_deref(),
            FlowStatus::Cancelled => self.cancel_tx_hash.as_deref(),
            _ => self.queue_tx_hash.as_deref(),
        }
    }
}

// ─── FlowPatch ───────────────────────────────────────────────────────────────

/// A partial flow update. `None` means "leave as is"; merging never blanks
/// an existing value.
///
/// `status` is only honored when the patch creates a new flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowPatch {
    pub status: Option<FlowStatus>,
    pub queue_tx_hash: Option<String>,
    pub execute_tx_hash: Option<String>,
    pub cancel_tx_hash: Option<String>,
    pub initiator: Option<String>,
    pub target: Option<String>,
    pub value: Option<String>,
    pub call_data: Option<Vec<u8>>,
    pub function_signature: Option<String>,
    pub predecessor: Option<String>,
    pub salt: Option<String>,
    pub delay: Option<u64>,
    pub grace_period: Option<u64>,
    pub queue_block_number: Option<u64>,
    pub queued_at: Option<DateTime<Utc>>,
    pub eta: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

macro_rules! merge_fields {
    ($patch:expr, $flow:expr, $changed:ident, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(v) = &$patch.$field {
                if $flow.$field.as_ref() != Some(v) {
                    $flow.$field = Some(v.clone());
                    $changed = true;
                }
            }
        )*
    };
}

impl FlowPatch {
    /// Materialize a new flow from this patch. A patch without a status
    /// creates a `waiting` flow.
    pub fn into_flow(self, key: FlowKey, now: DateTime<Utc>) -> Flow {
        Flow {
            key,
            status: self.status.unwrap_or(FlowStatus::Waiting),
            queue_tx_hash: self.queue_tx_hash,
            execute_tx_hash: self.execute_tx_hash,
            cancel_tx_hash: self.cancel_tx_hash,
            initiator: self.initiator,
            target: self.target,
            value: self.value,
            call_data: self.call_data,
            function_signature: self.function_signature,
            predecessor: self.predecessor,
            salt: self.salt,
            delay: self.delay,
            grace_period: self.grace_period,
            queue_block_number: self.queue_block_number,
            queued_at: self.queued_at,
            eta: self.eta,
            expired_at: self.expired_at,
            executed_at: self.executed_at,
            cancelled_at: self.cancelled_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge the set fields into `flow`, leaving status untouched.
    /// Returns `true` if anything changed.
    pub fn merge_into(&self, flow: &mut Flow, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        merge_fields!(
            self,
            flow,
            changed,
            [
                queue_tx_hash,
                execute_tx_hash,
                cancel_tx_hash,
                initiator,
                target,
                value,
                call_data,
                function_signature,
                predecessor,
                salt,
                delay,
                grace_period,
                queue_block_number,
                queued_at,
                eta,
                expired_at,
                executed_at,
                cancelled_at,
            ]
        );
        if changed {
            flow.updated_at = now;
        }
        changed
    }
}

// ─── FlowSnapshot ────────────────────────────────────────────────────────────

/// A complete flow as reported by the indexer's pull API.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub key: FlowKey,
    /// Status reported by the indexer: `waiting`, `executed` or `cancelled`.
    pub status: FlowStatus,
    pub patch: FlowPatch,
}

// ─── TransactionEvent ────────────────────────────────────────────────────────

/// Lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `QueueTransaction` (compound) / `CallScheduled` (openzeppelin).
    Queue,
    /// `ExecuteTransaction` / `CallExecuted`.
    Execute,
    /// `CancelTransaction` / `Cancelled`.
    Cancel,
}

impl EventKind {
    /// Classify a source-provided tag.
    pub fn from_tag(tag: &str) -> Result<Self, FlowError> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "queuetransaction" | "callscheduled" | "queue" | "schedule" | "queued"
            | "scheduled" => Ok(Self::Queue),
            "executetransaction" | "callexecuted" | "execute" | "executed" => Ok(Self::Execute),
            "canceltransaction" | "cancelled" | "cancel" | "canceled" => Ok(Self::Cancel),
            _ => Err(FlowError::UnsupportedEventKind {
                tag: tag.to_string(),
            }),
        }
    }

    /// The status an event of this kind moves a flow into.
    pub fn target_status(&self) -> FlowStatus {
        match self {
            Self::Queue => FlowStatus::Waiting,
            Self::Execute => FlowStatus::Executed,
            Self::Cancel => FlowStatus::Cancelled,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Execute => write!(f, "execute"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Call parameters carried by queue and execute events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallDetails {
    pub target: Option<String>,
    /// Decimal string.
    pub value: Option<String>,
    pub data: Option<Vec<u8>>,
    /// Compound function signature, e.g. `"setPendingAdmin(address)"`.
    pub signature: Option<String>,
    pub predecessor: Option<String>,
    pub salt: Option<String>,
}

/// The normalized output of decoding any raw source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub kind: EventKind,
    pub standard: Standard,
    pub chain_id: u64,
    pub contract: String,
    pub flow_id: String,
    /// Hash of the transaction that emitted this event.
    pub tx_hash: String,
    /// Transaction sender (the actor).
    pub sender: Option<String>,
    pub block_number: Option<u64>,
    pub block_timestamp: Option<DateTime<Utc>>,
    /// Receipt status, when known.
    pub tx_succeeded: Option<bool>,
    pub call: CallDetails,
    /// Absolute eta (compound events carry it directly).
    pub eta: Option<DateTime<Utc>>,
    /// Relative delay in seconds (openzeppelin `CallScheduled`).
    pub delay: Option<u64>,
    pub expired_at: Option<DateTime<Utc>>,
    pub grace_period: Option<u64>,
}

impl TransactionEvent {
    /// A bare event of `kind`; payload fields default to `None`.
    pub fn new(
        kind: EventKind,
        standard: Standard,
        chain_id: u64,
        contract: impl Into<String>,
        flow_id: impl Into<String>,
        tx_hash: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            standard,
            chain_id,
            contract: contract.into().to_ascii_lowercase(),
            flow_id: flow_id.into().to_ascii_lowercase(),
            tx_hash: tx_hash.into().to_ascii_lowercase(),
            sender: None,
            block_number: None,
            block_timestamp: None,
            tx_succeeded: None,
            call: CallDetails::default(),
            eta: None,
            delay: None,
            expired_at: None,
            grace_period: None,
        }
    }

    pub fn key(&self) -> FlowKey {
        FlowKey::new(self.standard, self.chain_id, &self.contract, &self.flow_id)
    }

    /// The eta: carried directly, or block time + delay for schedule events.
    pub fn effective_eta(&self) -> Option<DateTime<Utc>> {
        if self.eta.is_some() {
            return self.eta;
        }
        let delay = i64::try_from(self.delay?).ok()?;
        self.block_timestamp?
            .checked_add_signed(Duration::try_seconds(delay)?)
    }

    /// The expiry instant: carried directly, or eta + grace period.
    /// Always `None` for standards without expiry.
    pub fn effective_expired_at(&self) -> Option<DateTime<Utc>> {
        if !self.standard.has_expiry() {
            return None;
        }
        if self.expired_at.is_some() {
            return self.expired_at;
        }
        let grace = i64::try_from(self.grace_period?).ok()?;
        self.effective_eta()?
            .checked_add_signed(Duration::try_seconds(grace)?)
    }

    /// Build the store patch this event contributes. The status is the
    /// event kind's target status; the store only honors it on creation.
    pub fn to_patch(&self) -> FlowPatch {
        let mut patch = FlowPatch {
            status: Some(self.kind.target_status()),
            initiator: self.sender.clone(),
            target: self.call.target.clone(),
            value: self.call.value.clone(),
            call_data: self.call.data.clone(),
            function_signature: self.call.signature.clone(),
            predecessor: self.call.predecessor.clone(),
            salt: self.call.salt.clone(),
            ..Default::default()
        };
        match self.kind {
            EventKind::Queue => {
                patch.queue_tx_hash = Some(self.tx_hash.clone());
                patch.queue_block_number = self.block_number;
                patch.queued_at = self.block_timestamp;
                patch.eta = self.effective_eta();
                patch.delay = self.delay;
                patch.grace_period = self.grace_period.filter(|_| self.standard.has_expiry());
                patch.expired_at = self.effective_expired_at();
            }
            EventKind::Execute => {
                // The executor is not the initiator.
                patch.initiator = None;
                patch.execute_tx_hash = Some(self.tx_hash.clone());
                patch.executed_at = self.block_timestamp;
            }
            EventKind::Cancel => {
                patch.initiator = None;
                patch.cancel_tx_hash = Some(self.tx_hash.clone());
                patch.cancelled_at = self.block_timestamp;
            }
        }
        patch
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn canonical_hex_prefixes() {
        assert_eq!(canonical_hex("\\xABCD").unwrap(), "0xabcd");
        assert_eq!(canonical_hex("0XAbCd").unwrap(), "0xabcd");
        assert_eq!(canonical_hex("abcd").unwrap(), "0xabcd");
        assert_eq!(canonical_hex("0x").unwrap(), "0x");
        assert!(canonical_hex("0xzz").is_err());
    }

    #[test]
    fn event_kind_tags() {
        assert_eq!(EventKind::from_tag("QueueTransaction").unwrap(), EventKind::Queue);
        assert_eq!(EventKind::from_tag("CallScheduled").unwrap(), EventKind::Queue);
        assert_eq!(EventKind::from_tag("CallExecuted").unwrap(), EventKind::Execute);
        assert_eq!(EventKind::from_tag("Cancelled").unwrap(), EventKind::Cancel);
        let err = EventKind::from_tag("MinDelayChange").unwrap_err();
        assert!(err.is_policy_skip());
    }

    #[test]
    fn key_is_lowercased() {
        let k = FlowKey::new(Standard::Compound, 1, "0xABC", "0xDEF");
        assert_eq!(k.contract, "0xabc");
        assert_eq!(k.flow_id, "0xdef");
        assert_eq!(k.to_string(), "compound:1:0xabc:0xdef");
    }

    #[test]
    fn schedule_eta_from_delay() {
        let mut ev = TransactionEvent::new(EventKind::Queue, Standard::Openzeppelin, 1, "0xc", "0xf", "0xt");
        ev.block_timestamp = Some(ts(1_000));
        ev.delay = Some(3_600);
        ev.grace_period = Some(100);
        assert_eq!(ev.effective_eta(), Some(ts(4_600)));
        // openzeppelin has no expiry even when a grace period leaks in
        assert_eq!(ev.effective_expired_at(), None);
        assert_eq!(ev.to_patch().grace_period, None);
    }

    #[test]
    fn compound_expiry_from_grace_period() {
        let mut ev = TransactionEvent::new(EventKind::Queue, Standard::Compound, 1, "0xc", "0xf", "0xt");
        ev.eta = Some(ts(2_000));
        ev.grace_period = Some(500);
        assert_eq!(ev.effective_expired_at(), Some(ts(2_500)));
        ev.expired_at = Some(ts(9_000));
        assert_eq!(ev.effective_expired_at(), Some(ts(9_000)));
    }

    #[test]
    fn execute_patch_does_not_touch_initiator() {
        let mut ev = TransactionEvent::new(EventKind::Execute, Standard::Compound, 1, "0xc", "0xf", "0xexec");
        ev.sender = Some("0xexecutor".into());
        ev.block_timestamp = Some(ts(5));
        let patch = ev.to_patch();
        assert_eq!(patch.initiator, None);
        assert_eq!(patch.execute_tx_hash.as_deref(), Some("0xexec"));
        assert_eq!(patch.executed_at, Some(ts(5)));
        assert_eq!(patch.status, Some(FlowStatus::Executed));
    }

    #[test]
    fn merge_never_blanks() {
        let key = FlowKey::new(Standard::Compound, 1, "0xc", "0xf");
        let mut flow = FlowPatch {
            target: Some("0xt".into()),
            value: Some("1".into()),
            ..Default::default()
        }
        .into_flow(key, ts(0));
        assert_eq!(flow.status, FlowStatus::Waiting);

        let patch = FlowPatch {
            value: Some("2".into()),
            status: Some(FlowStatus::Executed),
            ..Default::default()
        };
        assert!(patch.merge_into(&mut flow, ts(10)));
        assert_eq!(flow.target.as_deref(), Some("0xt"));
        assert_eq!(flow.value.as_deref(), Some("2"));
        assert_eq!(flow.status, FlowStatus::Waiting);
        assert_eq!(flow.updated_at, ts(10));

        // identical patch is a no-op
        assert!(!patch.merge_into(&mut flow, ts(20)));
        assert_eq!(flow.updated_at, ts(10));
    }
}
