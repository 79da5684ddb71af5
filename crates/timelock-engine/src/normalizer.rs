//! `EventNormalizer`: one canonical shape for both data sources.
//!
//! ```text
//! push row (JSON, per standard) ──► TransactionEvent   (zero or one)
//! poll record (GraphQL flow)    ──► FlowSnapshot       (exactly one)
//! ```
//!
//! Every hash and address leaving this module is `0x`-prefixed lowercase.
//! The push source mirrors database rows, so hex columns may arrive with a
//! `\x` bytea prefix and numbers as either JSON numbers or strings.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

use timelock_core::{
    canonical_hex, CallDetails, EventKind, FlowError, FlowKey, FlowPatch, FlowSnapshot,
    FlowStatus, Standard, TransactionEvent,
};
use timelock_evm::COMPOUND_GRACE_PERIOD_SECS;

use crate::indexer::{CompoundFlowRecord, FlowRecord, IndexerTx, OpenzeppelinFlowRecord};

// ─── Scalars ─────────────────────────────────────────────────────────────────

/// A numeric column that may be serialized as a number or a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(u64),
    Text(String),
}

impl Scalar {
    /// Decimal or `0x` hex.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(s) => {
                let s = s.trim();
                match s.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16).ok(),
                    None => s.parse().ok(),
                }
            }
        }
    }

    /// An unbounded non-negative integer as a decimal string.
    pub fn as_decimal(&self) -> Option<String> {
        match self {
            Self::Int(n) => Some(n.to_string()),
            Self::Text(s) => {
                let s = s.trim();
                (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())).then(|| s.to_string())
            }
        }
    }

    /// Unix seconds, or an RFC 3339 timestamp.
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        if let Some(secs) = self.as_u64() {
            return DateTime::from_timestamp(i64::try_from(secs).ok()?, 0);
        }
        match self {
            Self::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Self::Int(_) => None,
        }
    }
}

fn u64_field(field: &str, v: Option<&Scalar>) -> Result<Option<u64>, FlowError> {
    v.map(|s| {
        s.as_u64()
            .ok_or_else(|| FlowError::MalformedPayload(format!("{field}: not an integer: {s:?}")))
    })
    .transpose()
}

fn decimal_field(field: &str, v: Option<&Scalar>) -> Result<Option<String>, FlowError> {
    v.map(|s| {
        s.as_decimal()
            .ok_or_else(|| FlowError::MalformedPayload(format!("{field}: not a decimal: {s:?}")))
    })
    .transpose()
}

fn instant_field(field: &str, v: Option<&Scalar>) -> Result<Option<DateTime<Utc>>, FlowError> {
    v.map(|s| {
        s.as_instant()
            .ok_or_else(|| FlowError::MalformedPayload(format!("{field}: not a timestamp: {s:?}")))
    })
    .transpose()
}

fn hex_field(v: Option<&str>) -> Result<Option<String>, FlowError> {
    v.filter(|s| !s.trim().is_empty()).map(canonical_hex).transpose()
}

fn bytes_field(v: Option<&str>) -> Result<Option<Vec<u8>>, FlowError> {
    match hex_field(v)? {
        None => Ok(None),
        Some(h) => {
            let body = &h[2..];
            let padded = if body.len() % 2 == 1 {
                format!("0{body}")
            } else {
                body.to_string()
            };
            hex::decode(padded)
                .map(Some)
                .map_err(|e| FlowError::MalformedPayload(format!("call data: {e}")))
        }
    }
}

fn plus_secs(t: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    t.checked_add_signed(Duration::try_seconds(i64::try_from(secs).ok()?)?)
}

// ─── Push rows ───────────────────────────────────────────────────────────────

/// A webhook delivery: either a single-row change notification
/// (`data.new`) or a flat array of rows (`transactions`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    /// Fallback credential when the header is absent.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub data: Option<ChangeData>,
    #[serde(default)]
    pub transactions: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeData {
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl WebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self, FlowError> {
        serde_json::from_slice(body).map_err(|e| FlowError::MalformedPayload(e.to_string()))
    }

    /// New-row data carried by this delivery; empty means nothing to apply.
    pub fn rows(&self) -> Vec<&Value> {
        let mut rows: Vec<&Value> = self
            .transactions
            .iter()
            .flatten()
            .filter(|v| !v.is_null())
            .collect();
        if let Some(new) = self.data.as_ref().and_then(|d| d.new.as_ref()) {
            if !new.is_null() {
                rows.push(new);
            }
        }
        rows
    }
}

/// A compound `Timelock` event row.
#[derive(Debug, Clone, Deserialize)]
pub struct CompoundEventRow {
    #[serde(alias = "event_name", alias = "event")]
    pub event_type: String,
    #[serde(alias = "contract", alias = "address")]
    pub contract_address: String,
    /// The timelock's `txHash` correlation field: identifies the flow.
    pub tx_hash: String,
    /// Hash of the transaction that emitted the event.
    pub transaction_hash: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub eta: Option<Scalar>,
    #[serde(default)]
    pub block_number: Option<Scalar>,
    #[serde(default)]
    pub block_timestamp: Option<Scalar>,
    #[serde(default, alias = "from")]
    pub sender: Option<String>,
}

/// An OpenZeppelin `TimelockController` event row.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenzeppelinEventRow {
    #[serde(alias = "event_name", alias = "event")]
    pub event_type: String,
    #[serde(alias = "contract", alias = "address")]
    pub contract_address: String,
    /// Operation id.
    #[serde(alias = "operation_id")]
    pub id: String,
    pub transaction_hash: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub predecessor: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub delay: Option<Scalar>,
    #[serde(default)]
    pub block_number: Option<Scalar>,
    #[serde(default)]
    pub block_timestamp: Option<Scalar>,
    #[serde(default, alias = "from")]
    pub sender: Option<String>,
}

// ─── Normalizer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EventNormalizer {
    default_grace: u64,
    grace_by_chain: HashMap<u64, u64>,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self {
            default_grace: COMPOUND_GRACE_PERIOD_SECS,
            grace_by_chain: HashMap::new(),
        }
    }
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the compound grace period for one chain.
    pub fn with_grace_period(mut self, chain_id: u64, secs: u64) -> Self {
        self.grace_by_chain.insert(chain_id, secs);
        self
    }

    pub fn grace_period(&self, chain_id: u64) -> u64 {
        self.grace_by_chain
            .get(&chain_id)
            .copied()
            .unwrap_or(self.default_grace)
    }

    /// Normalize one push row for `standard` on `chain_id`.
    ///
    /// Unknown event tags yield [`FlowError::UnsupportedEventKind`], which
    /// callers skip.
    pub fn normalize_row(
        &self,
        standard: Standard,
        chain_id: u64,
        row: &Value,
    ) -> Result<TransactionEvent, FlowError> {
        let malformed = |e: serde_json::Error| FlowError::MalformedPayload(e.to_string());
        match standard {
            Standard::Compound => {
                let row = CompoundEventRow::deserialize(row).map_err(malformed)?;
                self.compound_row(chain_id, row)
            }
            Standard::Openzeppelin => {
                let row = OpenzeppelinEventRow::deserialize(row).map_err(malformed)?;
                self.openzeppelin_row(chain_id, row)
            }
        }
    }

    fn compound_row(
        &self,
        chain_id: u64,
        row: CompoundEventRow,
    ) -> Result<TransactionEvent, FlowError> {
        let kind = EventKind::from_tag(&row.event_type)?;
        let mut event = TransactionEvent::new(
            kind,
            Standard::Compound,
            chain_id,
            canonical_hex(&row.contract_address)?,
            canonical_hex(&row.tx_hash)?,
            canonical_hex(&row.transaction_hash)?,
        );
        event.sender = hex_field(row.sender.as_deref())?;
        event.block_number = u64_field("block_number", row.block_number.as_ref())?;
        event.block_timestamp = instant_field("block_timestamp", row.block_timestamp.as_ref())?;
        event.call = CallDetails {
            target: hex_field(row.target.as_deref())?,
            value: decimal_field("value", row.value.as_ref())?,
            data: bytes_field(row.data.as_deref())?,
            signature: row.signature.filter(|s| !s.is_empty()),
            predecessor: None,
            salt: None,
        };
        event.eta = instant_field("eta", row.eta.as_ref())?;
        if kind == EventKind::Queue {
            event.grace_period = Some(self.grace_period(chain_id));
        }
        Ok(event)
    }

    fn openzeppelin_row(
        &self,
        chain_id: u64,
        row: OpenzeppelinEventRow,
    ) -> Result<TransactionEvent, FlowError> {
        let kind = EventKind::from_tag(&row.event_type)?;
        let mut event = TransactionEvent::new(
            kind,
            Standard::Openzeppelin,
            chain_id,
            canonical_hex(&row.contract_address)?,
            canonical_hex(&row.id)?,
            canonical_hex(&row.transaction_hash)?,
        );
        event.sender = hex_field(row.sender.as_deref())?;
        event.block_number = u64_field("block_number", row.block_number.as_ref())?;
        event.block_timestamp = instant_field("block_timestamp", row.block_timestamp.as_ref())?;
        event.call = CallDetails {
            target: hex_field(row.target.as_deref())?,
            value: decimal_field("value", row.value.as_ref())?,
            data: bytes_field(row.data.as_deref())?,
            signature: None,
            predecessor: hex_field(row.predecessor.as_deref())?,
            salt: hex_field(row.salt.as_deref())?,
        };
        event.delay = u64_field("delay", row.delay.as_ref())?;
        Ok(event)
    }

    /// Normalize one poll record into a full snapshot.
    pub fn normalize_record(
        &self,
        chain_id: u64,
        record: &FlowRecord,
    ) -> Result<FlowSnapshot, FlowError> {
        match record {
            FlowRecord::Compound(r) => self.compound_record(chain_id, r),
            FlowRecord::Openzeppelin(r) => self.openzeppelin_record(chain_id, r),
        }
    }

    fn compound_record(
        &self,
        chain_id: u64,
        r: &CompoundFlowRecord,
    ) -> Result<FlowSnapshot, FlowError> {
        let key = FlowKey::new(
            Standard::Compound,
            chain_id,
            canonical_hex(&r.contract)?,
            canonical_hex(&r.id)?,
        );
        let mut patch = lifecycle_patch(&r.queue, &r.execute, &r.cancel)?;
        patch.target = hex_field(r.target.as_deref())?;
        patch.value = decimal_field("value", r.value.as_ref())?;
        patch.call_data = bytes_field(r.data.as_deref())?;
        patch.function_signature = r.signature.clone().filter(|s| !s.is_empty());
        patch.eta = instant_field("eta", r.eta.as_ref())?;

        let grace = u64_field("gracePeriod", r.grace_period.as_ref())?
            .unwrap_or_else(|| self.grace_period(chain_id));
        patch.grace_period = Some(grace);
        patch.expired_at = match instant_field("expiredAt", r.expired_at.as_ref())? {
            Some(t) => Some(t),
            None => patch.eta.and_then(|eta| plus_secs(eta, grace)),
        };

        Ok(FlowSnapshot {
            status: reported_status(r.status.as_deref(), &patch)?,
            key,
            patch,
        })
    }

    fn openzeppelin_record(
        &self,
        chain_id: u64,
        r: &OpenzeppelinFlowRecord,
    ) -> Result<FlowSnapshot, FlowError> {
        let key = FlowKey::new(
            Standard::Openzeppelin,
            chain_id,
            canonical_hex(&r.contract)?,
            canonical_hex(&r.id)?,
        );
        let mut patch = lifecycle_patch(&r.queue, &r.execute, &r.cancel)?;
        patch.target = hex_field(r.target.as_deref())?;
        patch.value = decimal_field("value", r.value.as_ref())?;
        patch.call_data = bytes_field(r.data.as_deref())?;
        patch.predecessor = hex_field(r.predecessor.as_deref())?;
        patch.salt = hex_field(r.salt.as_deref())?;
        patch.delay = u64_field("delay", r.delay.as_ref())?;
        patch.eta = match instant_field("eta", r.eta.as_ref())? {
            Some(t) => Some(t),
            None => match (patch.queued_at, patch.delay) {
                (Some(at), Some(delay)) => plus_secs(at, delay),
                _ => None,
            },
        };

        Ok(FlowSnapshot {
            status: reported_status(r.status.as_deref(), &patch)?,
            key,
            patch,
        })
    }
}

/// Fields carried by the nested queue / execute / cancel sub-records.
fn lifecycle_patch(
    queue: &Option<IndexerTx>,
    execute: &Option<IndexerTx>,
    cancel: &Option<IndexerTx>,
) -> Result<FlowPatch, FlowError> {
    let mut patch = FlowPatch::default();
    if let Some(q) = queue {
        patch.queue_tx_hash = Some(canonical_hex(&q.tx_hash)?);
        patch.queue_block_number = u64_field("queue.blockNumber", q.block_number.as_ref())?;
        patch.queued_at = instant_field("queue.timestamp", q.timestamp.as_ref())?;
        patch.initiator = hex_field(q.from.as_deref())?;
    }
    if let Some(e) = execute {
        patch.execute_tx_hash = Some(canonical_hex(&e.tx_hash)?);
        patch.executed_at = instant_field("execute.timestamp", e.timestamp.as_ref())?;
    }
    if let Some(c) = cancel {
        patch.cancel_tx_hash = Some(canonical_hex(&c.tx_hash)?);
        patch.cancelled_at = instant_field("cancel.timestamp", c.timestamp.as_ref())?;
    }
    Ok(patch)
}

/// The indexer's view of the status. It only knows `waiting`, `executed`
/// and `cancelled`; without an explicit status the sub-records decide.
fn reported_status(status: Option<&str>, patch: &FlowPatch) -> Result<FlowStatus, FlowError> {
    if let Some(s) = status.filter(|s| !s.is_empty()) {
        let parsed: FlowStatus = s.parse()?;
        return Ok(if parsed.is_derived() {
            FlowStatus::Waiting
        } else {
            parsed
        });
    }
    Ok(if patch.execute_tx_hash.is_some() {
        FlowStatus::Executed
    } else if patch.cancel_tx_hash.is_some() {
        FlowStatus::Cancelled
    } else {
        FlowStatus::Waiting
    })
}
